//! Seat claim, cancellation and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{ReservationId, SeatId, UserId};
use distributed_lock::DistributedLock;
use serde::{Deserialize, Serialize};
use store::{Payment, Reservation, Store};

use crate::error::ApiError;
use crate::state::AppState;

/// Request header carrying the caller's idempotency token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Token from the `Idempotency-Key` header, else the one in the body.
fn idempotency_key(headers: &HeaderMap, body_token: Option<String>) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or(body_token)
}

// -- Request types --

#[derive(Deserialize)]
pub struct ClaimSeatRequest {
    pub user_id: i64,
    pub seat_id: i64,
    pub idempotency_token: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct PayRequest {
    pub idempotency_token: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReservationResponse {
    pub id: i64,
    pub user_id: i64,
    pub seat_id: i64,
    pub schedule_id: i64,
    pub status: String,
    pub hold_expires_at: DateTime<Utc>,
    pub amount: i64,
    pub idempotency_token: String,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id.get(),
            user_id: r.user_id.get(),
            seat_id: r.seat_id.get(),
            schedule_id: r.schedule_id.get(),
            status: r.status.to_string(),
            hold_expires_at: r.hold_expires_at,
            amount: r.amount.minor(),
            idempotency_token: r.idempotency_token,
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: i64,
    pub reservation_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub status: String,
    pub idempotency_token: String,
    pub approved_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id.get(),
            reservation_id: p.reservation_id.get(),
            user_id: p.user_id.get(),
            amount: p.amount.minor(),
            status: p.status.as_str().to_string(),
            idempotency_token: p.idempotency_token,
            approved_at: p.approved_at,
        }
    }
}

// -- Handlers --

/// POST /reservations: hold a seat for a user.
#[tracing::instrument(
    skip(state, headers, req),
    fields(user_id = req.user_id, seat_id = req.seat_id)
)]
pub async fn claim<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    headers: HeaderMap,
    Json(req): Json<ClaimSeatRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let token = idempotency_key(&headers, req.idempotency_token);
    let reservation = state
        .reservations
        .claim(UserId::new(req.user_id), SeatId::new(req.seat_id), token)
        .await?;

    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// GET /reservations/{id}: load a reservation.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state.reservations.get(ReservationId::new(id)).await?;
    Ok(Json(reservation.into()))
}

/// DELETE /reservations/{id}: cancel a hold.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation = state.reservations.cancel(ReservationId::new(id)).await?;
    Ok(Json(reservation.into()))
}

/// POST /reservations/{id}/payment: pay for a held reservation.
#[tracing::instrument(skip(state, headers, req))]
pub async fn pay<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    req: Option<Json<PayRequest>>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let Json(req) = req.unwrap_or_default();
    let token = idempotency_key(&headers, req.idempotency_token);
    let payment = state
        .payments
        .pay(ReservationId::new(id), token)
        .await?;

    Ok((StatusCode::CREATED, Json(payment.into())))
}
