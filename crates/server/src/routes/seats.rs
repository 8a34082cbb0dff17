//! Seat lookup endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use booking::BookingError;
use common::SeatId;
use distributed_lock::DistributedLock;
use serde::Serialize;
use store::{SeatStatus, Store};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SeatResponse {
    pub id: i64,
    pub schedule_id: i64,
    pub seat_number: i32,
    pub grade: &'static str,
    pub status: SeatStatus,
    pub price: i64,
}

/// GET /seats/{id}: seat with its current availability.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone, L: DistributedLock + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<i64>,
) -> Result<Json<SeatResponse>, ApiError> {
    let seat_id = SeatId::new(id);
    let seat = state
        .store
        .find_seat(seat_id)
        .await
        .map_err(BookingError::from)?
        .ok_or(BookingError::SeatNotFound(seat_id))?;

    Ok(Json(SeatResponse {
        id: seat.id.get(),
        schedule_id: seat.schedule_id.get(),
        seat_number: seat.seat_number,
        grade: seat.grade.as_str(),
        status: seat.status,
        price: seat.price,
    }))
}
