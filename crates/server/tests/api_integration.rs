//! Integration tests for the booking server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use booking::InMemorySoldOutRanking;
use common::{ConcertId, Money, ScheduleId, SeatId, UserId, WalletId};
use distributed_lock::{InMemoryLock, LockManager};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use server::config::Config;
use store::{
    InMemoryStore, Schedule, Seat, SeatGrade, SeatRepository, SeatStatus, Store, UnitOfWork,
    Wallet, WalletRepository,
};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Schedule 1 priced at 100 with seats 1 and 2; user 1 can afford one seat.
async fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    tx.save_schedule(&Schedule {
        id: ScheduleId::new(1),
        concert_id: ConcertId::new(1),
        price: 100,
    })
    .await
    .unwrap();
    for n in 1..=2 {
        tx.save_seat(&Seat {
            id: SeatId::new(n),
            schedule_id: ScheduleId::new(1),
            seat_number: n as i32,
            grade: SeatGrade::Vip,
            status: SeatStatus::Available,
            price: 0,
        })
        .await
        .unwrap();
    }
    tx.save_wallet(&Wallet::new(
        WalletId::new(1),
        UserId::new(1),
        Money::from_minor(10_000),
    ))
    .await
    .unwrap();
    tx.save_wallet(&Wallet::new(
        WalletId::new(2),
        UserId::new(2),
        Money::from_minor(100_000),
    ))
    .await
    .unwrap();
    tx.commit().await.unwrap();
    store
}

async fn setup() -> (Router, InMemoryStore) {
    let store = seeded_store().await;
    let ranking = Arc::new(InMemorySoldOutRanking::new());
    let (state, worker) = server::create_default_state(
        store.clone(),
        LockManager::new(InMemoryLock::new()),
        ranking,
        &Config::default(),
    );
    tokio::spawn(worker.run());
    (server::create_app(state, get_metrics_handle()), store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with_key(app, method, uri, None, body).await
}

async fn send_with_key(
    app: &Router,
    method: &str,
    uri: &str,
    idempotency_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(key) = idempotency_key {
        request = request.header("Idempotency-Key", key);
    }
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_claim_seat() {
    let (app, _) = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "HOLD");
    assert_eq!(json["amount"], 10_000);
    assert!(json["idempotency_token"].as_str().is_some());

    let (status, seat) = send(&app, "GET", "/seats/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat["status"], "HELD");
    assert_eq!(seat["price"], 100);
}

#[tokio::test]
async fn test_second_claim_on_held_seat_conflicts() {
    let (app, _) = setup().await;
    send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 1 })),
    )
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 2, "seat_id": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_claim_replays_idempotency_token() {
    let (app, store) = setup().await;
    let body = json!({ "user_id": 1, "seat_id": 1, "idempotency_token": "abc" });

    let (_, first) = send(&app, "POST", "/reservations", Some(body.clone())).await;
    let (status, second) = send(&app, "POST", "/reservations", Some(body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(store.reservation_count().await, 1);
}

#[tokio::test]
async fn test_idempotency_key_header_replays_claim_and_payment() {
    let (app, store) = setup().await;
    let body = json!({ "user_id": 1, "seat_id": 1, "idempotency_token": "ignored" });

    let (status, first) =
        send_with_key(&app, "POST", "/reservations", Some("claim-1"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["idempotency_token"], "claim-1");
    let (status, second) =
        send_with_key(&app, "POST", "/reservations", Some("claim-1"), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(store.reservation_count().await, 1);

    let uri = format!("/reservations/{}/payment", first["id"].as_i64().unwrap());
    let (status, paid) = send_with_key(&app, "POST", &uri, Some("pay-1"), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, replayed) = send_with_key(&app, "POST", &uri, Some("pay-1"), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(paid["id"], replayed["id"]);
    assert_eq!(replayed["idempotency_token"], "pay-1");
    assert_eq!(store.payment_count().await, 1);
}

#[tokio::test]
async fn test_unknown_seat_is_not_found() {
    let (app, _) = setup().await;

    let (status, _) = send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/reservations/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pay_reservation() {
    let (app, store) = setup().await;
    let (_, reservation) = send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 1 })),
    )
    .await;
    let id = reservation["id"].as_i64().unwrap();

    let (status, payment) = send(
        &app,
        "POST",
        &format!("/reservations/{id}/payment"),
        Some(json!({ "idempotency_token": "pay-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "APPROVED");
    assert_eq!(payment["amount"], 10_000);
    let wallet = store
        .find_wallet_by_user(UserId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.balance, Money::zero());

    let (_, reservation) = send(&app, "GET", &format!("/reservations/{id}"), None).await;
    assert_eq!(reservation["status"], "PAID");
}

#[tokio::test]
async fn test_pay_without_body_and_insufficient_balance() {
    let (app, _) = setup().await;
    let mut ids = Vec::new();
    for seat in 1..=2 {
        let (_, reservation) = send(
            &app,
            "POST",
            "/reservations",
            Some(json!({ "user_id": 1, "seat_id": seat })),
        )
        .await;
        ids.push(reservation["id"].as_i64().unwrap());
    }

    let (status, _) = send(&app, "POST", &format!("/reservations/{}/payment", ids[0]), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) =
        send(&app, "POST", &format!("/reservations/{}/payment", ids[1]), None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(json["error"].as_str().unwrap().contains("Insufficient"));
}

#[tokio::test]
async fn test_cancel_frees_the_seat() {
    let (app, _) = setup().await;
    let (_, reservation) = send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 1 })),
    )
    .await;
    let id = reservation["id"].as_i64().unwrap();

    let (status, cancelled) = send(&app, "DELETE", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");

    let (_, seat) = send(&app, "GET", "/seats/1", None).await;
    assert_eq!(seat["status"], "AVAILABLE");

    let (status, _) = send(&app, "DELETE", &format!("/reservations/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sold_out_ranking() {
    let (app, _) = setup().await;
    for seat in 1..=2 {
        let (_, reservation) = send(
            &app,
            "POST",
            "/reservations",
            Some(json!({ "user_id": 2, "seat_id": seat })),
        )
        .await;
        let id = reservation["id"].as_i64().unwrap();
        let (status, _) = send(&app, "POST", &format!("/reservations/{id}/payment"), None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // The listener runs on the notification worker task.
    let mut ranking = Value::Null;
    for _ in 0..100 {
        let (status, json) = send(&app, "GET", "/rankings/sold-out", None).await;
        assert_eq!(status, StatusCode::OK);
        if json.as_array().is_some_and(|a| !a.is_empty()) {
            ranking = json;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(ranking[0]["rank"], 1);
    assert_eq!(ranking[0]["schedule_id"], 1);
}

#[tokio::test]
async fn test_ranking_limit_is_validated() {
    let (app, _) = setup().await;

    let (status, _) = send(&app, "GET", "/rankings/sold-out?limit=0", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup().await;
    send(
        &app,
        "POST",
        "/reservations",
        Some(json!({ "user_id": 1, "seat_id": 1 })),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("booking_claims_total"));
}
