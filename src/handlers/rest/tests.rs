use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;
use crate::config::Config;
use crate::dlq::ChannelDeadLetterPublisher;
use crate::interfaces::StatusStore;
use crate::participants::{CheckoutLedger, ParticipantRegistry, SagaDefinitions};
use crate::storage::InMemoryStatusStore;

async fn test_state() -> (AppState, Arc<CheckoutLedger>) {
    let ledger = Arc::new(CheckoutLedger::demo().await);
    let (publisher, _receiver) = ChannelDeadLetterPublisher::new();
    let coordinator = SagaCoordinator::new(
        &Config::for_test(),
        Arc::new(InMemoryStatusStore::new()) as Arc<dyn StatusStore>,
        ParticipantRegistry::with_checkout(ledger.clone()),
        SagaDefinitions::builtin(),
        Arc::new(publisher),
    );
    (AppState { coordinator }, ledger)
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn checkout_body() -> Value {
    json!({
        "items": [
            {"ticketType": "P2P", "p2pJourneyId": "ben-thanh-suoi-tien", "quantity": 2},
            {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": 1}
        ],
        "paymentMethod": "VNPAY",
        "voucherId": "WELCOME10"
    })
}

fn saga_id(body: &Value) -> Uuid {
    body["sagaId"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_rest_health() {
    let (state, _) = test_state().await;
    let (status, _) = send(&state, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_submit_checkout_saga_by_type() {
    let (state, ledger) = test_state().await;

    let (status, body) = send(
        &state,
        post(
            "/sagas",
            &json!({"sagaType": "checkout", "payload": checkout_body()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    assert!(body["message"].is_string());

    let id = saga_id(&body);
    state
        .coordinator
        .wait_for_terminal(id, Duration::from_secs(5))
        .await
        .unwrap();

    let (status, snapshot) = send(&state, get(&format!("/sagas/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["status"], "COMPLETED");
    assert_eq!(snapshot["sagaType"], "checkout");
    assert_eq!(snapshot["history"].as_array().unwrap().len(), 6);
    assert_eq!(ledger.orders_for_saga(id).await.len(), 1);
}

#[tokio::test]
async fn test_submit_rejects_invalid_requests() {
    let (state, _) = test_state().await;

    for body in [
        json!({}),
        json!({"sagaType": "teleport"}),
        json!({"steps": [{"name": "a", "participant": "nobody"}]}),
    ] {
        let (status, response) = send(&state, post("/sagas", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(response["error"].is_string());
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/sagas")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, response) = send(&state, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"].is_string());
}

#[tokio::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    let (state, _) = test_state().await;

    let (status, _) = send(&state, get(&format!("/sagas/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&state, get("/sagas/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not-a-uuid"));

    let (status, _) = send(&state, get("/orders/saga/42/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_endpoint_and_order_status() {
    let (state, _) = test_state().await;

    let (status, body) = send(&state, post("/orders/checkout-saga", &checkout_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = saga_id(&body);

    state
        .coordinator
        .wait_for_terminal(id, Duration::from_secs(5))
        .await
        .unwrap();

    let (status, summary) = send(&state, get(&format!("/orders/saga/{id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary, json!({"sagaId": id.to_string(), "status": "COMPLETED"}));
}

#[tokio::test]
async fn test_checkout_endpoint_validates_shape() {
    let (state, _) = test_state().await;

    let (status, body) = send(
        &state,
        post(
            "/orders/checkout-saga",
            &json!({"items": [], "paymentMethod": "CASH"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no items"));

    let (status, _) = send(
        &state,
        post(
            "/orders/checkout-saga",
            &json!({"items": [{"ticketType": "P2P", "quantity": 1}], "paymentMethod": "CASH"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &state,
        post(
            "/orders/checkout-saga",
            &json!({
                "items": [
                    {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": u32::MAX},
                    {"ticketType": "TIMED", "timedTicketPlanId": "day-pass", "quantity": 1}
                ],
                "paymentMethod": "CASH"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exceeds"));

    assert!(state.coordinator.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (state, ledger) = test_state().await;
    ledger.suspend_ticketing(Some("maintenance")).await;

    let (_, body) = send(&state, post("/orders/checkout-saga", &checkout_body())).await;
    let id = saga_id(&body);
    state
        .coordinator
        .wait_for_terminal(id, Duration::from_secs(5))
        .await
        .unwrap();

    let (status, listed) = send(&state, get("/sagas?status=compensated")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id.to_string());

    let (_, completed) = send(&state, get("/sagas?status=COMPLETED")).await;
    assert!(completed.as_array().unwrap().is_empty());

    let (status, _) = send(&state, get("/sagas?status=sideways")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
