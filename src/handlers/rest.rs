//! REST API for submitting sagas and polling their status.
//!
//! Endpoints:
//! - `POST /sagas`: submit a saga, `202` with the new id
//! - `GET /sagas`: list snapshots, optionally `?status=COMPENSATED`
//! - `GET /sagas/:id`: saga snapshot
//! - `POST /orders/checkout-saga`: submit a checkout saga
//! - `GET /orders/saga/:id/status`: `{sagaId, status}` of any saga
//! - `GET /api/health`: health check

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::model::{SagaInstance, SagaStatus};
use crate::orchestration::{CoordinatorError, SagaCoordinator, SagaRequest};
use crate::participants::{CheckoutRequest, CHECKOUT_SAGA_TYPE};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: SagaCoordinator,
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(
    coordinator: SagaCoordinator,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(AppState { coordinator });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Saga REST API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/sagas", post(submit_saga).get(list_sagas))
        .route("/sagas/:id", get(saga_status))
        .route("/orders/checkout-saga", post(submit_checkout))
        .route("/orders/saga/:id/status", get(order_saga_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error response rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("Saga not found: {id}"),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, CoordinatorError::NotFound(_)) {
            StatusCode::NOT_FOUND
        } else {
            error!(error = %err, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    saga_id: Uuid,
    status: SagaStatus,
    message: String,
}

impl Accepted {
    fn pending(saga_id: Uuid) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                saga_id,
                status: SagaStatus::Pending,
                message: "Saga accepted for processing".to_string(),
            }),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusSummary {
    saga_id: Uuid,
    status: SagaStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn submit_saga(
    State(state): State<AppState>,
    body: Result<Json<SagaRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(request) = body?;
    let id = state.coordinator.submit(request).await?;
    Ok(Accepted::pending(id))
}

async fn submit_checkout(
    State(state): State<AppState>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(checkout) = body?;
    checkout.validate().map_err(ApiError::bad_request)?;

    let payload = serde_json::to_value(&checkout).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })?;
    let mut request = SagaRequest::of_type(CHECKOUT_SAGA_TYPE, payload);
    request.correlation_id = checkout.customer_id.clone();

    let id = state.coordinator.submit(request).await?;
    info!(saga_id = %id, items = checkout.items.len(), "Checkout saga accepted");
    Ok(Accepted::pending(id))
}

async fn list_sagas(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SagaInstance>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SagaStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    Ok(Json(state.coordinator.list(status).await?))
}

async fn saga_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SagaInstance>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.coordinator.get_status(id).await?))
}

async fn order_saga_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusSummary>, ApiError> {
    let id = parse_id(&id)?;
    let saga = state.coordinator.get_status(id).await?;
    Ok(Json(StatusSummary {
        saga_id: saga.id,
        status: saga.status,
    }))
}

/// Malformed ids cannot name a saga, so they are reported as missing.
fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(raw))
}

#[cfg(test)]
mod tests;
