mod portal;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use ispflow_portal::{Orchestrator, PortalError, SessionState};
use ispflow_tickets::{TicketClient, TicketError};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Absent when the ticketing API is not configured.
    pub tickets: Option<Arc<TicketClient>>,
    /// Absent only in tests that run without a database.
    pub pool: Option<PgPool>,
    pub workflow_timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
    portal_session: SessionState,
    tickets_api: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(request_id: String, data: T) -> Json<Self> {
        Json(Self {
            data,
            meta: ResponseMeta::new(request_id),
        })
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" => StatusCode::BAD_REQUEST,
            "validation_error" | "precondition_failed" => StatusCode::UNPROCESSABLE_ENTITY,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "authentication_failed" | "session_expired" | "transport_error"
            | "unexpected_markup" | "unexpected_response" => StatusCode::BAD_GATEWAY,
            "configuration_error" => StatusCode::SERVICE_UNAVAILABLE,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Unwraps a JSON body, turning extractor rejections into the API envelope.
pub(super) fn json_body<T>(
    request_id: &str,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::new(request_id, "bad_request", rejection.body_text()))
}

pub(super) fn map_portal_error(request_id: String, error: &PortalError) -> ApiError {
    let code = error.code();
    match error {
        PortalError::Precondition { .. } | PortalError::NotFound { .. } => {
            tracing::warn!(code, error = %error, "portal workflow refused");
        }
        _ => tracing::error!(code, error = %error, "portal workflow failed"),
    }
    if let Some(excerpt) = error.excerpt() {
        tracing::debug!(excerpt, "portal response excerpt");
    }

    let api_error = ApiError::new(request_id, code, error.to_string());
    match error {
        PortalError::Precondition { reason, .. } => {
            api_error.with_details(json!({ "reason": reason }))
        }
        PortalError::Validation {
            messages,
            missing_required,
            ..
        } => api_error.with_details(json!({
            "messages": messages,
            "missing_required": missing_required,
        })),
        PortalError::Status { status, .. } => {
            api_error.with_details(json!({ "upstream_status": status }))
        }
        _ => api_error,
    }
}

pub(super) fn map_ticket_error(request_id: String, error: &TicketError) -> ApiError {
    let code = match error.status() {
        Some(404) => "not_found",
        _ => error.code(),
    };
    tracing::error!(code, error = %error, "ticketing API request failed");
    let api_error = ApiError::new(request_id, code, error.to_string());
    match error.status() {
        Some(status) => api_error.with_details(json!({ "upstream_status": status })),
        None => api_error,
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/activations", post(portal::activate))
        .route("/api/v1/tickets", post(portal::create_ticket))
        .route("/api/v1/tickets/{ticket_id}", delete(portal::delete_ticket))
        .route("/api/v1/installations", patch(portal::edit_installation))
        .route(
            "/api/v1/installations/{external_id}",
            delete(portal::delete_installation),
        )
        .route("/api/v1/session", get(portal::session_status))
        .route("/api/v1/remote/tickets", get(remote::search_tickets))
        .route(
            "/api/v1/remote/tickets/{ticket_id}",
            get(remote::get_ticket).patch(remote::update_ticket),
        )
        .route("/api/v1/remote/staff", get(remote::list_staff))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let database = match &state.pool {
        Some(pool) => match ispflow_db::health_check(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "health check: database unavailable");
                "unavailable"
            }
        },
        None => "not_configured",
    };
    let data = HealthData {
        status: if database == "unavailable" { "degraded" } else { "ok" },
        database,
        portal_session: state.orchestrator.portal().sessions().state(),
        tickets_api: if state.tickets.is_some() {
            "configured"
        } else {
            "not_configured"
        },
    };
    let status = if data.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, ApiResponse::new(req_id.0, data))
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(120, Duration::from_secs(60))
}

#[cfg(test)]
mod tests;
