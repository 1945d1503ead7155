use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Extension, Json,
};
use ispflow_tickets::{RemoteTicket, StaffMember, TicketClient, TicketUpdate};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::middleware::RequestId;

use super::{json_body, map_ticket_error, ApiError, ApiResponse, AppState};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub(super) struct SearchQuery {
    #[serde(alias = "cliente", alias = "client_name")]
    client: Option<String>,
}

fn tickets(state: &AppState, request_id: &str) -> Result<Arc<TicketClient>, ApiError> {
    state.tickets.clone().ok_or_else(|| {
        ApiError::new(
            request_id,
            "configuration_error",
            "ticketing API is not configured (ISPFLOW_TICKETS_BASE_URL, ISPFLOW_TICKETS_API_KEY)",
        )
    })
}

/// GET /api/v1/remote/tickets/:ticket_id
pub(super) async fn get_ticket(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(ticket_id): Path<String>,
) -> ApiResult<RemoteTicket> {
    let client = tickets(&state, &req_id.0)?;
    let ticket = client
        .get_ticket(&ticket_id)
        .await
        .map_err(|e| map_ticket_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, ticket))
}

/// PATCH /api/v1/remote/tickets/:ticket_id: partial update with PUT fallback.
pub(super) async fn update_ticket(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(ticket_id): Path<String>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<TicketUpdate> {
    let fields = json_body(&req_id.0, body)?;
    if fields.is_empty() {
        return Err(ApiError::new(
            req_id.0,
            "bad_request",
            "request body must name at least one field",
        ));
    }
    let client = tickets(&state, &req_id.0)?;
    let update = client
        .update_ticket(&ticket_id, &fields)
        .await
        .map_err(|e| map_ticket_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, update))
}

/// GET /api/v1/remote/tickets?client=NAME
pub(super) async fn search_tickets(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<RemoteTicket>> {
    let Some(client_name) = query.client.filter(|c| !c.trim().is_empty()) else {
        return Err(ApiError::new(
            req_id.0,
            "bad_request",
            "query parameter 'client' is required",
        ));
    };
    let client = tickets(&state, &req_id.0)?;
    let found = client
        .search_tickets_by_client(&client_name)
        .await
        .map_err(|e| map_ticket_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, found))
}

/// GET /api/v1/remote/staff
pub(super) async fn list_staff(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> ApiResult<Vec<StaffMember>> {
    let client = tickets(&state, &req_id.0)?;
    let staff = client
        .list_staff()
        .await
        .map_err(|e| map_ticket_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, staff))
}
