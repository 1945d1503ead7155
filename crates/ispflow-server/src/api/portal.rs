//! Portal workflow handlers.
//!
//! Request bodies deserialize straight into the workflow command types, so
//! the field aliases those types accept (`tecnico`, `tecnicoId`, ...) work
//! over HTTP too. Every workflow call is bounded by the workflow timeout.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use ispflow_portal::{
    bounded, ActivateCommand, ActivationOutcome, CreateTicketCommand, EditInstallationCommand,
    InstallationOutcome, SessionState, SubmitOutcome, TicketOutcome,
};
use serde::Serialize;

use crate::middleware::RequestId;

use super::{json_body, map_portal_error, ApiError, ApiResponse, AppState};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
pub(super) struct SessionStatus {
    state: SessionState,
    logins: u64,
}

/// POST /api/v1/activations: activate a pending installation request.
pub(super) async fn activate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Result<Json<ActivateCommand>, JsonRejection>,
) -> ApiResult<ActivationOutcome> {
    let command = json_body(&req_id.0, body)?;
    if command.record_id.is_none()
        && command.client_name.as_deref().is_none_or(|n| n.trim().is_empty())
    {
        return Err(ApiError::new(
            req_id.0,
            "bad_request",
            "either record_id or client_name is required",
        ));
    }

    let outcome = bounded(state.workflow_timeout, state.orchestrator.activate(&command))
        .await
        .map_err(|e| map_portal_error(req_id.0.clone(), &e))?;

    if !outcome.local_record_updated {
        tracing::error!(
            record_id = outcome.record_id,
            external_id = %outcome.external_id,
            "activation submitted but local record not updated"
        );
    }
    Ok(ApiResponse::new(req_id.0, outcome))
}

/// POST /api/v1/tickets: create a portal ticket.
pub(super) async fn create_ticket(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Result<Json<CreateTicketCommand>, JsonRejection>,
) -> ApiResult<TicketOutcome> {
    let command = json_body(&req_id.0, body)?;
    let outcome = bounded(
        state.workflow_timeout,
        state.orchestrator.create_ticket(&command),
    )
    .await
    .map_err(|e| map_portal_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, outcome))
}

/// DELETE /api/v1/tickets/:ticket_id: delete a portal ticket.
pub(super) async fn delete_ticket(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(ticket_id): Path<String>,
) -> ApiResult<SubmitOutcome> {
    let outcome = bounded(
        state.workflow_timeout,
        state.orchestrator.delete_ticket(&ticket_id),
    )
    .await
    .map_err(|e| map_portal_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, outcome))
}

/// PATCH /api/v1/installations: apply a partial update to an installation.
pub(super) async fn edit_installation(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Result<Json<EditInstallationCommand>, JsonRejection>,
) -> ApiResult<InstallationOutcome> {
    let command = json_body(&req_id.0, body)?;
    let outcome = bounded(
        state.workflow_timeout,
        state.orchestrator.edit_installation(&command),
    )
    .await
    .map_err(|e| map_portal_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, outcome))
}

/// DELETE /api/v1/installations/:external_id: delete an installation.
pub(super) async fn delete_installation(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(external_id): Path<String>,
) -> ApiResult<SubmitOutcome> {
    let outcome = bounded(
        state.workflow_timeout,
        state.orchestrator.delete_installation(&external_id),
    )
    .await
    .map_err(|e| map_portal_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, outcome))
}

/// GET /api/v1/session: cached portal session state.
pub(super) async fn session_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> ApiResult<SessionStatus> {
    let sessions = state.orchestrator.portal().sessions();
    Ok(ApiResponse::new(
        req_id.0,
        SessionStatus {
            state: sessions.state(),
            logins: sessions.login_count(),
        },
    ))
}
