//! Portal ticket creation and deletion.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{classify_submission, fill_csrf, AppliedField, Orchestrator, SubmitOutcome};
use crate::aliases::{Payload, PayloadError};
use crate::client::Attachment;
use crate::error::PortalError;
use crate::form::{extract_snapshot, file_input_name, merge_update, UpdateRequest};
use crate::session::PortalSession;

const DEFAULT_FILE_FIELD: &str = "archivo";

static TRAILING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)/?(?:[?#].*)?$").expect("valid ticket id regex"));

/// Inbound ticket creation request.
///
/// Payload keys may use any listed alias; the first non-null one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct CreateTicketCommand {
    pub category_id: String,
    pub start_time: String,
    pub end_time: String,
    /// Technician option value or display name.
    pub technician: String,
    pub subject: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    /// Staged file to attach.
    pub attachment_path: Option<PathBuf>,
    /// Delete the staged file once the ticket has been submitted.
    pub remove_attachment_after: bool,
}

impl TryFrom<Map<String, Value>> for CreateTicketCommand {
    type Error = PayloadError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let payload = Payload::new(&map);
        Ok(Self {
            category_id: payload.required_id(&[
                "category_id",
                "categoria",
                "category",
                "categoryId",
                "categoria_id",
            ])?,
            start_time: payload.required(&[
                "start_time",
                "fecha_inicio",
                "fechaInicio",
                "startTime",
            ])?,
            end_time: payload.required(&["end_time", "fecha_fin", "fechaFin", "endTime"])?,
            technician: payload.required_id(&[
                "technician",
                "tecnico",
                "tecnicoId",
                "tecnico_id",
                "technicianId",
            ])?,
            subject: payload.required(&["subject", "asunto", "titulo"])?,
            description: payload.opt(&["description", "descripcion", "detalle"])?,
            priority: payload.opt_id(&["priority", "prioridad"])?,
            attachment_path: payload.opt(&[
                "attachment_path",
                "archivo",
                "attachment",
                "filePath",
            ])?,
            remove_attachment_after: payload
                .opt(&["remove_attachment_after", "removeAttachment", "cleanup"])?
                .unwrap_or(false),
        })
    }
}

impl CreateTicketCommand {
    fn to_update(&self) -> UpdateRequest {
        let mut update = UpdateRequest::new()
            .with("categoria", self.category_id.as_str())
            .with("fecha_inicio", self.start_time.as_str())
            .with("fecha_fin", self.end_time.as_str())
            .with("asunto", self.subject.as_str())
            .with("tecnico", self.technician.as_str());
        if let Some(description) = &self.description {
            update.insert("descripcion", description.as_str());
        }
        if let Some(priority) = &self.priority {
            update.insert("prioridad", priority.as_str());
        }
        update
    }
}

/// Result of a portal ticket creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketOutcome {
    pub submit: SubmitOutcome,
    /// Numeric id read from the redirect target, when there is one.
    pub ticket_id: Option<String>,
    pub applied: Vec<AppliedField>,
    pub attachment_removed: bool,
}

/// Last numeric path segment of a redirect target.
fn ticket_id_from_location(location: &str) -> Option<String> {
    TRAILING_ID
        .captures(location)
        .map(|caps| caps[1].to_string())
}

async fn read_attachment(path: &Path) -> Result<(String, Vec<u8>), PortalError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| PortalError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map_or_else(|| "adjunto".to_string(), |n| n.to_string_lossy().into_owned());
    Ok((file_name, bytes))
}

async fn remove_staged(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed staged attachment");
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staged attachment");
            false
        }
    }
}

impl Orchestrator {
    /// Creates a ticket through the portal's ticket form.
    ///
    /// The technician may be given as an option value or a name; names are
    /// resolved against the form's technician dropdown.
    ///
    /// # Errors
    ///
    /// - [`PortalError::Io`] if the attachment cannot be read.
    /// - [`PortalError::Precondition`] if the technician cannot be resolved.
    /// - [`PortalError::Validation`] when the portal rejects the form.
    /// - Session and transport errors as they occur.
    pub async fn create_ticket(&self, command: &CreateTicketCommand) -> Result<TicketOutcome, PortalError> {
        let staged = match &command.attachment_path {
            Some(path) => Some(read_attachment(path).await?),
            None => None,
        };
        let staged = staged.as_ref();
        let update = command.to_update();
        let update = &update;

        let result = self
            .portal()
            .with_session_retry("create ticket", move |session| {
                self.submit_ticket(session, update, staged)
            })
            .await;

        let attachment_removed = match (&command.attachment_path, command.remove_attachment_after) {
            (Some(path), true) => remove_staged(path).await,
            _ => false,
        };

        let (submit, applied) = result?;
        let ticket_id = submit.location.as_deref().and_then(ticket_id_from_location);
        tracing::info!(ticket_id = ticket_id.as_deref(), status = submit.status, "portal ticket created");
        Ok(TicketOutcome {
            submit,
            ticket_id,
            applied,
            attachment_removed,
        })
    }

    async fn submit_ticket(
        &self,
        session: Arc<PortalSession>,
        update: &UpdateRequest,
        staged: Option<&(String, Vec<u8>)>,
    ) -> Result<(SubmitOutcome, Vec<AppliedField>), PortalError> {
        let config = self.portal().config();
        let page = self.portal().get_page(&session, &config.routes.ticket_create).await?;
        let snapshot = extract_snapshot(&page.body, None)?;
        let (resolved, applied) = self.resolve_update(&page.body, &snapshot, update)?;
        let (mut fields, _) = merge_update(&snapshot, &resolved);
        fill_csrf(&mut fields, &config.csrf_field, &session);
        let action = self.form_action(&page.url, &fields)?;

        let response = match staged {
            Some((file_name, bytes)) => {
                let field = file_input_name(&page.body).unwrap_or_else(|| DEFAULT_FILE_FIELD.to_string());
                let attachment = Attachment {
                    field,
                    file_name: file_name.clone(),
                    bytes: bytes.clone(),
                };
                self.portal()
                    .post_multipart(&session, &action, fields.fields(), Some(&attachment), &page.url)
                    .await?
            }
            None => {
                self.portal()
                    .post_form(&session, &action, fields.fields(), &page.url)
                    .await?
            }
        };
        Ok((classify_submission(response)?, applied))
    }

    /// Deletes a portal ticket by confirming its delete page.
    ///
    /// # Errors
    ///
    /// Session, transport and status errors; [`PortalError::FormNotFound`]
    /// if the confirm page has no form.
    pub async fn delete_ticket(&self, ticket_id: &str) -> Result<SubmitOutcome, PortalError> {
        let path = self.portal().config().routes.ticket_delete(ticket_id);
        let path = path.as_str();
        let submit = self
            .portal()
            .with_session_retry("delete ticket", move |session| async move {
                self.submit_confirmation(&session, path).await
            })
            .await?;
        tracing::info!(ticket_id, status = submit.status, "portal ticket deleted");
        Ok(submit)
    }
}
