//! Editing and deleting a client's installation on the portal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{classify_submission, fill_csrf, AppliedField, Orchestrator, SubmitOutcome};
use crate::aliases::{Payload, PayloadError};
use crate::error::PortalError;
use crate::form::{extract_snapshot, merge_update, UpdateRequest};
use crate::session::PortalSession;

/// Partial update of one installation's edit form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct EditInstallationCommand {
    pub external_id: String,
    pub installation_id: String,
    /// Field updates; keys may be field names, aliases or close variants,
    /// and reference values may be option labels.
    pub fields: UpdateRequest,
}

impl TryFrom<Map<String, Value>> for EditInstallationCommand {
    type Error = PayloadError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let payload = Payload::new(&map);
        Ok(Self {
            external_id: payload.required(&["external_id", "externalId", "cliente", "codigo"])?,
            installation_id: payload.required_id(&[
                "installation_id",
                "installationId",
                "instalacion",
                "instalacionId",
            ])?,
            fields: payload.required(&["fields", "campos", "cambios", "changes"])?,
        })
    }
}

/// Result of an installation edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationOutcome {
    pub submit: SubmitOutcome,
    pub applied: Vec<AppliedField>,
}

impl Orchestrator {
    /// Applies a partial update to an installation's edit form, leaving
    /// every field not named in the update as the portal rendered it.
    ///
    /// # Errors
    ///
    /// - [`PortalError::Precondition`] if a technician/plan label cannot be
    ///   resolved to an option.
    /// - [`PortalError::Validation`] when the portal rejects the form.
    /// - Session and transport errors as they occur.
    pub async fn edit_installation(
        &self,
        command: &EditInstallationCommand,
    ) -> Result<InstallationOutcome, PortalError> {
        if command.fields.is_empty() {
            tracing::warn!(external_id = %command.external_id, "installation edit has no fields; resubmitting form unchanged");
        }
        let path = self
            .portal()
            .config()
            .routes
            .installation_edit(&command.external_id, &command.installation_id);
        let path = path.as_str();
        let update = &command.fields;

        let outcome = self
            .portal()
            .with_session_retry("edit installation", move |session| {
                self.submit_installation_edit(session, path, update)
            })
            .await?;
        tracing::info!(
            external_id = %command.external_id,
            installation_id = %command.installation_id,
            fields = outcome.applied.len(),
            status = outcome.submit.status,
            "portal installation updated"
        );
        Ok(outcome)
    }

    async fn submit_installation_edit(
        &self,
        session: Arc<PortalSession>,
        path: &str,
        update: &UpdateRequest,
    ) -> Result<InstallationOutcome, PortalError> {
        let page = self.portal().get_page(&session, path).await?;
        let snapshot = extract_snapshot(&page.body, None)?;
        let (resolved, applied) = self.resolve_update(&page.body, &snapshot, update)?;
        let (mut fields, _) = merge_update(&snapshot, &resolved);
        fill_csrf(&mut fields, &self.portal().config().csrf_field, &session);
        let action = self.form_action(&page.url, &fields)?;
        let response = self
            .portal()
            .post_form(&session, &action, fields.fields(), &page.url)
            .await?;
        Ok(InstallationOutcome {
            submit: classify_submission(response)?,
            applied,
        })
    }

    /// Deletes a client and its installations by confirming the delete page.
    ///
    /// # Errors
    ///
    /// Session, transport and status errors; [`PortalError::FormNotFound`]
    /// if the confirm page has no form.
    pub async fn delete_installation(&self, external_id: &str) -> Result<SubmitOutcome, PortalError> {
        let path = self.portal().config().routes.installation_delete(external_id);
        let path = path.as_str();
        let submit = self
            .portal()
            .with_session_retry("delete installation", move |session| async move {
                self.submit_confirmation(&session, path).await
            })
            .await?;
        tracing::info!(external_id, status = submit.status, "portal installation deleted");
        Ok(submit)
    }
}
