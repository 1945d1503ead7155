//! Multi-step portal workflows: activation, tickets and installations.
//!
//! Every step that touches the portal runs through
//! [`PortalClient::with_session_retry`], so one mid-workflow session expiry
//! is absorbed transparently.

pub mod activation;
pub mod installations;
pub mod tickets;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ispflow_core::text::field_tokens;
use ispflow_core::InstallationStore;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::aliases::reference_field_for_key;
use crate::client::PortalClient;
use crate::corrections::CorrectionTables;
use crate::error::{PortalError, PreconditionReason};
use crate::form::{
    extract_snapshot, extract_validation_errors, map_update_key_to_field, select_names,
    select_options, FieldMapping, FormSnapshot, UpdateRequest,
};
use crate::http::PortalResponse;
use crate::options::{resolve_option, OptionCandidate, OptionDomain, Resolution};
use crate::session::PortalSession;

pub use activation::{ActivateCommand, ActivationOutcome, ActivationStep};
pub use installations::{EditInstallationCommand, InstallationOutcome};
pub use tickets::{CreateTicketCommand, TicketOutcome};

/// Result of a form POST the portal accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub status: u16,
    /// Redirect target, when the portal answered with one.
    pub location: Option<String>,
}

/// Classifies the response to a form POST.
///
/// Redirects and error-free 2xx pages are success; error-list markup is a
/// validation failure; anything else is a status error.
///
/// # Errors
///
/// [`PortalError::Validation`] or [`PortalError::Status`].
pub fn classify_submission(response: PortalResponse) -> Result<SubmitOutcome, PortalError> {
    if response.is_redirect() {
        return Ok(SubmitOutcome {
            status: response.status,
            location: response.location,
        });
    }
    if let Some(report) = extract_validation_errors(&response.body) {
        tracing::warn!(
            url = %response.url,
            messages = ?report.messages,
            missing_required = ?report.missing_required,
            "portal rejected submitted form"
        );
        return Err(PortalError::Validation {
            messages: report.messages,
            missing_required: report.missing_required,
            excerpt: response.excerpt(),
        });
    }
    if response.is_success() {
        return Ok(SubmitOutcome {
            status: response.status,
            location: None,
        });
    }
    Err(response.into_status_error())
}

/// Finds the select whose name carries one of `keys` as a token, preferring
/// names that start with `preferred_prefix`.
pub(crate) fn find_select(
    html: &str,
    preferred_prefix: &str,
    keys: &[&str],
) -> Option<(String, Vec<OptionCandidate>)> {
    let names = select_names(html);
    let matches_key = |name: &str| {
        field_tokens(name)
            .split_whitespace()
            .any(|tok| keys.contains(&tok))
    };
    let name = names
        .iter()
        .find(|n| n.starts_with(preferred_prefix) && matches_key(n))
        .or_else(|| names.iter().find(|n| matches_key(n)))?;
    let options = select_options(html, name);
    Some((name.clone(), options))
}

/// How one update key was applied to a form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedField {
    pub key: String,
    pub mapping: FieldMapping,
    /// Set when the value was a label resolved to a dropdown option.
    pub resolution: Option<Resolution>,
}

fn unresolved_reason(domain: OptionDomain) -> PreconditionReason {
    match domain {
        OptionDomain::Technician => PreconditionReason::TechnicianUnresolved,
        OptionDomain::Plan => PreconditionReason::PlanUnresolved,
        OptionDomain::Zone | OptionDomain::Router | OptionDomain::Ap | OptionDomain::Generic => {
            PreconditionReason::OptionUnresolved
        }
    }
}

/// Sets the anti-forgery field from the session when the form left it empty.
pub(crate) fn fill_csrf(fields: &mut FormSnapshot, csrf_field: &str, session: &PortalSession) {
    if let Some(token) = session.csrf_token() {
        if fields.get(csrf_field).is_none_or(str::is_empty) {
            fields.set(csrf_field, token);
        }
    }
}

/// Runs the portal workflows against one session manager and record store.
pub struct Orchestrator {
    portal: PortalClient,
    store: Arc<dyn InstallationStore>,
    corrections: Arc<CorrectionTables>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        portal: PortalClient,
        store: Arc<dyn InstallationStore>,
        corrections: Arc<CorrectionTables>,
    ) -> Self {
        Self {
            portal,
            store,
            corrections,
        }
    }

    #[must_use]
    pub fn portal(&self) -> &PortalClient {
        &self.portal
    }

    #[must_use]
    pub fn corrections(&self) -> &CorrectionTables {
        &self.corrections
    }

    /// Where a form posts to: its `action`, else the page it came from.
    pub(crate) fn form_action(&self, page_url: &str, snapshot: &FormSnapshot) -> Result<Url, PortalError> {
        match snapshot.action() {
            Some(action) => self.portal.resolve(page_url, action),
            None => self.portal.resolve(page_url, page_url),
        }
    }

    /// Maps update keys onto the form's fields and turns label values for
    /// dropdowns into option values.
    ///
    /// The returned update is keyed by real field names. Technician, plan
    /// and unrecognized dropdowns must resolve confidently; zone, router
    /// and AP fall back to the first real option.
    pub(crate) fn resolve_update(
        &self,
        html: &str,
        snapshot: &FormSnapshot,
        update: &UpdateRequest,
    ) -> Result<(UpdateRequest, Vec<AppliedField>), PortalError> {
        let known = snapshot.known_names();
        let selects = select_names(html);

        let mut resolved = UpdateRequest::new();
        let mut applied = Vec::with_capacity(update.len());
        for (key, value) in update.iter() {
            let mapping = map_update_key_to_field(key, &known);
            let field = mapping.field().to_string();
            let mut resolution = None;

            match value {
                Value::String(label) if selects.contains(&field) => {
                    let options = select_options(html, &field);
                    if options.iter().any(|o| o.value == *label) {
                        resolved.insert(&field, label.as_str());
                    } else {
                        let domain = reference_field_for_key(key)
                            .map_or_else(|| OptionDomain::infer(&field), |f| f.domain);
                        match resolve_option(&options, label, domain, &self.corrections) {
                            Some(r) if r.is_confident() || domain.allows_fallback() => {
                                tracing::info!(key = %key, field = %field, %domain, option = %r.text, kind = ?r.kind, "resolved update label");
                                resolved.insert(&field, r.value.as_str());
                                resolution = Some(r);
                            }
                            _ => {
                                return Err(PortalError::precondition(
                                    unresolved_reason(domain),
                                    format!("no {domain} option for field {field} matches '{label}'"),
                                ));
                            }
                        }
                    }
                }
                other => resolved.insert(&field, other.clone()),
            }

            applied.push(AppliedField {
                key: key.clone(),
                mapping,
                resolution,
            });
        }
        Ok((resolved, applied))
    }

    /// GETs a confirmation page and posts its form back unchanged.
    pub(crate) async fn submit_confirmation(
        &self,
        session: &PortalSession,
        path: &str,
    ) -> Result<SubmitOutcome, PortalError> {
        let page = self.portal.get_page(session, path).await?;
        let mut fields = extract_snapshot(&page.body, None)?;
        fill_csrf(&mut fields, &self.portal.config().csrf_field, session);
        let action = self.form_action(&page.url, &fields)?;
        let response = self
            .portal
            .post_form(session, &action, fields.fields(), &page.url)
            .await?;
        classify_submission(response)
    }
}

/// Bounds a whole workflow call, separately from per-request timeouts.
///
/// # Errors
///
/// [`PortalError::Timeout`] when `limit` elapses, otherwise the workflow's
/// own result.
pub async fn bounded<T, F>(limit: Duration, workflow: F) -> Result<T, PortalError>
where
    F: Future<Output = Result<T, PortalError>>,
{
    match tokio::time::timeout(limit, workflow).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(limit_secs = limit.as_secs(), "workflow timed out");
            Err(PortalError::Timeout(limit.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, location: Option<&str>, body: &str) -> PortalResponse {
        PortalResponse {
            status,
            url: "https://portal.example/form/".to_string(),
            location: location.map(str::to_owned),
            retry_after: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn redirect_is_success() {
        let outcome = classify_submission(response(302, Some("/clientes/12/"), "")).unwrap();
        assert_eq!(outcome.location.as_deref(), Some("/clientes/12/"));
    }

    #[test]
    fn plain_200_is_success() {
        assert!(classify_submission(response(200, None, "<p>Guardado</p>")).is_ok());
    }

    #[test]
    fn error_list_is_validation_failure_even_on_400() {
        let body = r#"<form><ul class="errorlist"><li>IP en uso</li></ul></form>"#;
        for status in [200, 400] {
            let err = classify_submission(response(status, None, body)).unwrap_err();
            assert!(
                matches!(err, PortalError::Validation { ref messages, .. } if messages == &["IP en uso"])
            );
        }
    }

    #[test]
    fn server_error_is_status_error() {
        let err = classify_submission(response(500, None, "boom")).unwrap_err();
        assert!(matches!(err, PortalError::Status { status: 500, .. }));
    }

    #[test]
    fn select_lookup_prefers_prefixed_names() {
        let html = r#"<form>
            <select name="perfil-tecnico"><option value="1">A</option></select>
            <select name="servicio-tecnico"><option value="2">B</option></select>
        </form>"#;
        let (name, options) = find_select(html, "servicio-", &["tecnico"]).unwrap();
        assert_eq!(name, "servicio-tecnico");
        assert_eq!(options[0].value, "2");
        let (name, _) = find_select(html, "usuario-", &["tecnico"]).unwrap();
        assert_eq!(name, "perfil-tecnico");
        assert!(find_select(html, "servicio-", &["zona"]).is_none());
    }

    fn orchestrator() -> Orchestrator {
        let config = crate::config::PortalConfig::new("https://portal.example").unwrap();
        Orchestrator::new(
            PortalClient::new(config),
            Arc::new(ispflow_core::MemoryStore::new([])),
            Arc::new(CorrectionTables::builtin().unwrap()),
        )
    }

    const EDIT_FORM: &str = r#"<form method="post">
        <input name="servicio-direccion" value="Calle 1">
        <select name="servicio-tecnico">
            <option value="">---------</option>
            <option value="7" selected>Carlos Mendoza</option>
            <option value="8">Pedro Soto</option>
        </select>
        <select name="servicio-zona">
            <option value="">---------</option>
            <option value="20">Zona Centro</option>
        </select>
        <select name="servicio-categoria"><option value="1">Falla</option></select>
    </form>"#;

    #[test]
    fn update_labels_resolve_to_option_values() {
        let orchestrator = orchestrator();
        let snapshot = extract_snapshot(EDIT_FORM, None).unwrap();
        let update = UpdateRequest::new()
            .with("tecnico", "Pedro")
            .with("servicio-zona", "zona inexistente")
            .with("direccion", "Calle 2");
        let (resolved, applied) = orchestrator.resolve_update(EDIT_FORM, &snapshot, &update).unwrap();

        assert_eq!(resolved.get("servicio-tecnico"), Some(&Value::from("8")));
        assert_eq!(resolved.get("servicio-zona"), Some(&Value::from("20")));
        assert_eq!(resolved.get("servicio-direccion"), Some(&Value::from("Calle 2")));
        let technician = applied.iter().find(|a| a.key == "tecnico").unwrap();
        assert!(matches!(technician.mapping, FieldMapping::Heuristic { .. }));
        assert_eq!(technician.resolution.as_ref().map(|r| r.text.as_str()), Some("Pedro Soto"));
    }

    #[test]
    fn option_values_pass_through_untouched() {
        let orchestrator = orchestrator();
        let snapshot = extract_snapshot(EDIT_FORM, None).unwrap();
        let update = UpdateRequest::new().with("servicio-tecnico", "7");
        let (resolved, applied) = orchestrator.resolve_update(EDIT_FORM, &snapshot, &update).unwrap();
        assert_eq!(resolved.get("servicio-tecnico"), Some(&Value::from("7")));
        assert!(applied[0].resolution.is_none());
    }

    #[test]
    fn unknown_technician_is_a_precondition_failure() {
        let orchestrator = orchestrator();
        let snapshot = extract_snapshot(EDIT_FORM, None).unwrap();
        let update = UpdateRequest::new().with("tecnico", "Zacarias Quintanilla");
        let err = orchestrator
            .resolve_update(EDIT_FORM, &snapshot, &update)
            .unwrap_err();
        assert!(matches!(
            err,
            PortalError::Precondition {
                reason: PreconditionReason::TechnicianUnresolved,
                ..
            }
        ));

        let update = UpdateRequest::new().with("servicio-categoria", "Instalacion nueva");
        let err = orchestrator
            .resolve_update(EDIT_FORM, &snapshot, &update)
            .unwrap_err();
        assert!(matches!(
            err,
            PortalError::Precondition {
                reason: PreconditionReason::OptionUnresolved,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_workflow_times_out() {
        let err = bounded(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), PortalError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PortalError::Timeout(5)));
    }
}
