//! Portal workflow command handlers.
//!
//! Each handler builds a fresh orchestrator, runs one workflow bounded by
//! the configured workflow timeout, prints the outcome as JSON and closes
//! the portal session.

use std::sync::Arc;
use std::time::Duration;

use ispflow_core::AppConfig;
use ispflow_portal::{
    bounded, ActivateCommand, CorrectionTables, CreateTicketCommand, EditInstallationCommand,
    Orchestrator, PortalClient, PortalConfig, PortalError, UpdateRequest,
};
use serde_json::Value;

use crate::{print_json, ActivateArgs, CreateTicketArgs};

impl From<ActivateArgs> for ActivateCommand {
    fn from(args: ActivateArgs) -> Self {
        Self {
            record_id: args.record_id,
            client_name: args.client,
            technician: args.technician,
            plan_override: args.plan,
            zone_hint: args.zone,
            router_hint: args.router,
            ap_hint: args.ap,
            agreed_installation_date: args.date,
        }
    }
}

impl From<CreateTicketArgs> for CreateTicketCommand {
    fn from(args: CreateTicketArgs) -> Self {
        Self {
            category_id: args.category,
            start_time: args.start,
            end_time: args.end,
            technician: args.technician,
            subject: args.subject,
            description: args.description,
            priority: args.priority,
            attachment_path: args.attachment,
            remove_attachment_after: args.remove_attachment,
        }
    }
}

pub(crate) fn update_from_assignments(set: Vec<(String, Value)>) -> UpdateRequest {
    set.into_iter()
        .fold(UpdateRequest::new(), |update, (key, value)| update.with(&key, value))
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let portal = PortalClient::new(PortalConfig::from_app_config(config)?);
    let corrections = CorrectionTables::load(config.corrections_path.as_deref())?;
    let pool = ispflow_db::connect_lazy_from_app_config(config)?;
    let store = Arc::new(ispflow_db::PgStore::new(pool));
    Ok(Orchestrator::new(portal, store, Arc::new(corrections)))
}

/// Logs the failure with its machine-readable code and wraps it for `main`.
fn failure(label: &str, error: PortalError) -> anyhow::Error {
    let code = error.code();
    tracing::error!(label, code, error = %error, "portal workflow failed");
    if let Some(excerpt) = error.excerpt() {
        tracing::debug!(label, excerpt, "portal response excerpt");
    }
    anyhow::Error::new(error).context(format!("{label} failed [{code}]"))
}

/// Runs `workflow` under the workflow timeout, then closes the session
/// whatever the outcome.
async fn run_workflow<T, F, Fut>(config: &AppConfig, label: &str, workflow: F) -> anyhow::Result<T>
where
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: std::future::Future<Output = Result<T, PortalError>>,
{
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let limit = Duration::from_secs(config.workflow_timeout_secs);
    let result = bounded(limit, workflow(Arc::clone(&orchestrator))).await;
    orchestrator.portal().sessions().close().await;
    result.map_err(|e| failure(label, e))
}

/// Activate a pending installation request.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the workflow fails.
pub(crate) async fn run_activate(config: &AppConfig, args: ActivateArgs) -> anyhow::Result<()> {
    let command = ActivateCommand::from(args);
    let outcome = run_workflow(config, "activate", |o| async move {
        o.activate(&command).await
    })
    .await?;

    if !outcome.local_record_updated {
        eprintln!(
            "warning: portal activation succeeded but local record {} was not updated",
            outcome.record_id
        );
    }
    print_json(&outcome)
}

/// Create a portal ticket.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the workflow fails.
pub(crate) async fn run_create_ticket(
    config: &AppConfig,
    args: CreateTicketArgs,
) -> anyhow::Result<()> {
    let command = CreateTicketCommand::from(args);
    let outcome = run_workflow(config, "create-ticket", |o| async move {
        o.create_ticket(&command).await
    })
    .await?;
    print_json(&outcome)
}

/// Delete a portal ticket.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the workflow fails.
pub(crate) async fn run_delete_ticket(config: &AppConfig, ticket_id: &str) -> anyhow::Result<()> {
    let outcome = run_workflow(config, "delete-ticket", |o| async move {
        o.delete_ticket(ticket_id).await
    })
    .await?;
    print_json(&outcome)
}

/// Apply a partial update to an installation's edit form.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the workflow fails.
pub(crate) async fn run_edit_installation(
    config: &AppConfig,
    external_id: String,
    installation_id: String,
    set: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let command = EditInstallationCommand {
        external_id,
        installation_id,
        fields: update_from_assignments(set),
    };
    let outcome = run_workflow(config, "edit-installation", |o| async move {
        o.edit_installation(&command).await
    })
    .await?;
    print_json(&outcome)
}

/// Delete an installation from the portal.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the workflow fails.
pub(crate) async fn run_delete_installation(
    config: &AppConfig,
    external_id: &str,
) -> anyhow::Result<()> {
    let outcome = run_workflow(config, "delete-installation", |o| async move {
        o.delete_installation(external_id).await
    })
    .await?;
    print_json(&outcome)
}

/// Force a fresh login and print the resulting session state.
///
/// # Errors
///
/// Returns an error if credentials are missing or the portal rejects them.
pub(crate) async fn run_check_login(config: &AppConfig) -> anyhow::Result<()> {
    let (generation, seeded) = run_workflow(config, "check-login", |o| async move {
        let session = o.portal().sessions().ensure_session(true).await?;
        Ok((session.generation(), session.is_seeded()))
    })
    .await?;
    println!("portal login ok (session generation {generation}, seeded: {seeded})");
    Ok(())
}
