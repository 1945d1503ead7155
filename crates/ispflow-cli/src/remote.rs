//! Remote ticketing API command handlers.

use ispflow_core::AppConfig;
use ispflow_tickets::TicketClient;
use serde_json::{Map, Value};

use crate::print_json;

fn client(config: &AppConfig) -> anyhow::Result<TicketClient> {
    Ok(TicketClient::from_app_config(config)?)
}

/// Update fields of a remote ticket, falling back to a full replace when
/// the API ignores the partial update.
///
/// # Errors
///
/// Returns an error if the ticketing API is not configured or the update fails.
pub(crate) async fn run_edit_ticket(
    config: &AppConfig,
    ticket_id: &str,
    set: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let fields: Map<String, Value> = set.into_iter().collect();
    let update = client(config)?.update_ticket(ticket_id, &fields).await?;
    if !update.ignored_by_patch.is_empty() {
        tracing::info!(
            ticket_id,
            ignored = ?update.ignored_by_patch,
            "partial update was ignored; applied with a full replace"
        );
    }
    print_json(&update)
}

/// Search remote tickets by client name.
///
/// # Errors
///
/// Returns an error if the ticketing API is not configured or the search fails.
pub(crate) async fn run_search(config: &AppConfig, client_name: &str) -> anyhow::Result<()> {
    let tickets = client(config)?.search_tickets_by_client(client_name).await?;
    if tickets.is_empty() {
        eprintln!("no tickets found for '{client_name}'");
    }
    print_json(&tickets)
}

/// List remote staff members.
///
/// # Errors
///
/// Returns an error if the ticketing API is not configured or a page fails.
pub(crate) async fn run_staff(config: &AppConfig) -> anyhow::Result<()> {
    let staff = client(config)?.list_staff().await?;
    print_json(&staff)
}
