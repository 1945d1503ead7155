//! Database command handlers for the CLI.

use ispflow_core::{AppConfig, InstallationStore};

/// Check database connectivity.
///
/// # Errors
///
/// Returns an error if the pool cannot connect or the ping fails.
pub(crate) async fn run_ping(config: &AppConfig) -> anyhow::Result<()> {
    let pool = ispflow_db::connect_from_app_config(config).await?;
    ispflow_db::health_check(&pool).await?;
    println!("database ok");
    Ok(())
}

/// Apply pending migrations.
///
/// # Errors
///
/// Returns an error if the pool cannot connect or a migration fails.
pub(crate) async fn run_migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = ispflow_db::connect_from_app_config(config).await?;
    let applied = ispflow_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations complete");
    println!("applied {applied} migration(s)");
    Ok(())
}

/// List installation requests that still await portal activation.
///
/// # Errors
///
/// Returns an error if the store query fails.
pub(crate) async fn run_pending(config: &AppConfig) -> anyhow::Result<()> {
    let pool = ispflow_db::connect_from_app_config(config).await?;
    let store = ispflow_db::PgStore::new(pool);
    let pending = store.list_pending().await?;

    if pending.is_empty() {
        println!("no pending installation requests");
        return Ok(());
    }

    println!("{:<8}{:<32}{:<20}AGREED DATE", "ID", "CLIENT", "PLAN");
    for record in &pending {
        let date = record
            .agreed_installation_date
            .map_or_else(|| "\u{2014}".to_string(), |d| d.format("%Y-%m-%d").to_string());
        println!(
            "{:<8}{:<32}{:<20}{}",
            record.id,
            record.full_name(),
            record.plan_name.as_deref().unwrap_or("\u{2014}"),
            date
        );
    }
    Ok(())
}
