mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use ispflow_portal::{CorrectionTables, Orchestrator, PortalClient, PortalConfig};
use ispflow_tickets::{TicketClient, TicketError};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(ispflow_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool = ispflow_db::connect_from_app_config(&config).await?;
    let applied = ispflow_db::run_migrations(&pool).await?;
    tracing::info!(applied, "database ready");

    let portal = PortalClient::new(PortalConfig::from_app_config(&config)?);
    let corrections = CorrectionTables::load(config.corrections_path.as_deref())?;
    let store = Arc::new(ispflow_db::PgStore::new(pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(portal, store, Arc::new(corrections)));

    let tickets = match TicketClient::from_app_config(&config) {
        Ok(client) => Some(Arc::new(client)),
        Err(TicketError::MissingConfig(var)) => {
            tracing::warn!(var = %var, "ticketing API not configured; remote ticket routes disabled");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let _scheduler =
        scheduler::build_scheduler(Arc::clone(&orchestrator), &config.keepalive_cron).await?;

    let auth = AuthState::from_keys(
        &config.api_keys,
        matches!(config.env, ispflow_core::Environment::Development),
    )?;
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        tickets,
        pool: Some(pool),
        workflow_timeout: Duration::from_secs(config.workflow_timeout_secs),
    };
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "ispflow-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.portal().sessions().close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
