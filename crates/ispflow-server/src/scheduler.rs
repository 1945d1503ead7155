//! Background job scheduler.
//!
//! Keeps the portal session warm so inbound workflows rarely pay for a
//! login. The job only refreshes a session that has aged past its TTL.

use std::sync::Arc;

use ispflow_portal::Orchestrator;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    orchestrator: Arc<Orchestrator>,
    keepalive_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    if orchestrator.portal().config().username.is_some() {
        register_keepalive_job(&scheduler, orchestrator, keepalive_cron).await?;
    } else {
        tracing::warn!("scheduler: portal credentials not configured; session keep-alive disabled");
    }

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_keepalive_job(
    scheduler: &JobScheduler,
    orchestrator: Arc<Orchestrator>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let orchestrator = Arc::clone(&orchestrator);
        Box::pin(async move {
            keep_session_alive(&orchestrator).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: registered portal session keep-alive");
    Ok(())
}

async fn keep_session_alive(orchestrator: &Orchestrator) {
    let sessions = orchestrator.portal().sessions();
    match sessions.ensure_session(false).await {
        Ok(session) => tracing::debug!(
            generation = session.generation(),
            age_secs = session.age().as_secs(),
            "scheduler: portal session alive"
        ),
        Err(e) => tracing::warn!(
            code = e.code(),
            error = %e,
            "scheduler: portal session keep-alive failed"
        ),
    }
}
