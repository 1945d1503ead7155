//! Postgres persistence for installation requests.

use ispflow_core::AppConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Relative to this crate's manifest.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub mod installations;

pub use installations::{
    get_installation_request, insert_installation_request, list_pending_installation_requests,
    mark_installation_activated, set_agreed_installation_date, InstallationRequestRow,
    NewInstallationRequest, PgStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections.min(config.db_max_connections),
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }

    fn options(self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("installation request {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Opens a pool against `database_url` and waits for the first connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] when no connection can be opened.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    config.options().connect(database_url).await
}

/// Opens a pool with the `DATABASE_URL` and pool sizing from [`AppConfig`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] when no connection can be opened.
pub async fn connect_from_app_config(config: &AppConfig) -> Result<PgPool, DbError> {
    Ok(connect_pool(&config.database_url, PoolConfig::from_app_config(config)).await?)
}

/// Builds a pool that opens connections on first use.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if `DATABASE_URL` cannot be parsed.
pub fn connect_lazy_from_app_config(config: &AppConfig) -> Result<PgPool, DbError> {
    Ok(PoolConfig::from_app_config(config)
        .options()
        .connect_lazy(&config.database_url)?)
}

/// Applies the embedded migrations and returns how many were new.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] when a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    let before = applied_migrations(pool).await;
    MIGRATOR.run(pool).await?;
    let after = applied_migrations(pool).await;
    Ok(usize::try_from(after.saturating_sub(before)).unwrap_or(0))
}

// The bookkeeping table does not exist before the first run.
async fn applied_migrations(pool: &PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}

/// Round-trips `SELECT 1` on a pooled connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] when the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// [`ping`] with the crate error type, for health endpoints.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] when the database is unreachable.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    Ok(ping(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_is_small() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_secs, 10);
    }

    #[test]
    fn not_found_names_the_record() {
        assert_eq!(
            DbError::NotFound(42).to_string(),
            "installation request 42 not found"
        );
    }
}
