use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files; useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Portal and ticketing credentials are optional here; the components that
/// need them report a missing-configuration error at first use instead of
/// blocking unrelated commands at startup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    // Blank values count as unset so `.env` templates with `KEY=` lines work.
    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("ISPFLOW_ENV", "development"));
    let bind_addr = parse_addr("ISPFLOW_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("ISPFLOW_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("ISPFLOW_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("ISPFLOW_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("ISPFLOW_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let portal_base_url = optional("ISPFLOW_PORTAL_BASE_URL");
    let portal_username = optional("ISPFLOW_PORTAL_USERNAME");
    let portal_password = optional("ISPFLOW_PORTAL_PASSWORD");
    let portal_cookie_file = optional("ISPFLOW_PORTAL_COOKIE_FILE").map(PathBuf::from);

    let session_ttl_secs = parse_u64("ISPFLOW_SESSION_TTL_SECS", "1800")?;
    if !(1500..=2700).contains(&session_ttl_secs) {
        return Err(ConfigError::InvalidEnvVar {
            var: "ISPFLOW_SESSION_TTL_SECS".to_string(),
            reason: format!("must be between 1500 and 2700 seconds, got {session_ttl_secs}"),
        });
    }

    let request_timeout_secs = parse_u64("ISPFLOW_REQUEST_TIMEOUT_SECS", "30")?;
    let workflow_timeout_secs = parse_u64("ISPFLOW_WORKFLOW_TIMEOUT_SECS", "180")?;
    let max_attempts = parse_u32("ISPFLOW_MAX_RETRIES", "3")?;
    let login_max_attempts = parse_u32("ISPFLOW_LOGIN_MAX_RETRIES", "6")?;
    let retry_base_ms = parse_u64("ISPFLOW_RETRY_BASE_MS", "1000")?;
    if max_attempts == 0 || login_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "retry attempt ceilings must be at least 1".to_string(),
        ));
    }

    let user_agent = or_default(
        "ISPFLOW_USER_AGENT",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    );
    let corrections_path = optional("ISPFLOW_CORRECTIONS_PATH").map(PathBuf::from);
    let external_id_prefix = or_default("ISPFLOW_EXTERNAL_ID_PREFIX", "INST-");

    let tickets_base_url = optional("ISPFLOW_TICKETS_BASE_URL");
    let tickets_api_key = optional("ISPFLOW_TICKETS_API_KEY");
    let keepalive_cron = or_default("ISPFLOW_KEEPALIVE_CRON", "0 */20 * * * *");
    let api_keys = optional("ISPFLOW_API_KEYS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        portal_base_url,
        portal_username,
        portal_password,
        portal_cookie_file,
        session_ttl_secs,
        request_timeout_secs,
        workflow_timeout_secs,
        max_attempts,
        login_max_attempts,
        retry_base_ms,
        user_agent,
        corrections_path,
        external_id_prefix,
        tickets_base_url,
        tickets_api_key,
        api_keys,
        keepalive_cron,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
