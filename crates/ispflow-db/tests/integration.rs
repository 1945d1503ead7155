//! Offline tests for ispflow-db pool configuration.
//! These tests do not require a live database connection.

use ispflow_core::{AppConfig, Environment};
use ispflow_db::PoolConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn app_config(max: u32, min: u32, acquire: u64) -> AppConfig {
    AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        db_max_connections: max,
        db_min_connections: min,
        db_acquire_timeout_secs: acquire,
        portal_base_url: None,
        portal_username: None,
        portal_password: None,
        portal_cookie_file: None,
        session_ttl_secs: 1800,
        request_timeout_secs: 30,
        workflow_timeout_secs: 180,
        max_attempts: 3,
        login_max_attempts: 6,
        retry_base_ms: 1000,
        user_agent: "ua".to_string(),
        corrections_path: None,
        external_id_prefix: "INST-".to_string(),
        tickets_base_url: None,
        tickets_api_key: None,
        api_keys: Vec::new(),
        keepalive_cron: "0 */20 * * * *".to_string(),
    }
}

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let pool_config = PoolConfig::from_app_config(&app_config(42, 7, 9));
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn pool_config_caps_min_connections_at_max() {
    let pool_config = PoolConfig::from_app_config(&app_config(2, 5, 10));
    assert_eq!(pool_config.max_connections, 2);
    assert_eq!(pool_config.min_connections, 2);
}
