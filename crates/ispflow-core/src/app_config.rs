use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub portal_base_url: Option<String>,
    pub portal_username: Option<String>,
    pub portal_password: Option<String>,
    pub portal_cookie_file: Option<PathBuf>,
    pub session_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub workflow_timeout_secs: u64,
    pub max_attempts: u32,
    pub login_max_attempts: u32,
    pub retry_base_ms: u64,
    pub user_agent: String,
    pub corrections_path: Option<PathBuf>,
    pub external_id_prefix: String,
    pub tickets_base_url: Option<String>,
    pub tickets_api_key: Option<String>,
    /// Bearer tokens accepted by the HTTP control surface.
    pub api_keys: Vec<String>,
    pub keepalive_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("portal_base_url", &self.portal_base_url)
            .field("portal_username", &self.portal_username)
            .field(
                "portal_password",
                &self.portal_password.as_ref().map(|_| "[redacted]"),
            )
            .field("portal_cookie_file", &self.portal_cookie_file)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("workflow_timeout_secs", &self.workflow_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("login_max_attempts", &self.login_max_attempts)
            .field("retry_base_ms", &self.retry_base_ms)
            .field("user_agent", &self.user_agent)
            .field("corrections_path", &self.corrections_path)
            .field("external_id_prefix", &self.external_id_prefix)
            .field("tickets_base_url", &self.tickets_base_url)
            .field(
                "tickets_api_key",
                &self.tickets_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .field("keepalive_cron", &self.keepalive_cron)
            .finish()
    }
}
