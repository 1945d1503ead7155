use std::path::PathBuf;
use std::time::Duration;

use ispflow_core::{AppConfig, RetryPolicy};
use reqwest::Url;

use crate::error::PortalError;

/// Relative paths of the portal pages the workflows drive.
///
/// `{id}`, `{external_id}` and `{installation_id}` placeholders are filled
/// in by the accessor methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRoutes {
    pub login: String,
    pub preinstall_list: String,
    /// Substring identifying the activation link inside a pre-installation row.
    pub activation_marker: String,
    pub ticket_create: String,
    pub ticket_delete: String,
    pub installation_edit: String,
    pub installation_delete: String,
}

impl Default for PortalRoutes {
    fn default() -> Self {
        Self {
            login: "/accounts/login/".to_string(),
            preinstall_list: "/preinstalaciones/".to_string(),
            activation_marker: "/activar/".to_string(),
            ticket_create: "/tickets/agregar/".to_string(),
            ticket_delete: "/tickets/{id}/eliminar/".to_string(),
            installation_edit: "/clientes/{external_id}/instalaciones/{installation_id}/editar/"
                .to_string(),
            installation_delete: "/clientes/{external_id}/eliminar/".to_string(),
        }
    }
}

impl PortalRoutes {
    #[must_use]
    pub fn ticket_delete(&self, ticket_id: &str) -> String {
        self.ticket_delete.replace("{id}", ticket_id)
    }

    #[must_use]
    pub fn installation_edit(&self, external_id: &str, installation_id: &str) -> String {
        self.installation_edit
            .replace("{external_id}", external_id)
            .replace("{installation_id}", installation_id)
    }

    #[must_use]
    pub fn installation_delete(&self, external_id: &str) -> String {
        self.installation_delete.replace("{external_id}", external_id)
    }
}

/// Name prefixes the portal puts on the three groups of activation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPrefixes {
    pub user: String,
    pub profile: String,
    pub service: String,
}

impl Default for FieldPrefixes {
    fn default() -> Self {
        Self {
            user: "usuario-".to_string(),
            profile: "perfil-".to_string(),
            service: "servicio-".to_string(),
        }
    }
}

/// Everything the portal layer needs; built from [`AppConfig`] in binaries
/// and directly in tests.
#[derive(Clone)]
pub struct PortalConfig {
    pub base_url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub session_ttl: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
    pub login_retry: RetryPolicy,
    pub csrf_field: String,
    pub external_id_prefix: String,
    pub routes: PortalRoutes,
    pub prefixes: FieldPrefixes,
}

impl std::fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("cookie_file", &self.cookie_file)
            .field("session_ttl", &self.session_ttl)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("login_retry", &self.login_retry)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

impl PortalConfig {
    /// Defaults for everything except the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(base_url: &str) -> Result<Self, PortalError> {
        let base_url = Url::parse(base_url).map_err(|e| PortalError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            base_url,
            username: None,
            password: None,
            cookie_file: None,
            session_ttl: Duration::from_secs(1800),
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryPolicy::standard(),
            login_retry: RetryPolicy::login(),
            csrf_field: "csrfmiddlewaretoken".to_string(),
            external_id_prefix: "INST-".to_string(),
            routes: PortalRoutes::default(),
            prefixes: FieldPrefixes::default(),
        })
    }

    /// Builds the portal configuration from the process-wide settings.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::MissingConfig`] when no portal base URL is set.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, PortalError> {
        let base = config
            .portal_base_url
            .as_deref()
            .ok_or_else(|| PortalError::MissingConfig("ISPFLOW_PORTAL_BASE_URL".to_string()))?;
        let base_delay = Duration::from_millis(config.retry_base_ms);
        let mut portal = Self::new(base)?;
        portal.username.clone_from(&config.portal_username);
        portal.password.clone_from(&config.portal_password);
        portal.cookie_file.clone_from(&config.portal_cookie_file);
        portal.session_ttl = Duration::from_secs(config.session_ttl_secs);
        portal.request_timeout = Duration::from_secs(config.request_timeout_secs);
        portal.user_agent.clone_from(&config.user_agent);
        portal.retry = RetryPolicy::standard()
            .with_attempts(config.max_attempts)
            .with_base_delay(base_delay);
        portal.login_retry = RetryPolicy::login()
            .with_attempts(config.login_max_attempts)
            .with_base_delay(base_delay);
        portal.external_id_prefix.clone_from(&config.external_id_prefix);
        Ok(portal)
    }

    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.login_retry = retry.with_attempts(RetryPolicy::LOGIN_ATTEMPTS);
        self
    }

    #[must_use]
    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Resolves a route or href against the portal base URL.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] if the joined URL is invalid.
    pub fn url(&self, path: &str) -> Result<Url, PortalError> {
        self.base_url
            .join(path)
            .map_err(|e| PortalError::InvalidUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// External identifier the portal assigns to an activated record.
    #[must_use]
    pub fn external_id_for(&self, record_id: i64) -> String {
        format!("{}{record_id}", self.external_id_prefix)
    }
}
