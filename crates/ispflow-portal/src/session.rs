//! Authenticated portal sessions with single-flight login.
//!
//! The manager owns one cached [`PortalSession`]. The cache lock is held
//! for the whole login, so concurrent callers queue behind a single login
//! and then observe its result. The cache is written only after a login
//! completes; a cancelled login leaves the previous state in place.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::REFERER;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::form::{snapshot_of, FormSnapshot};
use crate::http::{build_client, looks_like_login_page, send, PortalResponse};

/// Observable lifecycle of the cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
    Invalidated,
}

/// One authenticated cookie jar plus the token the portal issued with it.
#[derive(Debug)]
pub struct PortalSession {
    client: Client,
    csrf_token: Option<String>,
    established_at: Instant,
    generation: u64,
    seeded: bool,
}

impl PortalSession {
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Monotonic login counter; a refresh always yields a higher value.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when built from a cookie file rather than an interactive login.
    #[must_use]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<Arc<PortalSession>>,
    seed_attempted: bool,
}

/// Explicit handle over the portal login lifecycle.
pub struct SessionManager {
    config: Arc<PortalConfig>,
    slot: tokio::sync::Mutex<Slot>,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    logins: AtomicU64,
}

static PASSWORD_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input[type=password]").expect("valid selector")
});
static TEXT_INPUT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input[type=text], input[type=email], input:not([type])")
        .expect("valid selector")
});
static FORM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form").expect("valid selector"));

struct LoginForm {
    fields: FormSnapshot,
    username_field: String,
    password_field: String,
}

fn parse_login_form(html: &str) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    document.select(&FORM).find_map(|form| {
        let password_field = form
            .select(&PASSWORD_INPUT)
            .find_map(|el| el.value().attr("name"))?
            .to_string();
        let username_field = form
            .select(&TEXT_INPUT)
            .find_map(|el| el.value().attr("name"))?
            .to_string();
        Some(LoginForm {
            fields: snapshot_of(form),
            username_field,
            password_field,
        })
    })
}

fn login_succeeded(response: &PortalResponse, login_path: &str) -> bool {
    if response.is_redirect() {
        return !looks_like_login_page(response, login_path);
    }
    response.status == 200 && !looks_like_login_page(response, login_path)
}

/// Parses `name=value; name2=value2` or one `name=value` per line.
/// Netscape-format lines (seven tab-separated columns) are accepted too.
fn parse_cookie_seed(content: &str) -> Vec<(String, String)> {
    let mut cookies = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() == 7 {
            cookies.push((columns[5].to_string(), columns[6].to_string()));
            continue;
        }
        for pair in line.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    cookies.push((name.to_string(), value.trim().to_string()));
                }
            }
        }
    }
    cookies
}

impl SessionManager {
    /// Creates a manager; no network traffic happens until the first
    /// [`ensure_session`](Self::ensure_session).
    #[must_use]
    pub fn open(config: Arc<PortalConfig>) -> Self {
        Self {
            config,
            slot: tokio::sync::Mutex::new(Slot::default()),
            state: Mutex::new(SessionState::Unauthenticated),
            generation: AtomicU64::new(0),
            logins: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of interactive logins performed so far.
    #[must_use]
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Returns the cached session while it is within its TTL, otherwise
    /// logs in. `force` skips the cache.
    ///
    /// # Errors
    ///
    /// - [`PortalError::MissingConfig`] when credentials are not configured.
    /// - [`PortalError::Auth`] when the portal rejects the login.
    /// - [`PortalError::Http`] / [`PortalError::Status`] after retries.
    pub async fn ensure_session(&self, force: bool) -> Result<Arc<PortalSession>, PortalError> {
        let mut slot = self.slot.lock().await;

        if !force {
            if let Some(session) = slot.session.as_ref() {
                if session.is_fresh(self.config.session_ttl) {
                    return Ok(Arc::clone(session));
                }
                tracing::info!(generation = session.generation, "portal session reached its TTL");
                self.set_state(SessionState::Expired);
            }
            if !slot.seed_attempted {
                slot.seed_attempted = true;
                if let Some(session) = self.seed_from_cookie_file() {
                    let session = Arc::new(session);
                    slot.session = Some(Arc::clone(&session));
                    self.set_state(SessionState::Authenticated);
                    return Ok(session);
                }
            }
        }

        self.login_into(&mut slot).await
    }

    /// Replaces a session that hit the login page.
    ///
    /// If another caller already refreshed past `stale`, its session is
    /// returned without a second login.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_session`](Self::ensure_session).
    pub async fn refresh_after_expiry(
        &self,
        stale: &PortalSession,
    ) -> Result<Arc<PortalSession>, PortalError> {
        let mut slot = self.slot.lock().await;
        slot.seed_attempted = true;
        if let Some(current) = slot.session.as_ref() {
            if current.generation != stale.generation && current.is_fresh(self.config.session_ttl)
            {
                return Ok(Arc::clone(current));
            }
        }
        tracing::warn!(
            generation = stale.generation,
            seeded = stale.seeded,
            "portal session expired; logging in again"
        );
        self.set_state(SessionState::Expired);
        self.login_into(&mut slot).await
    }

    /// Drops the cached session; the next call logs in.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        slot.session = None;
        slot.seed_attempted = true;
        self.set_state(SessionState::Invalidated);
        tracing::info!("portal session invalidated");
    }

    /// Drops the cached session at shutdown.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if slot.session.take().is_some() {
            tracing::info!("portal session closed");
        }
        self.set_state(SessionState::Unauthenticated);
    }

    async fn login_into(&self, slot: &mut Slot) -> Result<Arc<PortalSession>, PortalError> {
        self.set_state(SessionState::Authenticating);
        match self.login().await {
            Ok(session) => {
                let session = Arc::new(session);
                slot.session = Some(Arc::clone(&session));
                self.set_state(SessionState::Authenticated);
                Ok(session)
            }
            Err(e) => {
                slot.session = None;
                self.set_state(SessionState::Unauthenticated);
                tracing::error!(error = %e, "portal login failed");
                Err(e)
            }
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn seed_from_cookie_file(&self) -> Option<PortalSession> {
        let path = self.config.cookie_file.as_deref()?;
        match self.build_seeded_session(path) {
            Ok(session) => {
                tracing::info!(path = %path.display(), "seeded portal session from cookie file");
                Some(session)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring cookie seed file");
                None
            }
        }
    }

    fn build_seeded_session(&self, path: &Path) -> Result<PortalSession, PortalError> {
        let content = std::fs::read_to_string(path).map_err(|e| PortalError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let cookies = parse_cookie_seed(&content);
        if cookies.is_empty() {
            return Err(PortalError::MissingConfig(format!(
                "cookie file {} holds no cookies",
                path.display()
            )));
        }
        let jar = Arc::new(Jar::default());
        for (name, value) in &cookies {
            jar.add_cookie_str(&format!("{name}={value}; Path=/"), &self.config.base_url);
        }
        Ok(PortalSession {
            client: build_client(&self.config, jar)?,
            csrf_token: None,
            established_at: Instant::now(),
            generation: self.next_generation(),
            seeded: true,
        })
    }

    async fn login(&self) -> Result<PortalSession, PortalError> {
        let (Some(username), Some(password)) = (
            self.config.username.as_deref(),
            self.config.password.as_deref(),
        ) else {
            return Err(PortalError::MissingConfig(
                "ISPFLOW_PORTAL_USERNAME and ISPFLOW_PORTAL_PASSWORD".to_string(),
            ));
        };

        self.logins.fetch_add(1, Ordering::SeqCst);
        let jar = Arc::new(Jar::default());
        let client = build_client(&self.config, jar)?;
        let login_url = self.config.url(&self.config.routes.login)?;
        tracing::info!(url = %login_url, "logging in to portal");

        let page = send(&self.config.login_retry, "portal login page", || {
            client.get(login_url.clone())
        })
        .await?
        .error_for_status()?;

        let form = parse_login_form(&page.body)
            .ok_or_else(|| PortalError::Auth("login page has no username/password form".into()))?;
        let csrf_token = form.fields.get(&self.config.csrf_field).map(str::to_owned);
        if csrf_token.is_none() {
            tracing::warn!(field = %self.config.csrf_field, "login form carries no anti-forgery token");
        }

        let mut fields = form.fields;
        fields.set(&form.username_field, username);
        fields.set(&form.password_field, password);
        let action = match fields.action() {
            Some(action) => login_url.join(action).map_err(|e| PortalError::InvalidUrl {
                url: action.to_string(),
                reason: e.to_string(),
            })?,
            None => login_url.clone(),
        };

        let response = send(&self.config.login_retry, "portal login", || {
            client
                .post(action.clone())
                .header(REFERER, login_url.as_str())
                .form(fields.fields())
        })
        .await?;

        if !login_succeeded(&response, &self.config.routes.login) {
            return Err(PortalError::Auth(format!(
                "portal rejected the credentials (status {})",
                response.status
            )));
        }

        let generation = self.next_generation();
        tracing::info!(generation, "portal login succeeded");
        Ok(PortalSession {
            client,
            csrf_token,
            established_at: Instant::now(),
            generation,
            seeded: false,
        })
    }
}
