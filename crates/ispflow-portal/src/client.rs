//! Authenticated page fetches and form submissions.

use std::future::Future;
use std::sync::Arc;

use reqwest::header::REFERER;
use reqwest::multipart::{Form, Part};
use reqwest::Url;

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::http::{looks_like_login_page, send, PortalResponse};
use crate::session::{PortalSession, SessionManager};

const MAX_REDIRECTS: usize = 5;

/// A file to upload with a multipart submission.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Portal HTTP surface shared by every workflow.
pub struct PortalClient {
    config: Arc<PortalConfig>,
    sessions: SessionManager,
}

impl PortalClient {
    #[must_use]
    pub fn new(config: PortalConfig) -> Self {
        let config = Arc::new(config);
        Self {
            sessions: SessionManager::open(Arc::clone(&config)),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Resolves an href found on `page` against that page's URL.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] if either URL is malformed.
    pub fn resolve(&self, page: &str, href: &str) -> Result<Url, PortalError> {
        let base = Url::parse(page).map_err(|e| PortalError::InvalidUrl {
            url: page.to_string(),
            reason: e.to_string(),
        })?;
        base.join(href).map_err(|e| PortalError::InvalidUrl {
            url: href.to_string(),
            reason: e.to_string(),
        })
    }

    fn check_session(&self, response: &PortalResponse) -> Result<(), PortalError> {
        if looks_like_login_page(response, &self.config.routes.login) {
            return Err(PortalError::SessionExpired {
                url: response.url.clone(),
            });
        }
        Ok(())
    }

    /// GETs a page, following redirects by hand.
    ///
    /// # Errors
    ///
    /// - [`PortalError::SessionExpired`] if any hop lands on the login page.
    /// - [`PortalError::Status`] for 4xx/5xx or too many redirects.
    /// - [`PortalError::Http`] on network failure after retries.
    pub async fn get_page(
        &self,
        session: &PortalSession,
        path: &str,
    ) -> Result<PortalResponse, PortalError> {
        let mut url = self.config.url(path)?;
        let mut hops = 0;
        loop {
            let response = send(&self.config.retry, "portal page", || {
                session.client().get(url.clone())
            })
            .await?;
            self.check_session(&response)?;

            let location = match response.location.as_deref() {
                Some(location) if response.is_redirect() => location.to_string(),
                _ => return response.error_for_status(),
            };
            if hops == MAX_REDIRECTS {
                return Err(response.into_status_error());
            }
            hops += 1;
            tracing::debug!(from = %url, to = %location, "following portal redirect");
            url = self.resolve(&response.url, &location)?;
        }
    }

    /// POSTs url-encoded fields. The response is returned unfollowed.
    ///
    /// # Errors
    ///
    /// - [`PortalError::SessionExpired`] if the response is the login page.
    /// - [`PortalError::Http`] / [`PortalError::Status`] after retries.
    pub async fn post_form(
        &self,
        session: &PortalSession,
        url: &Url,
        fields: &[(String, String)],
        referer: &str,
    ) -> Result<PortalResponse, PortalError> {
        tracing::info!(url = %url, fields = fields.len(), "submitting portal form");
        let response = send(&self.config.retry, "portal form", || {
            session
                .client()
                .post(url.clone())
                .header(REFERER, referer)
                .form(fields)
        })
        .await?;
        self.check_session(&response)?;
        Ok(response)
    }

    /// POSTs fields plus an optional file as `multipart/form-data`.
    ///
    /// # Errors
    ///
    /// Same as [`post_form`](Self::post_form).
    pub async fn post_multipart(
        &self,
        session: &PortalSession,
        url: &Url,
        fields: &[(String, String)],
        attachment: Option<&Attachment>,
        referer: &str,
    ) -> Result<PortalResponse, PortalError> {
        tracing::info!(
            url = %url,
            fields = fields.len(),
            attachment = attachment.map(|a| a.file_name.as_str()),
            "submitting portal multipart form"
        );
        let response = send(&self.config.retry, "portal multipart form", || {
            let mut form = Form::new();
            for (name, value) in fields {
                form = form.text(name.clone(), value.clone());
            }
            if let Some(file) = attachment {
                form = form.part(
                    file.field.clone(),
                    Part::bytes(file.bytes.clone()).file_name(file.file_name.clone()),
                );
            }
            session
                .client()
                .post(url.clone())
                .header(REFERER, referer)
                .multipart(form)
        })
        .await?;
        self.check_session(&response)?;
        Ok(response)
    }

    /// Runs `step` with a live session; on expiry, refreshes once and runs
    /// it again. A second expiry is returned as-is.
    ///
    /// # Errors
    ///
    /// Whatever `step` or the session manager return.
    pub async fn with_session_retry<T, F, Fut>(&self, label: &str, mut step: F) -> Result<T, PortalError>
    where
        F: FnMut(Arc<PortalSession>) -> Fut,
        Fut: Future<Output = Result<T, PortalError>>,
    {
        let session = self.sessions.ensure_session(false).await?;
        match step(Arc::clone(&session)).await {
            Err(PortalError::SessionExpired { url }) => {
                tracing::warn!(label, url = %url, "session expired mid-step; re-authenticating once");
                let fresh = self.sessions.refresh_after_expiry(&session).await?;
                step(fresh).await
            }
            other => other,
        }
    }
}
