//! Buffered portal responses and the retrying send helper.
//!
//! Redirects are never followed by the HTTP client: the `Location` of a
//! form submission is part of its outcome, and a redirect to the login page
//! is how an expired session shows itself.

use std::sync::Arc;
use std::time::Duration;

use ispflow_core::retry::{self, classify_status, parse_retry_after, Classify, RetryDecision};
use ispflow_core::RetryPolicy;
use reqwest::cookie::Jar;
use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::{redirect, Client, RequestBuilder};

use crate::config::PortalConfig;
use crate::error::PortalError;

const EXCERPT_CHARS: usize = 500;
const PASSWORD_MARKER: &str = "type=\"password\"";

/// A fully read response.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub url: String,
    pub location: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl PortalResponse {
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Leading part of the body, for error reports.
    #[must_use]
    pub fn excerpt(&self) -> String {
        self.body.chars().take(EXCERPT_CHARS).collect()
    }

    /// Converts 4xx/5xx responses into [`PortalError::Status`].
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Status`] for any status outside 2xx/3xx.
    pub fn error_for_status(self) -> Result<Self, PortalError> {
        if self.is_success() || self.is_redirect() {
            Ok(self)
        } else {
            Err(self.into_status_error())
        }
    }

    #[must_use]
    pub fn into_status_error(self) -> PortalError {
        PortalError::Status {
            status: self.status,
            excerpt: self.excerpt(),
            url: self.url,
        }
    }
}

impl Classify for PortalResponse {
    fn classify(&self) -> RetryDecision {
        classify_status(self.status, self.retry_after)
    }
}

/// Reads status, `Location`, `Retry-After` and the full body.
///
/// # Errors
///
/// Returns [`PortalError::Http`] if the body cannot be read.
pub async fn buffer(response: reqwest::Response) -> Result<PortalResponse, PortalError> {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let headers = response.headers();
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let retry_after = parse_retry_after(headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()));
    let body = response.text().await?;
    Ok(PortalResponse {
        status,
        url,
        location,
        retry_after,
        body,
    })
}

/// Sends the request produced by `build` under `policy`.
///
/// `build` is called once per attempt so multipart bodies can be rebuilt.
/// A response that is still rate-limited or gateway-failing after the last
/// attempt becomes [`PortalError::Status`]; every other status is returned
/// for the caller to interpret.
///
/// # Errors
///
/// Returns [`PortalError::Http`] on network failure after retries, or
/// [`PortalError::Status`] as described above.
pub async fn send<F>(policy: &RetryPolicy, label: &str, build: F) -> Result<PortalResponse, PortalError>
where
    F: Fn() -> RequestBuilder,
{
    let response = retry::execute(policy, label, || {
        let request = build();
        async move {
            let response = request.send().await?;
            buffer(response).await
        }
    })
    .await?;

    if response.classify().is_retryable() {
        return Err(response.into_status_error());
    }
    Ok(response)
}

/// Builds a client bound to `jar` with redirects disabled.
///
/// # Errors
///
/// Returns [`PortalError::Http`] if the TLS backend cannot be initialised.
pub fn build_client(config: &PortalConfig, jar: Arc<Jar>) -> Result<Client, PortalError> {
    let client = Client::builder()
        .cookie_provider(jar)
        .redirect(redirect::Policy::none())
        .timeout(config.request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}

/// Heuristic for "this authenticated request landed on the login page".
///
/// True for a redirect whose target contains `login_path`, or a 200 whose
/// body references the login URL and carries a password input.
#[must_use]
pub fn looks_like_login_page(response: &PortalResponse, login_path: &str) -> bool {
    if response.is_redirect() {
        return response
            .location
            .as_deref()
            .is_some_and(|loc| loc.contains(login_path));
    }
    response.status == 200
        && response.body.contains(login_path)
        && response.body.contains(PASSWORD_MARKER)
}
