use ispflow_core::retry::{classify_status, Classify, RetryDecision};
use thiserror::Error;

/// Errors returned by the remote ticketing API client.
#[derive(Debug, Error)]
pub enum TicketError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response after retries.
    #[error("ticketing API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid ticketing API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

impl TicketError {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TicketError::Http(_) | TicketError::Status { .. } => "transport_error",
            TicketError::Deserialize { .. } => "unexpected_response",
            TicketError::InvalidUrl { .. } => "invalid_url",
            TicketError::MissingConfig(_) => "configuration_error",
        }
    }

    /// HTTP status of a rejected request, if that is what this error is.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            TicketError::Status { status, .. } => Some(*status),
            TicketError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl Classify for TicketError {
    fn classify(&self) -> RetryDecision {
        match self {
            TicketError::Http(e) if e.is_timeout() || e.is_connect() => {
                RetryDecision::Transient { retry_after: None }
            }
            TicketError::Status { status, .. } => classify_status(*status, None),
            _ => RetryDecision::Done,
        }
    }
}
