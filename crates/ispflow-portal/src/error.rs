use ispflow_core::retry::{classify_status, Classify, RetryDecision};
use ispflow_core::{ConfigError, StoreError};
use serde::Serialize;
use thiserror::Error;

/// Machine-readable reason for a precondition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionReason {
    MissingAgreedDate,
    TechnicianUnresolved,
    PlanUnresolved,
    AvailableIpMissing,
    MissingClientIdentity,
    OptionUnresolved,
}

impl std::fmt::Display for PreconditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PreconditionReason::MissingAgreedDate => "missing_agreed_date",
            PreconditionReason::TechnicianUnresolved => "technician_unresolved",
            PreconditionReason::PlanUnresolved => "plan_unresolved",
            PreconditionReason::AvailableIpMissing => "available_ip_missing",
            PreconditionReason::MissingClientIdentity => "missing_client_identity",
            PreconditionReason::OptionUnresolved => "option_unresolved",
        };
        f.write_str(s)
    }
}

/// Errors returned by the portal automation engine.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Required input is missing; never retried.
    #[error("precondition failed ({reason}): {message}")]
    Precondition {
        reason: PreconditionReason,
        message: String,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Bad credentials or a login flow the portal refused; never retried.
    #[error("portal authentication failed: {0}")]
    Auth(String),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// An authenticated request landed on the login page.
    #[error("portal session expired while requesting {url}")]
    SessionExpired { url: String },

    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status {
        status: u16,
        url: String,
        excerpt: String,
    },

    /// The portal re-rendered the form with inline errors.
    #[error("portal rejected the form: {}", .messages.join("; "))]
    Validation {
        messages: Vec<String>,
        missing_required: Vec<String>,
        excerpt: String,
    },

    #[error("no form found: {0}")]
    FormNotFound(String),

    #[error("invalid CSS selector: {0}")]
    Selector(String),

    #[error("invalid portal URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow timed out after {0}s")]
    Timeout(u64),
}

impl PortalError {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            PortalError::Precondition { .. } => "precondition_failed",
            PortalError::NotFound { .. } => "not_found",
            PortalError::Auth(_) => "authentication_failed",
            PortalError::MissingConfig(_) | PortalError::Config(_) => "configuration_error",
            PortalError::SessionExpired { .. } => "session_expired",
            PortalError::Http(_) | PortalError::Status { .. } => "transport_error",
            PortalError::Validation { .. } => "validation_error",
            PortalError::FormNotFound(_) | PortalError::Selector(_) => "unexpected_markup",
            PortalError::InvalidUrl { .. } => "invalid_url",
            PortalError::Store(_) => "store_error",
            PortalError::Io { .. } => "io_error",
            PortalError::Timeout(_) => "timeout",
        }
    }

    /// Raw response excerpt, when the error came from a portal response.
    #[must_use]
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            PortalError::Status { excerpt, .. } | PortalError::Validation { excerpt, .. } => {
                Some(excerpt.as_str())
            }
            _ => None,
        }
    }

    pub(crate) fn precondition(reason: PreconditionReason, message: impl Into<String>) -> Self {
        PortalError::Precondition {
            reason,
            message: message.into(),
        }
    }
}

impl Classify for PortalError {
    fn classify(&self) -> RetryDecision {
        match self {
            PortalError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                RetryDecision::Transient { retry_after: None }
            }
            PortalError::Status { status, .. } => classify_status(*status, None),
            _ => RetryDecision::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_terminal() {
        let err = PortalError::precondition(PreconditionReason::MissingAgreedDate, "no date");
        assert_eq!(err.classify(), RetryDecision::Done);
        assert_eq!(err.code(), "precondition_failed");
        assert!(err.to_string().contains("missing_agreed_date"));
    }

    #[test]
    fn auth_errors_are_terminal() {
        assert_eq!(
            PortalError::Auth("bad credentials".into()).classify(),
            RetryDecision::Done
        );
    }

    #[test]
    fn gateway_status_is_transient() {
        let err = PortalError::Status {
            status: 503,
            url: "https://portal.example/x".into(),
            excerpt: String::new(),
        };
        assert!(err.classify().is_retryable());
    }

    #[test]
    fn validation_message_lists_every_error() {
        let err = PortalError::Validation {
            messages: vec!["Este campo es obligatorio.".into(), "IP en uso".into()],
            missing_required: vec!["servicio-ip".into()],
            excerpt: "<ul class=\"errorlist\">".into(),
        };
        assert_eq!(
            err.to_string(),
            "portal rejected the form: Este campo es obligatorio.; IP en uso"
        );
        assert_eq!(err.excerpt(), Some("<ul class=\"errorlist\">"));
    }
}
