//! Bounded retry with exponential back-off and rate-limit-aware waiting.
//!
//! [`execute`] wraps one outbound call. Retry decisions come from the
//! [`Classify`] trait, which is implemented for *both* the success type and
//! the error type of the call: some HTTP stacks raise on a 503 and others
//! hand back a response whose status happens to be 503, and both must be
//! retried the same way.
//!
//! | Outcome                         | Wait before next attempt                         |
//! |---------------------------------|--------------------------------------------------|
//! | 429                             | `max(rate_limit_floor, Retry-After)`             |
//! | 502 / 503 / 504 / network error | `base × 2^(attempt-1)` (+≤25 % jitter), floored by `Retry-After` |
//! | anything else                   | returned immediately                             |
//!
//! When the attempt ceiling is reached the last outcome is returned as-is:
//! the last `Err`, or the last retryable `Ok` value for the caller to turn
//! into an annotated error.

use std::future::Future;
use std::time::Duration;

/// Attempt ceiling and timing for one class of outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Minimum wait after a 429, regardless of `Retry-After`.
    pub rate_limit_floor: Duration,
    /// Cap for the exponential branch.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const LOGIN_ATTEMPTS: u32 = 6;

    /// Policy for ordinary page fetches and form posts.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_attempts: Self::DEFAULT_ATTEMPTS,
            base_delay: Duration::from_millis(1_000),
            rate_limit_floor: Duration::from_secs(15),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Policy for login calls: rarer and more critical, so more patient.
    #[must_use]
    pub const fn login() -> Self {
        Self {
            max_attempts: Self::LOGIN_ATTEMPTS,
            ..Self::standard()
        }
    }

    #[must_use]
    pub const fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub const fn with_rate_limit_floor(mut self, floor: Duration) -> Self {
        self.rate_limit_floor = floor;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// What the executor should do with one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Final: success, or a terminal failure.
    Done,
    /// HTTP 429.
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 502/503/504 or a network-level failure.
    Transient { retry_after: Option<Duration> },
}

impl RetryDecision {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryDecision::Done)
    }
}

/// Classifies a call outcome for [`execute`].
pub trait Classify {
    fn classify(&self) -> RetryDecision;
}

/// Maps an HTTP status code onto a [`RetryDecision`].
#[must_use]
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> RetryDecision {
    match status {
        429 => RetryDecision::RateLimited { retry_after },
        502..=504 => RetryDecision::Transient { retry_after },
        _ => RetryDecision::Done,
    }
}

/// Parses a `Retry-After` header given in seconds. HTTP-date values are
/// ignored.
#[must_use]
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Wait before attempt `attempt + 1`, where `attempt` is 1-based.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, decision: RetryDecision) -> Duration {
    match decision {
        RetryDecision::Done => Duration::ZERO,
        RetryDecision::RateLimited { retry_after } => {
            policy.rate_limit_floor.max(retry_after.unwrap_or_default())
        }
        RetryDecision::Transient { retry_after } => {
            let exponent = attempt.saturating_sub(1).min(16);
            let computed = policy
                .base_delay
                .saturating_mul(1u32 << exponent)
                .min(policy.max_delay);
            let jittered = computed.mul_f64(1.0 + rand::random::<f64>() * 0.25);
            jittered.max(retry_after.unwrap_or_default())
        }
    }
}

/// Runs `operation` until it produces a non-retryable outcome or the
/// policy's attempt ceiling is reached.
///
/// # Errors
///
/// Returns the operation's own error: immediately when it classifies as
/// [`RetryDecision::Done`], or the last one after exhausting attempts.
pub async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    T: Classify,
    E: Classify + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        let outcome = operation().await;
        let decision = match &outcome {
            Ok(value) => value.classify(),
            Err(err) => err.classify(),
        };

        if !decision.is_retryable() {
            return outcome;
        }
        if attempt >= max_attempts {
            tracing::warn!(
                label,
                attempts = attempt,
                decision = ?decision,
                "retry budget exhausted"
            );
            return outcome;
        }

        let delay = backoff_delay(policy, attempt, decision);
        let error = outcome.as_ref().err().map(ToString::to_string);
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        tracing::warn!(
            label,
            attempt,
            max_attempts,
            delay_ms,
            decision = ?decision,
            error = error.as_deref().unwrap_or("retryable status"),
            "transient failure; retrying after back-off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
