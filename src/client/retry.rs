//! Retry decisions for remote API requests.
//!
//! The remote API publishes a shared error budget, so retries are deliberately
//! conservative:
//! - transport failures (network, timeout) retry immediately
//! - any response in `100..=499` ends the loop, including 4xx rejections
//! - 5xx responses retry only when the request opts in
//!
//! Every attempt still passes through the error-budget throttle, which is the
//! only wait between attempts.

use tracing::{debug, instrument};

use super::FetchError;
use super::constants::DEFAULT_MAX_ATTEMPTS;

/// Classification of one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Network error or timeout; the request never produced a status.
    Transport,

    /// The remote API answered with a 5xx status.
    ServerError,

    /// Anything that must not be retried (4xx, decode, invalid request, cancel).
    Permanent,
}

/// Decision on whether to issue another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry immediately as attempt `attempt`.
    Retry {
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Stop and surface the last outcome.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt limits for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_on_server_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_on_server_error: false,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, retry_on_server_error: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_on_server_error,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after attempt `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::ServerError if !self.retry_on_server_error => {
                return RetryDecision::DoNotRetry {
                    reason: "server error retries disabled for this request".to_string(),
                };
            }
            FailureType::Transport | FailureType::ServerError => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        debug!(attempt, next_attempt = attempt + 1, "will retry");
        RetryDecision::Retry {
            attempt: attempt + 1,
        }
    }
}

/// Classifies a fetch error for retry decisions.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Transport { .. } | FetchError::Timeout { .. } => FailureType::Transport,
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::Decode { .. }
        | FetchError::InvalidRequest { .. }
        | FetchError::Cancelled
        | FetchError::Token { .. }
        | FetchError::Store(_) => FailureType::Permanent,
    }
}

/// Classifies a response status. Only 5xx is ever retryable.
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    if (500..600).contains(&status) {
        FailureType::ServerError
    } else {
        FailureType::Permanent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.retry_on_server_error);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::new(0, false).max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_transport_retries_until_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.should_retry(FailureType::Transport, 1),
            RetryDecision::Retry { attempt: 2 }
        );
        assert_eq!(
            policy.should_retry(FailureType::Transport, 2),
            RetryDecision::Retry { attempt: 3 }
        );
        assert!(matches!(
            policy.should_retry(FailureType::Transport, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_retry_policy_server_error_requires_opt_in() {
        let strict = RetryPolicy::new(3, false);
        let lenient = RetryPolicy::new(3, true);

        assert!(matches!(
            strict.should_retry(FailureType::ServerError, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert_eq!(
            lenient.should_retry(FailureType::ServerError, 1),
            RetryDecision::Retry { attempt: 2 }
        );
    }

    #[test]
    fn test_retry_policy_permanent_never_retries() {
        let policy = RetryPolicy::new(10, true);
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_classify_status_only_5xx_is_retryable() {
        assert_eq!(classify_status(200), FailureType::Permanent);
        assert_eq!(classify_status(304), FailureType::Permanent);
        assert_eq!(classify_status(404), FailureType::Permanent);
        assert_eq!(classify_status(420), FailureType::Permanent);
        assert_eq!(classify_status(502), FailureType::ServerError);
        assert_eq!(classify_status(504), FailureType::ServerError);
    }

    #[test]
    fn test_classify_error_variants() {
        assert_eq!(
            classify_error(&FetchError::timeout("/x")),
            FailureType::Transport
        );
        assert_eq!(
            classify_error(&FetchError::status("/x", 503)),
            FailureType::ServerError
        );
        assert_eq!(
            classify_error(&FetchError::decode("/x", "eof")),
            FailureType::Permanent
        );
        assert_eq!(classify_error(&FetchError::Cancelled), FailureType::Permanent);
    }
}
