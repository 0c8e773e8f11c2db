//! Tracking of the remote API's advertised error budget.
//!
//! Every response carries the remaining error allowance and the seconds until
//! it resets. Once the allowance drops to the configured floor, further
//! requests wait for the reset window instead of risking a ban.

use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::FetchError;
use super::constants::{ERROR_LIMIT_REMAIN_HEADER, ERROR_LIMIT_RESET_HEADER, MAX_BUDGET_WAIT};

#[derive(Debug, Default, Clone, Copy)]
struct BudgetState {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

/// Point-in-time view of the error budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    /// Last advertised remaining allowance, if any response carried one.
    pub remaining: Option<u32>,
    /// Time until the advertised reset, if known and still in the future.
    pub reset_in: Option<Duration>,
}

/// Shared error-budget tracker.
#[derive(Debug)]
pub struct ErrorBudget {
    floor: u32,
    state: Mutex<BudgetState>,
}

impl ErrorBudget {
    /// Creates a tracker that throttles at or below `floor` remaining errors.
    #[must_use]
    pub fn new(floor: u32) -> Self {
        Self {
            floor,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Returns the configured floor.
    #[must_use]
    pub fn floor(&self) -> u32 {
        self.floor
    }

    /// Records the budget headers of a response. Missing headers leave state unchanged.
    pub async fn observe(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, ERROR_LIMIT_REMAIN_HEADER);
        let reset = header_u64(headers, ERROR_LIMIT_RESET_HEADER);
        if remaining.is_none() && reset.is_none() {
            return;
        }

        let mut state = self.state.lock().await;
        if let Some(remaining) = remaining {
            state.remaining = Some(u32::try_from(remaining).unwrap_or(u32::MAX));
        }
        if let Some(reset) = reset {
            // Waits never exceed the cap, so neither does the stored horizon.
            let horizon = Duration::from_secs(reset).min(MAX_BUDGET_WAIT);
            state.reset_at = Instant::now().checked_add(horizon);
        }
        debug!(
            remaining = ?state.remaining,
            reset_secs = ?reset,
            "error budget observed"
        );
    }

    /// Returns the current view of the budget.
    pub async fn snapshot(&self) -> BudgetSnapshot {
        let state = *self.state.lock().await;
        BudgetSnapshot {
            remaining: state.remaining,
            reset_in: state
                .reset_at
                .map(|at| at.saturating_duration_since(Instant::now()))
                .filter(|d| !d.is_zero()),
        }
    }

    /// Sleeps until the reset window when the budget is at or below the floor.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] if `cancel` fires while waiting.
    pub async fn throttle(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        let state = *self.state.lock().await;
        let (Some(remaining), Some(reset_at)) = (state.remaining, state.reset_at) else {
            return Ok(());
        };
        if remaining > self.floor {
            return Ok(());
        }

        let wait = reset_at
            .saturating_duration_since(Instant::now())
            .min(MAX_BUDGET_WAIT);
        if wait.is_zero() {
            return Ok(());
        }

        warn!(
            remaining,
            floor = self.floor,
            wait_secs = wait.as_secs(),
            "error budget exhausted, waiting for reset"
        );

        tokio::select! {
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            () = tokio::time::sleep(wait) => {
                // The window has rolled over; forget the stale count.
                let mut state = self.state.lock().await;
                if state.reset_at.is_some_and(|at| at <= Instant::now()) {
                    state.remaining = None;
                }
                Ok(())
            }
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn budget_headers(remain: &str, reset: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ERROR_LIMIT_REMAIN_HEADER, HeaderValue::from_str(remain).unwrap());
        headers.insert(ERROR_LIMIT_RESET_HEADER, HeaderValue::from_str(reset).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_error_budget_observe_records_headers() {
        let budget = ErrorBudget::new(10);
        budget.observe(&budget_headers("87", "42")).await;

        let snapshot = budget.snapshot().await;
        assert_eq!(snapshot.remaining, Some(87));
        assert!(snapshot.reset_in.unwrap() <= Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_error_budget_ignores_garbage_headers() {
        let budget = ErrorBudget::new(10);
        budget.observe(&budget_headers("lots", "soon")).await;
        assert_eq!(budget.snapshot().await.remaining, None);
    }

    #[tokio::test]
    async fn test_error_budget_throttle_is_noop_above_floor() {
        tokio::time::pause();

        let budget = ErrorBudget::new(10);
        budget.observe(&budget_headers("50", "30")).await;

        let start = Instant::now();
        budget.throttle(&CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_error_budget_throttle_waits_for_reset_at_floor() {
        tokio::time::pause();

        let budget = ErrorBudget::new(10);
        budget.observe(&budget_headers("10", "5")).await;

        let start = Instant::now();
        budget.throttle(&CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(budget.snapshot().await.remaining, None);
    }

    #[tokio::test]
    async fn test_error_budget_throttle_honours_cancellation() {
        tokio::time::pause();

        let budget = ErrorBudget::new(10);
        budget.observe(&budget_headers("0", "60")).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = budget.throttle(&cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_error_budget_clamps_oversized_reset() {
        tokio::time::pause();

        let budget = ErrorBudget::new(10);
        budget
            .observe(&budget_headers("5", &u64::MAX.to_string()))
            .await;

        let snapshot = budget.snapshot().await;
        assert_eq!(snapshot.remaining, Some(5));
        assert!(snapshot.reset_in.unwrap() <= MAX_BUDGET_WAIT);

        let start = Instant::now();
        budget.throttle(&CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() <= MAX_BUDGET_WAIT + Duration::from_secs(1));
    }
}
