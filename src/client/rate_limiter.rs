//! Per-lane request pacing.
//!
//! The remote API's rate budget is shared across all callers, so bulk phases
//! insert a fixed gap between consecutive requests in their lane:
//! - [`LANE_CATALOG`](super::constants::LANE_CATALOG) during catalog import
//! - [`LANE_MAIL`](super::constants::LANE_MAIL) while resolving mail participants
//!
//! Lanes are independent; requests in different lanes never wait on each other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ingestor_core::client::Pacer;
//!
//! # async fn example() {
//! let pacer = Pacer::new()
//!     .with_lane("catalog", Duration::from_millis(100))
//!     .with_lane("mail", Duration::from_millis(250));
//!
//! pacer.acquire("catalog").await; // immediate
//! pacer.acquire("catalog").await; // waits ~100ms
//! pacer.acquire("mail").await; // immediate, separate lane
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Minimum-gap pacer keyed by lane name.
///
/// Designed to be shared behind `Arc` across tasks. Lane state lives in a
/// `DashMap` of `Arc`s so the shard lock is released before awaiting the
/// per-lane mutex.
#[derive(Debug, Default)]
pub struct Pacer {
    delays: HashMap<String, Duration>,
    lanes: DashMap<String, Arc<LaneState>>,
}

/// State tracked for each lane.
#[derive(Debug)]
struct LaneState {
    /// Time of the last request in this lane; `None` until the first one.
    last_request: Mutex<Option<Instant>>,

    /// Cumulative delay applied to this lane (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

impl LaneState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl Pacer {
    /// Creates a pacer with no configured lanes; every lane is unpaced until added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Configures the minimum gap for `lane`. A zero gap disables pacing for it.
    #[must_use]
    pub fn with_lane(mut self, lane: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(lane.into(), delay);
        self
    }

    /// Returns the configured gap for `lane`.
    #[must_use]
    pub fn delay_for(&self, lane: &str) -> Duration {
        self.delays.get(lane).copied().unwrap_or(Duration::ZERO)
    }

    /// Waits until a request in `lane` may proceed, then records it.
    ///
    /// The first request in a lane proceeds immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, lane: &str) {
        let gap = self.delay_for(lane);
        if gap.is_zero() {
            return;
        }

        let state = self
            .lanes
            .entry(lane.to_string())
            .or_insert_with(|| Arc::new(LaneState::new()))
            .clone();

        let mut last_request_guard = state.last_request.lock().await;

        if let Some(last_request) = *last_request_guard {
            let elapsed = last_request.elapsed();

            if elapsed < gap {
                let delay = gap.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    lane,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        lane,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "pacing has added significant delay to this lane"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        }

        *last_request_guard = Some(Instant::now());
    }

    /// Total delay applied so far in `lane`.
    #[must_use]
    pub fn cumulative_delay(&self, lane: &str) -> Duration {
        self.lanes.get(lane).map_or(Duration::ZERO, |state| {
            Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pacer_disabled_no_delay() {
        tokio::time::pause();

        let pacer = Pacer::disabled();
        let start = Instant::now();
        for _ in 0..5 {
            pacer.acquire("catalog").await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_pacer_first_request_no_delay() {
        tokio::time::pause();

        let pacer = Pacer::new().with_lane("catalog", Duration::from_secs(1));
        let start = Instant::now();
        pacer.acquire("catalog").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_pacer_delays_same_lane() {
        tokio::time::pause();

        let pacer = Pacer::new().with_lane("catalog", Duration::from_secs(1));
        let start = Instant::now();

        pacer.acquire("catalog").await;
        pacer.acquire("catalog").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));

        pacer.acquire("catalog").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(pacer.cumulative_delay("catalog"), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_pacer_lanes_are_independent() {
        tokio::time::pause();

        let pacer = Pacer::new()
            .with_lane("catalog", Duration::from_secs(1))
            .with_lane("mail", Duration::from_secs(1));

        pacer.acquire("catalog").await;
        let start = Instant::now();
        pacer.acquire("mail").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_pacer_unconfigured_lane_is_unpaced() {
        tokio::time::pause();

        let pacer = Pacer::new().with_lane("catalog", Duration::from_secs(1));
        let start = Instant::now();
        pacer.acquire("other").await;
        pacer.acquire("other").await;
        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(pacer.delay_for("other"), Duration::ZERO);
    }
}
