//! Conditional fetching with persisted cache validators.
//!
//! # Overview
//!
//! - [`CacheValidator`] - opaque freshness token plus expiry for one cache key
//! - [`ValidatorStore`] - persistence seam, with [`SqliteValidatorStore`] shipped
//! - [`ConditionalFetcher`] - attaches validators to requests and interprets
//!   `304 Not Modified`, page counts and freshness headers
//!
//! # Lifecycle
//!
//! A validator is created on the first successful fetch of a resource and
//! updated in place on every later fetch, whether the server answered `200`
//! or `304`. Validators are never deleted; stale ones are superseded.

mod fetcher;
mod store;

pub use fetcher::{ConditionalFetcher, FetchMode, Fetched, ProbeResult, parse_expires};
pub use store::SqliteValidatorStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Freshness record for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidator {
    /// `<endpoint>:<member|->:<entity|->[:p<page>]`.
    pub key: String,
    /// Opaque token from the `ETag` header; empty when the server sent none.
    pub validator: String,
    /// End of the freshness window.
    pub expires_at: DateTime<Utc>,
}

impl CacheValidator {
    /// Creates a validator record.
    #[must_use]
    pub fn new(key: impl Into<String>, validator: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            validator: validator.into(),
            expires_at,
        }
    }

    /// True while the expiry lies in the future.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// True when `now` is before the expiry.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// True when there is a token worth sending as `If-None-Match`.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.validator.is_empty()
    }
}

/// Persistence contract for cache validators.
#[async_trait]
pub trait ValidatorStore: Send + Sync {
    /// Returns the validator stored under exactly `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheValidator>, StoreError>;

    /// Returns the validator with the latest expiry among `prefix` itself and
    /// every key of the form `<prefix>:...`.
    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheValidator>, StoreError>;

    /// Inserts or updates a validator. When racing writers disagree, the
    /// later expiry wins.
    async fn put(&self, validator: &CacheValidator) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_cache_validator_freshness() {
        let now = Utc::now();
        let fresh = CacheValidator::new("assets:1:-:p1", "\"abc\"", now + Duration::seconds(30));
        let stale = CacheValidator::new("assets:1:-:p1", "\"abc\"", now - Duration::seconds(1));

        assert!(fresh.is_fresh_at(now));
        assert!(!stale.is_fresh_at(now));
        assert!(!fresh.is_fresh_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_cache_validator_has_token() {
        let now = Utc::now();
        assert!(CacheValidator::new("k", "\"v\"", now).has_token());
        assert!(!CacheValidator::new("k", "", now).has_token());
    }
}
