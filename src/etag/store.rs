//! SQLite-backed [`ValidatorStore`] with an optional cache in front.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument};

use super::{CacheValidator, ValidatorStore};
use crate::cache::{self, CacheStore};
use crate::db::Database;
use crate::store::StoreError;

const CACHE_PREFIX: &str = "validator:";

/// Validator store over the `cache_validators` table.
///
/// When a [`CacheStore`] is attached, exact-key lookups are served from it
/// for as long as the validator stays fresh.
#[derive(Clone)]
pub struct SqliteValidatorStore {
    db: Database,
    cache: Option<Arc<dyn CacheStore>>,
}

impl std::fmt::Debug for SqliteValidatorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteValidatorStore")
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl SqliteValidatorStore {
    /// Creates a store without a cache layer.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db, cache: None }
    }

    /// Creates a store that consults `cache` before the database.
    #[must_use]
    pub fn with_cache(db: Database, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            db,
            cache: Some(cache),
        }
    }

    async fn warm(&self, validator: &CacheValidator) {
        let Some(cache) = &self.cache else {
            return;
        };
        let ttl = (validator.expires_at - Utc::now()).to_std().unwrap_or_default();
        cache::set_json(
            cache.as_ref(),
            &format!("{CACHE_PREFIX}{}", validator.key),
            validator,
            ttl,
        )
        .await;
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn encode_expiry(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_row(row: &SqliteRow) -> Result<CacheValidator, StoreError> {
    Ok(CacheValidator {
        key: row.try_get("key")?,
        validator: row.try_get("validator")?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
    })
}

/// Escapes `LIKE` wildcards; endpoint names contain `_`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl ValidatorStore for SqliteValidatorStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<CacheValidator>, StoreError> {
        if let Some(cache) = &self.cache {
            let cached =
                cache::get_json::<CacheValidator>(cache.as_ref(), &format!("{CACHE_PREFIX}{key}"))
                    .await;
            if let Some(hit) = cached {
                debug!("validator served from cache");
                return Ok(Some(hit));
            }
        }

        let row = sqlx::query(
            r"SELECT key, validator, expires_at FROM cache_validators WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;

        let validator = row.as_ref().map(decode_row).transpose()?;
        if let Some(validator) = &validator {
            self.warm(validator).await;
        }
        Ok(validator)
    }

    #[instrument(skip(self))]
    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheValidator>, StoreError> {
        let pattern = format!("{}:%", escape_like(prefix));
        let row = sqlx::query(
            r"SELECT key, validator, expires_at FROM cache_validators
              WHERE key = ? OR key LIKE ? ESCAPE '\'
              ORDER BY expires_at DESC
              LIMIT 1",
        )
        .bind(prefix)
        .bind(pattern)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self, validator), fields(key = %validator.key))]
    async fn put(&self, validator: &CacheValidator) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"INSERT INTO cache_validators (key, validator, expires_at)
              VALUES (?, ?, ?)
              ON CONFLICT (key) DO UPDATE SET
                  validator = excluded.validator,
                  expires_at = excluded.expires_at,
                  updated_at = datetime('now')
              WHERE excluded.expires_at >= cache_validators.expires_at",
        )
        .bind(&validator.key)
        .bind(&validator.validator)
        .bind(encode_expiry(&validator.expires_at))
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!("kept existing validator with a later expiry");
            if let Some(cache) = &self.cache {
                cache.remove(&format!("{CACHE_PREFIX}{}", validator.key)).await;
            }
            return Ok(());
        }

        self.warm(validator).await;
        Ok(())
    }
}
