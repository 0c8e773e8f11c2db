//! SQLite-backed [`RecordRepository`] storing records as JSON bodies.

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument};

use super::{ListFilter, Record, RecordRepository, Scope, StoreError};
use crate::db::Database;

/// Generic record store; one instance per record type, all sharing the
/// `records` table and discriminated by [`Record::KIND`].
#[derive(Debug)]
pub struct SqliteRecordStore<T> {
    db: Database,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteRecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> SqliteRecordStore<T> {
    /// Creates a store over the shared database pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    /// Counts records in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count(&self, scope: Scope) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r"SELECT COUNT(*) AS count FROM records
              WHERE kind = ? AND owner_id = ? AND parent_id = ?",
        )
        .bind(T::KIND)
        .bind(scope.owner_id)
        .bind(scope.parent_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("count"))
    }

    fn encode(record: &T) -> Result<String, StoreError> {
        serde_json::to_string(record).map_err(|e| StoreError::serialization(T::KIND, &e))
    }

    fn decode(body: &str) -> Result<T, StoreError> {
        serde_json::from_str(body).map_err(|e| StoreError::serialization(T::KIND, &e))
    }
}

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::NotFound`].
fn check_affected(kind: &'static str, key: &str, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::not_found(kind, key))
    } else {
        Ok(())
    }
}

#[async_trait]
impl<T: Record> RecordRepository<T> for SqliteRecordStore<T> {
    #[instrument(skip(self), fields(kind = T::KIND, scope = %scope))]
    async fn list(&self, scope: Scope, filter: ListFilter) -> Result<Vec<T>, StoreError> {
        // Numeric keys sort numerically; non-numeric keys fall back to text order.
        let (limit, offset) = filter.page.map_or((-1_i64, 0_i64), |page| {
            (
                i64::try_from(page.limit).unwrap_or(i64::MAX),
                i64::try_from(page.offset).unwrap_or(i64::MAX),
            )
        });

        let rows = sqlx::query(
            r"SELECT body FROM records
              WHERE kind = ? AND owner_id = ? AND parent_id = ?
              ORDER BY CAST(natural_key AS INTEGER), natural_key
              LIMIT ? OFFSET ?",
        )
        .bind(T::KIND)
        .bind(scope.owner_id)
        .bind(scope.parent_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| Self::decode(row.get::<&str, _>("body")))
            .collect()
    }

    #[instrument(skip(self, records), fields(kind = T::KIND, scope = %scope, count = records.len()))]
    async fn create_many(&self, scope: Scope, records: &[T]) -> Result<Vec<T>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.db.pool().begin().await?;
        for record in records {
            sqlx::query(
                r"INSERT INTO records (kind, owner_id, parent_id, natural_key, body)
                  VALUES (?, ?, ?, ?, ?)",
            )
            .bind(T::KIND)
            .bind(scope.owner_id)
            .bind(scope.parent_id)
            .bind(record.natural_key().to_string())
            .bind(Self::encode(record)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(created = records.len(), "Records created");
        Ok(records.to_vec())
    }

    #[instrument(skip(self, record), fields(kind = T::KIND, scope = %scope, key = %record.natural_key()))]
    async fn update_one(&self, scope: Scope, record: &T) -> Result<T, StoreError> {
        let key = record.natural_key().to_string();
        let result = sqlx::query(
            r"UPDATE records
              SET body = ?, updated_at = datetime('now')
              WHERE kind = ? AND owner_id = ? AND parent_id = ? AND natural_key = ?",
        )
        .bind(Self::encode(record)?)
        .bind(T::KIND)
        .bind(scope.owner_id)
        .bind(scope.parent_id)
        .bind(&key)
        .execute(self.db.pool())
        .await?;

        check_affected(T::KIND, &key, result.rows_affected())?;
        Ok(record.clone())
    }

    #[instrument(skip(self, records), fields(kind = T::KIND, scope = %scope, count = records.len()))]
    async fn delete_many(&self, scope: Scope, records: &[T]) -> Result<bool, StoreError> {
        if records.is_empty() {
            return Ok(true);
        }

        let mut tx = self.db.pool().begin().await?;
        let mut deleted = 0_u64;
        for record in records {
            let result = sqlx::query(
                r"DELETE FROM records
                  WHERE kind = ? AND owner_id = ? AND parent_id = ? AND natural_key = ?",
            )
            .bind(T::KIND)
            .bind(scope.owner_id)
            .bind(scope.parent_id)
            .bind(record.natural_key().to_string())
            .execute(&mut *tx)
            .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        debug!(deleted, "Records deleted");
        Ok(deleted == records.len() as u64)
    }

    #[instrument(skip(self, record), fields(kind = T::KIND, scope = %scope))]
    async fn upsert(&self, scope: Scope, record: &T) -> Result<T, StoreError> {
        sqlx::query(
            r"INSERT INTO records (kind, owner_id, parent_id, natural_key, body)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT (kind, owner_id, parent_id, natural_key)
              DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
        )
        .bind(T::KIND)
        .bind(scope.owner_id)
        .bind(scope.parent_id)
        .bind(record.natural_key().to_string())
        .bind(Self::encode(record)?)
        .execute(self.db.pool())
        .await?;

        Ok(record.clone())
    }

    #[instrument(skip(self), fields(kind = T::KIND, scope = %scope))]
    async fn clear(&self, scope: Scope) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"DELETE FROM records WHERE kind = ? AND owner_id = ? AND parent_id = ?",
        )
        .bind(T::KIND)
        .bind(scope.owner_id)
        .bind(scope.parent_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
