//! Universe and catalog entity persistence keyed by `(kind, id)`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use tracing::instrument;

use super::StoreError;
use crate::db::Database;

/// A universe or catalog entity with a numeric remote id.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage discriminator, e.g. `"station"`.
    const KIND: &'static str;

    /// Remote id of this entity.
    fn id(&self) -> i64;
}

/// Entity store over the shared `entities` table.
#[derive(Debug, Clone)]
pub struct EntityStore {
    db: Database,
}

impl EntityStore {
    /// Creates a store over the shared database pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Loads an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no row exists, or
    /// [`StoreError::Database`] / [`StoreError::Serialization`] on failure.
    #[instrument(skip(self), fields(kind = T::KIND))]
    pub async fn get<T: Entity>(&self, id: i64) -> Result<T, StoreError> {
        self.find(id)
            .await?
            .ok_or_else(|| StoreError::not_found(T::KIND, id))
    }

    /// Loads an entity if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`] on failure.
    pub async fn find<T: Entity>(&self, id: i64) -> Result<Option<T>, StoreError> {
        let row = sqlx::query(r"SELECT body FROM entities WHERE kind = ? AND id = ?")
            .bind(T::KIND)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| {
            serde_json::from_str(row.get::<&str, _>("body"))
                .map_err(|e| StoreError::serialization(T::KIND, &e))
        })
        .transpose()
    }

    /// Inserts or replaces an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] / [`StoreError::Serialization`] on failure.
    #[instrument(skip(self, entity), fields(kind = T::KIND, id = entity.id()))]
    pub async fn put<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        let body =
            serde_json::to_string(entity).map_err(|e| StoreError::serialization(T::KIND, &e))?;

        sqlx::query(
            r"INSERT INTO entities (kind, id, body)
              VALUES (?, ?, ?)
              ON CONFLICT (kind, id)
              DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
        )
        .bind(T::KIND)
        .bind(entity.id())
        .bind(body)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Counts stored entities of kind `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count<T: Entity>(&self) -> Result<i64, StoreError> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM entities WHERE kind = ?")
            .bind(T::KIND)
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.get("count"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Moon {
        id: i64,
        name: String,
    }

    impl Entity for Moon {
        const KIND: &'static str = "moon";

        fn id(&self) -> i64 {
            self.id
        }
    }

    #[tokio::test]
    async fn test_entity_store_get_missing_is_not_found() {
        let store = EntityStore::new(Database::new_in_memory().await.unwrap());
        let err = store.get::<Moon>(40_000_001).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_entity_store_put_replaces_existing() {
        let store = EntityStore::new(Database::new_in_memory().await.unwrap());
        let mut moon = Moon {
            id: 40_000_001,
            name: "I".to_string(),
        };
        store.put(&moon).await.unwrap();
        moon.name = "II".to_string();
        store.put(&moon).await.unwrap();

        let loaded: Moon = store.get(40_000_001).await.unwrap();
        assert_eq!(loaded, moon);
        assert_eq!(store.count::<Moon>().await.unwrap(), 1);
    }
}
