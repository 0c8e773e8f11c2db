//! Persistence seams for member records and universe entities.
//!
//! The ingestion core talks to storage only through the traits in this module:
//! - [`RecordRepository`] - keyed, owner-scoped collections (assets, mail, ...)
//! - [`EntityStore`] - universe and catalog entities keyed by numeric id
//!
//! [`SqliteRecordStore`] is the shipped implementation; it stores each record
//! as a JSON body under `(kind, owner, parent, natural key)` so every entity
//! type shares one table and one code path.

mod entities;
mod error;
mod records;

pub use entities::{Entity, EntityStore};
pub use error::{DbErrorKind, StoreError};
pub use records::SqliteRecordStore;

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A keyed record with a natural key that is stable across fetches.
///
/// Equality (`PartialEq`) is the change-detection function used by the
/// reconciler; deriving it compares nested collections element-wise.
pub trait Record: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// Storage discriminator, e.g. `"asset"`.
    const KIND: &'static str;

    /// Natural key type.
    type Key: Eq + Hash + Clone + fmt::Display + fmt::Debug + Send + Sync;

    /// Returns this record's natural key.
    fn natural_key(&self) -> Self::Key;
}

/// Owner scope of a record collection.
///
/// Top-level collections use `parent_id == 0`; dependent children (contract
/// items, contract bids, fitting items, mail bodies) carry the parent's
/// natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Owning member id.
    pub owner_id: i64,
    /// Parent natural key, or 0 for top-level collections.
    pub parent_id: i64,
}

impl Scope {
    /// Scope of a member's top-level collection.
    #[must_use]
    pub fn member(owner_id: i64) -> Self {
        Self {
            owner_id,
            parent_id: 0,
        }
    }

    /// Scope of a dependent collection under `parent_id`.
    #[must_use]
    pub fn child(owner_id: i64, parent_id: i64) -> Self {
        Self {
            owner_id,
            parent_id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parent_id == 0 {
            write!(f, "{}", self.owner_id)
        } else {
            write!(f, "{}/{}", self.owner_id, self.parent_id)
        }
    }
}

/// Offset/limit paging for read paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    /// Records to skip.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: usize,
}

impl PageParams {
    /// Applies the page window to an in-memory slice.
    #[must_use]
    pub fn slice<'a, T>(&self, records: &'a [T]) -> &'a [T] {
        let start = self.offset.min(records.len());
        let end = start.saturating_add(self.limit).min(records.len());
        &records[start..end]
    }
}

/// Filters accepted by [`RecordRepository::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Optional page window; `None` returns the whole collection.
    pub page: Option<PageParams>,
}

impl ListFilter {
    /// Whole-collection filter.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter returning one page window.
    #[must_use]
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            page: Some(PageParams { offset, limit }),
        }
    }
}

/// Data-access contract for one keyed record type.
#[async_trait]
pub trait RecordRepository<T: Record>: Send + Sync {
    /// Lists the records in `scope`, ordered by natural key.
    async fn list(&self, scope: Scope, filter: ListFilter) -> Result<Vec<T>, StoreError>;

    /// Inserts new records; fails on natural key collisions.
    async fn create_many(&self, scope: Scope, records: &[T]) -> Result<Vec<T>, StoreError>;

    /// Replaces one existing record; [`StoreError::NotFound`] if absent.
    async fn update_one(&self, scope: Scope, record: &T) -> Result<T, StoreError>;

    /// Deletes the given records. Returns `true` when every record existed.
    async fn delete_many(&self, scope: Scope, records: &[T]) -> Result<bool, StoreError>;

    /// Inserts or replaces a single record (single-value resources).
    async fn upsert(&self, scope: Scope, record: &T) -> Result<T, StoreError>;

    /// Deletes everything in `scope`, returning the number of rows removed.
    async fn clear(&self, scope: Scope) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_member_has_no_parent() {
        let scope = Scope::member(90_000_001);
        assert_eq!(scope.parent_id, 0);
        assert_eq!(scope.to_string(), "90000001");
    }

    #[test]
    fn test_scope_child_display() {
        let scope = Scope::child(90_000_001, 555);
        assert_eq!(scope.to_string(), "90000001/555");
    }

    #[test]
    fn test_page_params_slice_clamps_to_bounds() {
        let data = [1, 2, 3, 4, 5];
        assert_eq!(PageParams { offset: 1, limit: 2 }.slice(&data), &[2, 3]);
        assert_eq!(PageParams { offset: 4, limit: 10 }.slice(&data), &[5]);
        assert!(PageParams { offset: 9, limit: 1 }.slice(&data).is_empty());
    }

    #[test]
    fn test_list_filter_constructors() {
        assert_eq!(ListFilter::all().page, None);
        assert_eq!(
            ListFilter::page(10, 5).page,
            Some(PageParams {
                offset: 10,
                limit: 5
            })
        );
    }
}
