//! Diff-and-apply engine for keyed collections.
//!
//! [`reconcile`] partitions a freshly fetched snapshot against the stored one:
//! - keys only in `new` go to `to_create`
//! - keys in both whose records differ go to `to_update`
//! - keys only in `old` go to `to_delete`
//!
//! [`apply_diff`] writes the partitions through a [`RecordRepository`] in the
//! order the caller picks. The first failing partition aborts the rest; the
//! partitions already written stay written. The next cycle recomputes the diff
//! from scratch, so this converges.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::store::{Record, RecordRepository, Scope, StoreError};

/// Create / update / delete partitions of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<T> {
    /// Records whose key is new.
    pub to_create: Vec<T>,
    /// New versions of records whose content changed.
    pub to_update: Vec<T>,
    /// Old records whose key disappeared.
    pub to_delete: Vec<T>,
    /// Count of records present and equal in both snapshots.
    pub unchanged: usize,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
            unchanged: 0,
        }
    }
}

impl<T> Diff<T> {
    /// True when nothing needs writing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes the partitions of `new` against `old`.
///
/// Both snapshots are assumed to have unique keys. Output order follows the
/// input order of `new` (create/update) and `old` (delete).
pub fn reconcile<T, K, F, E>(old: &[T], new: &[T], key_of: F, equals: E) -> Diff<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let old_by_key: HashMap<K, &T> = old.iter().map(|r| (key_of(r), r)).collect();
    let mut diff = Diff::default();

    for record in new {
        match old_by_key.get(&key_of(record)) {
            None => diff.to_create.push(record.clone()),
            Some(previous) if !equals(previous, record) => diff.to_update.push(record.clone()),
            Some(_) => diff.unchanged += 1,
        }
    }

    let new_keys: HashMap<K, &T> = new.iter().map(|r| (key_of(r), r)).collect();
    diff.to_delete = old
        .iter()
        .filter(|r| !new_keys.contains_key(&key_of(r)))
        .cloned()
        .collect();

    diff
}

/// [`reconcile`] keyed by [`Record::natural_key`] and compared with `==`.
pub fn reconcile_records<T: Record>(old: &[T], new: &[T]) -> Diff<T> {
    reconcile(old, new, Record::natural_key, |a, b| a == b)
}

/// Which partition a write belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Delete,
    Update,
    Create,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Create => "create",
        })
    }
}

/// Order in which partitions are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    /// delete, update, create: independent collections.
    DeleteFirst,
    /// create, update, delete: parents whose children are fetched afterwards.
    CreateFirst,
}

impl ApplyOrder {
    /// The partitions in application order.
    #[must_use]
    pub fn partitions(self) -> [Partition; 3] {
        match self {
            Self::DeleteFirst => [Partition::Delete, Partition::Update, Partition::Create],
            Self::CreateFirst => [Partition::Create, Partition::Update, Partition::Delete],
        }
    }
}

/// A partition failed to apply.
#[derive(Debug, Clone, Error)]
#[error("{partition} partition failed: {source}")]
pub struct ReconcileError {
    /// The failing partition.
    pub partition: Partition,
    /// The store error.
    #[source]
    pub source: StoreError,
}

impl ReconcileError {
    fn new(partition: Partition, source: StoreError) -> Self {
        Self { partition, source }
    }
}

/// What was written.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDiff<T> {
    /// Records returned by the create call.
    pub created: Vec<T>,
    /// Records returned by the update calls.
    pub updated: Vec<T>,
    /// Number of records passed to delete.
    pub deleted: usize,
}

impl<T> Default for AppliedDiff<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: 0,
        }
    }
}

/// Applies `diff` to `scope` through `repo` in `order`.
///
/// Creates and deletes are batch calls; updates go one record at a time.
///
/// # Errors
///
/// Returns [`ReconcileError`] naming the first partition that failed; later
/// partitions are not attempted.
#[instrument(skip(repo, diff), fields(
    kind = T::KIND,
    scope = %scope,
    create = diff.to_create.len(),
    update = diff.to_update.len(),
    delete = diff.to_delete.len(),
))]
pub async fn apply_diff<T: Record>(
    repo: &dyn RecordRepository<T>,
    scope: Scope,
    diff: &Diff<T>,
    order: ApplyOrder,
) -> Result<AppliedDiff<T>, ReconcileError> {
    let mut applied = AppliedDiff::default();

    for partition in order.partitions() {
        match partition {
            Partition::Delete if !diff.to_delete.is_empty() => {
                let all_existed = repo
                    .delete_many(scope, &diff.to_delete)
                    .await
                    .map_err(|e| ReconcileError::new(partition, e))?;
                if !all_existed {
                    warn!("some records were already gone before delete");
                }
                applied.deleted = diff.to_delete.len();
            }
            Partition::Update => {
                for record in &diff.to_update {
                    let updated = repo
                        .update_one(scope, record)
                        .await
                        .map_err(|e| ReconcileError::new(partition, e))?;
                    applied.updated.push(updated);
                }
            }
            Partition::Create if !diff.to_create.is_empty() => {
                applied.created = repo
                    .create_many(scope, &diff.to_create)
                    .await
                    .map_err(|e| ReconcileError::new(partition, e))?;
            }
            Partition::Delete | Partition::Create => {}
        }
    }

    debug!(
        created = applied.created.len(),
        updated = applied.updated.len(),
        deleted = applied.deleted,
        "diff applied"
    );
    Ok(applied)
}

/// Replaces everything in `scope` with `records` (delete all, then create).
///
/// # Errors
///
/// Returns [`ReconcileError`] for the partition that failed.
pub async fn replace_all<T: Record>(
    repo: &dyn RecordRepository<T>,
    scope: Scope,
    records: &[T],
) -> Result<Vec<T>, ReconcileError> {
    repo.clear(scope)
        .await
        .map_err(|e| ReconcileError::new(Partition::Delete, e))?;
    repo.create_many(scope, records)
        .await
        .map_err(|e| ReconcileError::new(Partition::Create, e))
}
