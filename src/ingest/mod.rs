//! Per-entity ingestion: fetch, diff, resolve, persist.
//!
//! Every ingestor runs the same cycle through [`IngestContext`]:
//!
//! 1. **check freshness**: an unexpired validator ends the cycle, no request
//! 2. **fetch** (deferred): `304` refreshes the expiry and ends the cycle
//! 3. **load old**: the persisted snapshot, "not found" counting as empty
//! 4. **resolve references** on the new records
//! 5. **reconcile** and apply in the entity's order
//! 6. **cascade** into dependent resources (ingestor-specific, best effort)
//! 7. **commit** the validator and **warm** the snapshot cache
//!
//! Steps 2 and 5 are fatal. Cancellation anywhere before step 7 leaves the
//! old validator in place.

pub mod assets;
pub mod contacts;
pub mod contracts;
pub mod fittings;
pub mod mail;
pub mod skills;
pub mod wallet;

pub use assets::{Asset, AssetIngestor};
pub use contacts::{Contact, ContactIngestor};
pub use contracts::{Contract, ContractBid, ContractIngestor, ContractItem};
pub use fittings::{Fitting, FittingIngestor, FittingItem, FittingItemRow};
pub use mail::{MailBody, MailHeader, MailIngestor, MailLabel, MailRecipient, MailingList};
pub use skills::{Skill, SkillIngestor, SkillQueueEntry, SkillQueueIngestor, SkillSummary};
pub use wallet::{
    WalletBalance, WalletBalanceIngestor, WalletJournalEntry, WalletJournalIngestor,
    WalletTransaction, WalletTransactionIngestor,
};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{self, CacheStore};
use crate::client::{FetchError, Pacer};
use crate::db::Database;
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::{CacheValidator, ConditionalFetcher, FetchMode, Fetched};
use crate::reconcile::{AppliedDiff, ApplyOrder, ReconcileError, apply_diff, reconcile_records};
use crate::resolve::{ReferenceResolver, References};
use crate::store::{ListFilter, PageParams, Record, RecordRepository, Scope, StoreError};
use crate::universe::ResolveError;

/// How long warmed snapshots stay in the fast cache.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(5 * 60);

/// A cycle failed before it could commit.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    /// True when the cycle stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Fetch(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<ResolveError> for IngestError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Fetch { source, .. } | ResolveError::Names(source) => Self::Fetch(source),
            ResolveError::Store { source, .. } => Self::Store(source),
            ResolveError::MemberRequired { kind, id } => Self::Fetch(FetchError::invalid_request(
                format!("{kind} {id} needs a member"),
            )),
            ResolveError::Cancelled => Self::Cancelled,
        }
    }
}

/// The entity families a member sync can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestEntity {
    Assets,
    Contacts,
    Contracts,
    Mail,
    Skills,
    SkillQueue,
    WalletBalance,
    WalletTransactions,
    WalletJournal,
    Fittings,
}

impl IngestEntity {
    pub const ALL: [Self; 10] = [
        Self::Assets,
        Self::Contacts,
        Self::Contracts,
        Self::Mail,
        Self::Skills,
        Self::SkillQueue,
        Self::WalletBalance,
        Self::WalletTransactions,
        Self::WalletJournal,
        Self::Fittings,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::Contacts => "contacts",
            Self::Contracts => "contracts",
            Self::Mail => "mail",
            Self::Skills => "skills",
            Self::SkillQueue => "skill-queue",
            Self::WalletBalance => "wallet-balance",
            Self::WalletTransactions => "wallet-transactions",
            Self::WalletJournal => "wallet-journal",
            Self::Fittings => "fittings",
        }
    }
}

impl fmt::Display for IngestEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for IngestEntity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown entity '{s}'"))
    }
}

/// Public surface shared by every ingestor.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Which entity family this ingestor owns.
    fn entity(&self) -> IngestEntity;

    /// Runs one cycle for `member_id` and returns the governing validator.
    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError>;

    /// Serves the stored snapshot as JSON without touching the remote API.
    async fn get_json(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError>;

    /// The stored validator, whatever its age.
    async fn last_validator(&self, member_id: i64) -> Result<Option<CacheValidator>, IngestError>;
}

/// Where a collection lives, remotely and locally.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub endpoint: Endpoint,
    pub params: EndpointParams,
    pub scope: Scope,
    pub order: ApplyOrder,
}

impl Target {
    /// A member's top-level collection.
    #[must_use]
    pub fn member(endpoint: Endpoint, member_id: i64, order: ApplyOrder) -> Self {
        Self {
            endpoint,
            params: EndpointParams::member(member_id),
            scope: Scope::member(member_id),
            order,
        }
    }

    /// A dependent collection under `parent_id` (contract items, bids, ...).
    #[must_use]
    pub fn child(endpoint: Endpoint, member_id: i64, parent_id: i64, order: ApplyOrder) -> Self {
        Self {
            endpoint,
            params: EndpointParams::member_entity(member_id, parent_id),
            scope: Scope::child(member_id, parent_id),
            order,
        }
    }

    fn member_id(&self) -> Option<i64> {
        self.params.member_id
    }
}

/// A reconciled snapshot whose validator has not been committed yet.
#[derive(Debug)]
pub struct Pending<T> {
    pub target: Target,
    pub validator: CacheValidator,
    pub applied: AppliedDiff<T>,
    /// Records deleted by the reconcile pass.
    pub deleted: Vec<T>,
}

/// Outcome of the fetch-and-reconcile half of a cycle.
#[derive(Debug)]
pub enum Synced<T> {
    /// Nothing changed remotely; the validator is current.
    Unchanged(CacheValidator),
    /// The snapshot changed and was applied.
    Changed(Pending<T>),
}

/// Shared collaborators of every ingestor.
#[derive(Clone)]
pub struct IngestContext {
    fetcher: ConditionalFetcher,
    resolver: ReferenceResolver,
    cache: Arc<dyn CacheStore>,
    db: Database,
    pacer: Arc<Pacer>,
    snapshot_ttl: Duration,
}

impl fmt::Debug for IngestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestContext")
            .field("fetcher", &self.fetcher)
            .field("snapshot_ttl", &self.snapshot_ttl)
            .finish_non_exhaustive()
    }
}

impl IngestContext {
    #[must_use]
    pub fn new(
        fetcher: ConditionalFetcher,
        resolver: ReferenceResolver,
        cache: Arc<dyn CacheStore>,
        db: Database,
        pacer: Arc<Pacer>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            cache,
            db,
            pacer,
            snapshot_ttl: DEFAULT_SNAPSHOT_TTL,
        }
    }

    #[must_use]
    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    #[must_use]
    pub fn fetcher(&self) -> &ConditionalFetcher {
        &self.fetcher
    }

    #[must_use]
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    /// Returns the governing validator if it is still fresh.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fetch`] for bad params or a failed lookup.
    pub async fn fresh_validator(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
    ) -> Result<Option<CacheValidator>, IngestError> {
        let current = self.fetcher.current_validator(endpoint, params).await?;
        Ok(current.filter(CacheValidator::is_fresh))
    }

    /// The stored validator regardless of freshness.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fetch`] for bad params or a failed lookup.
    pub async fn stored_validator(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
    ) -> Result<Option<CacheValidator>, IngestError> {
        Ok(self.fetcher.current_validator(endpoint, params).await?)
    }

    /// Check freshness, fetch, then apply; the validator is left uncommitted.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures; resolution failures other than
    /// cancellation are only logged.
    #[instrument(skip(self, repo, resolver, cancel), fields(endpoint = %target.endpoint, scope = %target.scope))]
    pub async fn sync_collection<T: Record + References>(
        &self,
        target: Target,
        repo: &dyn RecordRepository<T>,
        resolver: &ReferenceResolver,
        cancel: &CancellationToken,
    ) -> Result<Synced<T>, IngestError> {
        if let Some(validator) = self.fresh_validator(target.endpoint, &target.params).await? {
            debug!(key = %validator.key, "validator still fresh, skipping fetch");
            return Ok(Synced::Unchanged(validator));
        }

        let fetched = self
            .fetcher
            .fetch_collection::<T>(target.endpoint, &target.params, FetchMode::Deferred, cancel)
            .await?;

        match fetched {
            Fetched::NotModified { validator } => Ok(Synced::Unchanged(validator)),
            Fetched::Fresh { value, validator } => {
                self.apply_snapshot(target, repo, resolver, value, validator, cancel)
                    .await
                    .map(Synced::Changed)
            }
        }
    }

    /// Load old, resolve, reconcile and apply `records` for an already
    /// fetched snapshot.
    ///
    /// # Errors
    ///
    /// Store and reconcile failures, or cancellation during resolution.
    pub async fn apply_snapshot<T: Record + References>(
        &self,
        target: Target,
        repo: &dyn RecordRepository<T>,
        resolver: &ReferenceResolver,
        mut records: Vec<T>,
        validator: CacheValidator,
        cancel: &CancellationToken,
    ) -> Result<Pending<T>, IngestError> {
        let old = match repo.list(target.scope, ListFilter::all()).await {
            Ok(old) => old,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        resolver
            .resolve(&mut records, target.member_id(), cancel)
            .await?;

        let diff = reconcile_records(&old, &records);
        let applied = apply_diff(repo, target.scope, &diff, target.order).await?;
        info!(
            kind = T::KIND,
            scope = %target.scope,
            created = applied.created.len(),
            updated = applied.updated.len(),
            deleted = applied.deleted,
            unchanged = diff.unchanged,
            "snapshot reconciled"
        );

        Ok(Pending {
            target,
            validator,
            applied,
            deleted: diff.to_delete,
        })
    }

    /// Commits the validator and warms the snapshot cache.
    ///
    /// # Errors
    ///
    /// [`IngestError::Cancelled`] if `cancel` fired, or the commit failure.
    pub async fn finish<T: Record>(
        &self,
        pending: Pending<T>,
        repo: &dyn RecordRepository<T>,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        self.commit(pending.target.scope, &pending.validator, repo, cancel)
            .await?;
        Ok(pending.validator)
    }

    /// Commits `validator`, then warms the cache with the stored snapshot
    /// of `scope`.
    ///
    /// # Errors
    ///
    /// [`IngestError::Cancelled`] if `cancel` fired, or the commit failure.
    pub async fn commit<T: Record>(
        &self,
        scope: Scope,
        validator: &CacheValidator,
        repo: &dyn RecordRepository<T>,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        self.fetcher.commit(validator).await?;

        match repo.list(scope, ListFilter::all()).await {
            Ok(snapshot) => self.warm(scope, &snapshot).await,
            Err(e) => warn!(kind = T::KIND, error = %e, "skipping cache warm"),
        }
        Ok(())
    }

    /// Writes a snapshot to the fast cache.
    pub async fn warm<T: Record>(&self, scope: Scope, snapshot: &[T]) {
        cache::set_json(
            self.cache.as_ref(),
            &snapshot_key(T::KIND, scope),
            snapshot,
            self.snapshot_ttl,
        )
        .await;
    }

    /// Serves a snapshot from the cache, falling back to the store.
    ///
    /// # Errors
    ///
    /// Store failures other than "not found".
    pub async fn read<T: Record>(
        &self,
        repo: &dyn RecordRepository<T>,
        scope: Scope,
        page: Option<PageParams>,
    ) -> Result<Vec<T>, IngestError> {
        let key = snapshot_key(T::KIND, scope);
        let snapshot = if let Some(hit) = cache::get_json::<Vec<T>>(self.cache.as_ref(), &key).await
        {
            hit
        } else {
            let stored = match repo.list(scope, ListFilter::all()).await {
                Ok(stored) => stored,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            self.warm(scope, &stored).await;
            stored
        };

        Ok(match page {
            Some(page) => page.slice(&snapshot).to_vec(),
            None => snapshot,
        })
    }

    /// Drops a cached snapshot (after out-of-band writes).
    pub async fn invalidate<T: Record>(&self, scope: Scope) {
        self.cache.remove(&snapshot_key(T::KIND, scope)).await;
    }

    /// Syncs a dependent collection end to end, logging instead of failing.
    ///
    /// Returns `false` if the cycle failed; cancellation is propagated.
    ///
    /// # Errors
    ///
    /// Only [`IngestError::Cancelled`].
    pub async fn sync_child<T: Record + References>(
        &self,
        target: Target,
        repo: &dyn RecordRepository<T>,
        cancel: &CancellationToken,
    ) -> Result<bool, IngestError> {
        let outcome = match self
            .sync_collection(target, repo, &self.resolver, cancel)
            .await
        {
            Ok(Synced::Unchanged(_)) => Ok(()),
            Ok(Synced::Changed(pending)) => self.finish(pending, repo, cancel).await.map(drop),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => Ok(true),
            Err(e) if e.is_cancelled() => Err(IngestError::Cancelled),
            Err(e) => {
                warn!(endpoint = %target.endpoint, scope = %target.scope, error = %e, "dependent sync failed");
                Ok(false)
            }
        }
    }
}

fn snapshot_key(kind: &str, scope: Scope) -> String {
    format!("snapshot:{kind}:{scope}")
}

/// Serializes records for [`Ingestor::get_json`].
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, IngestError> {
    serde_json::to_value(value).map_err(|e| StoreError::serialization("snapshot", &e).into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_entity_parse_round_trip() {
        for entity in IngestEntity::ALL {
            assert_eq!(entity.as_str().parse::<IngestEntity>().unwrap(), entity);
        }
        assert!("planets".parse::<IngestEntity>().is_err());
    }

    #[test]
    fn test_ingest_error_cancellation_detection() {
        assert!(IngestError::Cancelled.is_cancelled());
        assert!(IngestError::Fetch(FetchError::Cancelled).is_cancelled());
        assert!(!IngestError::Fetch(FetchError::status("/x/", 500)).is_cancelled());
        assert!(IngestError::from(ResolveError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_target_child_scope() {
        let target = Target::child(Endpoint::ContractItems, 90_000_001, 77, ApplyOrder::DeleteFirst);
        assert_eq!(target.scope, Scope::child(90_000_001, 77));
        assert_eq!(target.params.entity_id, Some(77));
        assert_eq!(target.member_id(), Some(90_000_001));
    }

    #[test]
    fn test_snapshot_key_includes_scope() {
        assert_eq!(snapshot_key("asset", Scope::member(5)), "snapshot:asset:5");
        assert_eq!(snapshot_key("contract_item", Scope::child(5, 9)), "snapshot:contract_item:5/9");
    }
}
