//! Wallet balance, transactions and journal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Synced, Target, to_json};
use crate::classify::EntityKind;
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::{CacheValidator, Fetched};
use crate::resolve::{ForeignRef, RefRole, References};
use crate::reconcile::ApplyOrder;
use crate::store::{PageParams, Record, RecordRepository, Scope, SqliteRecordStore};

/// Single-value resource, upserted on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub member_id: i64,
    pub balance: f64,
}

impl Record for WalletBalance {
    const KIND: &'static str = "wallet_balance";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.member_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub transaction_id: i64,
    pub client_id: i64,
    pub location_id: i64,
    pub type_id: i64,
    pub quantity: i32,
    pub unit_price: f64,
    pub is_buy: bool,
    pub is_personal: bool,
    pub journal_ref_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub client_kind: EntityKind,
    #[serde(default)]
    pub location_kind: EntityKind,
}

impl Record for WalletTransaction {
    const KIND: &'static str = "wallet_transaction";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.transaction_id
    }
}

/// Both the client and the location go through range classification, so
/// both get the bulk fallback for ambiguous ids.
impl References for WalletTransaction {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        vec![
            ForeignRef::new(self.client_id, RefRole::Client),
            ForeignRef::new(self.location_id, RefRole::Location),
        ]
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        match role {
            RefRole::Client => self.client_kind = kind,
            RefRole::Location => self.location_kind = kind,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletJournalEntry {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub ref_type: String,
    pub description: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub first_party_id: Option<i64>,
    #[serde(default)]
    pub second_party_id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub context_id: Option<i64>,
    #[serde(default)]
    pub context_id_type: Option<String>,
    #[serde(default)]
    pub first_party_kind: EntityKind,
    #[serde(default)]
    pub second_party_kind: EntityKind,
}

impl Record for WalletJournalEntry {
    const KIND: &'static str = "wallet_journal_entry";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.id
    }
}

impl References for WalletJournalEntry {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        self.first_party_id
            .map(|id| ForeignRef::new(id, RefRole::FirstParty))
            .into_iter()
            .chain(
                self.second_party_id
                    .map(|id| ForeignRef::new(id, RefRole::SecondParty)),
            )
            .collect()
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        match role {
            RefRole::FirstParty => self.first_party_kind = kind,
            RefRole::SecondParty => self.second_party_kind = kind,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalletBalanceIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<WalletBalance>,
}

impl WalletBalanceIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let repo = SqliteRecordStore::new(ctx.db().clone());
        Self { ctx, repo }
    }

    /// Runs one cycle; a fresh balance is upserted.
    ///
    /// # Errors
    ///
    /// Fetch and store failures, or cancellation.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let params = EndpointParams::member(member_id);
        if let Some(validator) = self
            .ctx
            .fresh_validator(Endpoint::WalletBalance, &params)
            .await?
        {
            return Ok(validator);
        }

        let fetched = self
            .ctx
            .fetcher()
            .fetch_deferred::<f64>(Endpoint::WalletBalance, &params, cancel)
            .await?;
        let (balance, validator) = match fetched {
            Fetched::NotModified { validator } => return Ok(validator),
            Fetched::Fresh { value, validator } => (value, validator),
        };

        let scope = Scope::member(member_id);
        self.repo
            .upsert(scope, &WalletBalance { member_id, balance })
            .await?;
        info!(balance, "wallet balance stored");

        self.ctx.commit(scope, &validator, &self.repo, cancel).await?;
        Ok(validator)
    }

    /// Serves the stored balance.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64) -> Result<Option<WalletBalance>, IngestError> {
        let rows = self.ctx.read(&self.repo, Scope::member(member_id), None).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Ingestor for WalletBalanceIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::WalletBalance
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        WalletBalanceIngestor::ensure_fresh(self, member_id, cancel).await
    }

    async fn get_json(
        &self,
        member_id: i64,
        _page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError> {
        to_json(&self.get(member_id).await?)
    }

    async fn last_validator(&self, member_id: i64) -> Result<Option<CacheValidator>, IngestError> {
        self.ctx
            .stored_validator(Endpoint::WalletBalance, &EndpointParams::member(member_id))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct WalletTransactionIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<WalletTransaction>,
}

impl WalletTransactionIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let repo = SqliteRecordStore::new(ctx.db().clone());
        Self { ctx, repo }
    }

    /// Runs one ingestion cycle.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures, or cancellation.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let target = Target::member(
            Endpoint::WalletTransactions,
            member_id,
            ApplyOrder::DeleteFirst,
        );
        match self
            .ctx
            .sync_collection(target, &self.repo, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => Ok(validator),
            Synced::Changed(pending) => self.ctx.finish(pending, &self.repo, cancel).await,
        }
    }

    /// Serves stored transactions.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<Vec<WalletTransaction>, IngestError> {
        self.ctx.read(&self.repo, Scope::member(member_id), page).await
    }
}

#[async_trait]
impl Ingestor for WalletTransactionIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::WalletTransactions
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        WalletTransactionIngestor::ensure_fresh(self, member_id, cancel).await
    }

    async fn get_json(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError> {
        to_json(&self.get(member_id, page).await?)
    }

    async fn last_validator(&self, member_id: i64) -> Result<Option<CacheValidator>, IngestError> {
        self.ctx
            .stored_validator(
                Endpoint::WalletTransactions,
                &EndpointParams::member(member_id),
            )
            .await
    }
}

/// Paginated journal.
#[derive(Debug, Clone)]
pub struct WalletJournalIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<WalletJournalEntry>,
}

impl WalletJournalIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let repo = SqliteRecordStore::new(ctx.db().clone());
        Self { ctx, repo }
    }

    /// Runs one ingestion cycle.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures, or cancellation.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let target = Target::member(Endpoint::WalletJournal, member_id, ApplyOrder::DeleteFirst);
        match self
            .ctx
            .sync_collection(target, &self.repo, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => Ok(validator),
            Synced::Changed(pending) => self.ctx.finish(pending, &self.repo, cancel).await,
        }
    }

    /// Serves stored journal entries.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<Vec<WalletJournalEntry>, IngestError> {
        self.ctx.read(&self.repo, Scope::member(member_id), page).await
    }
}

#[async_trait]
impl Ingestor for WalletJournalIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::WalletJournal
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        WalletJournalIngestor::ensure_fresh(self, member_id, cancel).await
    }

    async fn get_json(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError> {
        to_json(&self.get(member_id, page).await?)
    }

    async fn last_validator(&self, member_id: i64) -> Result<Option<CacheValidator>, IngestError> {
        self.ctx
            .stored_validator(Endpoint::WalletJournal, &EndpointParams::member(member_id))
            .await
    }
}
