//! Member contracts with their items and auction bids.
//!
//! Contracts are parents: they are applied create-first, then new contracts
//! get their items fetched and auctions (new or updated) get their bids.
//! Children of deleted contracts are dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Pending, Synced, Target, to_json};
use crate::classify::EntityKind;
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::CacheValidator;
use crate::reconcile::ApplyOrder;
use crate::resolve::{ForeignRef, RefRole, References};
use crate::store::{PageParams, Record, RecordRepository, Scope, SqliteRecordStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: i64,
    pub issuer_id: i64,
    pub issuer_corporation_id: i64,
    pub assignee_id: i64,
    pub acceptor_id: i64,
    #[serde(default)]
    pub start_location_id: Option<i64>,
    #[serde(default)]
    pub end_location_id: Option<i64>,
    /// `item_exchange`, `auction`, `courier`, `loan` or `unknown`.
    #[serde(rename = "type")]
    pub contract_type: String,
    pub status: String,
    pub availability: String,
    #[serde(default)]
    pub title: Option<String>,
    pub for_corporation: bool,
    pub date_issued: DateTime<Utc>,
    pub date_expired: DateTime<Utc>,
    #[serde(default)]
    pub date_accepted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub reward: Option<f64>,
    #[serde(default)]
    pub collateral: Option<f64>,
    #[serde(default)]
    pub buyout: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub days_to_complete: Option<i32>,
    #[serde(default)]
    pub assignee_kind: EntityKind,
    #[serde(default)]
    pub acceptor_kind: EntityKind,
    #[serde(default)]
    pub start_location_kind: EntityKind,
    #[serde(default)]
    pub end_location_kind: EntityKind,
}

impl Contract {
    #[must_use]
    pub fn is_auction(&self) -> bool {
        self.contract_type == "auction"
    }
}

impl Record for Contract {
    const KIND: &'static str = "contract";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.contract_id
    }
}

impl References for Contract {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        let mut refs = vec![
            ForeignRef::hinted(self.issuer_id, RefRole::Issuer, EntityKind::Character),
            ForeignRef::hinted(
                self.issuer_corporation_id,
                RefRole::IssuerCorporation,
                EntityKind::Corporation,
            ),
            ForeignRef::new(self.assignee_id, RefRole::Assignee),
            ForeignRef::new(self.acceptor_id, RefRole::Acceptor),
        ];
        if let Some(id) = self.start_location_id {
            refs.push(ForeignRef::new(id, RefRole::StartLocation));
        }
        if let Some(id) = self.end_location_id {
            refs.push(ForeignRef::new(id, RefRole::EndLocation));
        }
        refs
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        match role {
            RefRole::Assignee => self.assignee_kind = kind,
            RefRole::Acceptor => self.acceptor_kind = kind,
            RefRole::StartLocation => self.start_location_kind = kind,
            RefRole::EndLocation => self.end_location_kind = kind,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractItem {
    pub record_id: i64,
    pub type_id: i64,
    pub quantity: i32,
    pub is_included: bool,
    pub is_singleton: bool,
    #[serde(default)]
    pub raw_quantity: Option<i32>,
}

impl Record for ContractItem {
    const KIND: &'static str = "contract_item";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.record_id
    }
}

impl References for ContractItem {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractBid {
    pub bid_id: i64,
    pub bidder_id: i64,
    pub amount: f64,
    pub date_bid: DateTime<Utc>,
    #[serde(default)]
    pub bidder_kind: EntityKind,
}

impl Record for ContractBid {
    const KIND: &'static str = "contract_bid";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.bid_id
    }
}

impl References for ContractBid {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        vec![ForeignRef::new(self.bidder_id, RefRole::Bidder)]
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        if role == RefRole::Bidder {
            self.bidder_kind = kind;
        }
    }
}

/// Contract ids whose items and bids need fetching after a reconcile pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CascadePlan {
    pub items: Vec<i64>,
    pub bids: Vec<i64>,
    pub dropped: Vec<i64>,
}

impl CascadePlan {
    /// New contracts get items; auctions that are new or changed get bids;
    /// deleted contracts lose both.
    #[must_use]
    pub fn from_pending(pending: &Pending<Contract>) -> Self {
        let applied = &pending.applied;
        Self {
            items: applied.created.iter().map(|c| c.contract_id).collect(),
            bids: applied
                .created
                .iter()
                .chain(&applied.updated)
                .filter(|c| c.is_auction())
                .map(|c| c.contract_id)
                .collect(),
            dropped: pending.deleted.iter().map(|c| c.contract_id).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContractIngestor {
    ctx: IngestContext,
    contracts: SqliteRecordStore<Contract>,
    items: SqliteRecordStore<ContractItem>,
    bids: SqliteRecordStore<ContractBid>,
}

impl ContractIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let db = ctx.db().clone();
        Self {
            ctx,
            contracts: SqliteRecordStore::new(db.clone()),
            items: SqliteRecordStore::new(db.clone()),
            bids: SqliteRecordStore::new(db),
        }
    }

    /// Runs one ingestion cycle including item and bid cascades.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures of the contract list, or cancellation.
    /// Item and bid failures are logged.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let target = Target::member(Endpoint::Contracts, member_id, ApplyOrder::CreateFirst);
        let pending = match self
            .ctx
            .sync_collection(target, &self.contracts, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => return Ok(validator),
            Synced::Changed(pending) => pending,
        };

        let plan = CascadePlan::from_pending(&pending);
        debug!(
            items = plan.items.len(),
            bids = plan.bids.len(),
            dropped = plan.dropped.len(),
            "contract cascade"
        );
        self.cascade(member_id, &plan, cancel).await?;

        self.ctx.finish(pending, &self.contracts, cancel).await
    }

    async fn cascade(
        &self,
        member_id: i64,
        plan: &CascadePlan,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        for &contract_id in &plan.items {
            let target = Target::child(
                Endpoint::ContractItems,
                member_id,
                contract_id,
                ApplyOrder::DeleteFirst,
            );
            self.ctx.sync_child(target, &self.items, cancel).await?;
        }

        for &contract_id in &plan.bids {
            let target = Target::child(
                Endpoint::ContractBids,
                member_id,
                contract_id,
                ApplyOrder::DeleteFirst,
            );
            self.ctx.sync_child(target, &self.bids, cancel).await?;
        }

        for &contract_id in &plan.dropped {
            let scope = Scope::child(member_id, contract_id);
            if let Err(e) = self.items.clear(scope).await {
                warn!(contract_id, error = %e, "failed to drop contract items");
            }
            if let Err(e) = self.bids.clear(scope).await {
                warn!(contract_id, error = %e, "failed to drop contract bids");
            }
            self.ctx.invalidate::<ContractItem>(scope).await;
            self.ctx.invalidate::<ContractBid>(scope).await;
        }
        Ok(())
    }

    /// Serves stored contracts.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<Contract>, IngestError> {
        self.ctx.read(&self.contracts, Scope::member(member_id), page).await
    }

    /// Serves the stored items of one contract.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn items(&self, member_id: i64, contract_id: i64) -> Result<Vec<ContractItem>, IngestError> {
        self.ctx
            .read(&self.items, Scope::child(member_id, contract_id), None)
            .await
    }

    /// Serves the stored bids of one contract.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn bids(&self, member_id: i64, contract_id: i64) -> Result<Vec<ContractBid>, IngestError> {
        self.ctx
            .read(&self.bids, Scope::child(member_id, contract_id), None)
            .await
    }
}

#[async_trait]
impl Ingestor for ContractIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Contracts
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        ContractIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::Contracts, &EndpointParams::member(member_id))
            .await
    }
}
