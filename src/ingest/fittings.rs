//! Saved ship fittings and their item rows.
//!
//! A fitting's item list is compared element-wise as part of the fitting, and
//! every created or changed fitting gets its child rows replaced wholesale.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Synced, Target, to_json};
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::CacheValidator;
use crate::reconcile::{ApplyOrder, replace_all};
use crate::resolve::References;
use crate::store::{PageParams, Record, RecordRepository, Scope, SqliteRecordStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittingItem {
    pub type_id: i64,
    pub flag: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fitting {
    pub fitting_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub ship_type_id: i64,
    #[serde(default)]
    pub items: Vec<FittingItem>,
}

impl Fitting {
    /// Child rows in payload order.
    #[must_use]
    pub fn item_rows(&self) -> Vec<FittingItemRow> {
        self.items
            .iter()
            .zip(0_i64..)
            .map(|(item, position)| FittingItemRow {
                position,
                type_id: item.type_id,
                flag: item.flag.clone(),
                quantity: item.quantity,
            })
            .collect()
    }
}

impl Record for Fitting {
    const KIND: &'static str = "fitting";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.fitting_id
    }
}

impl References for Fitting {}

/// One item of a fitting, stored under the fitting's scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittingItemRow {
    pub position: i64,
    pub type_id: i64,
    pub flag: String,
    pub quantity: i32,
}

impl Record for FittingItemRow {
    const KIND: &'static str = "fitting_item";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.position
    }
}

#[derive(Debug, Clone)]
pub struct FittingIngestor {
    ctx: IngestContext,
    fittings: SqliteRecordStore<Fitting>,
    items: SqliteRecordStore<FittingItemRow>,
}

impl FittingIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let db = ctx.db().clone();
        Self {
            ctx,
            fittings: SqliteRecordStore::new(db.clone()),
            items: SqliteRecordStore::new(db),
        }
    }

    /// Runs one cycle, replacing item rows of created and changed fittings.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures, or cancellation. Item row failures are
    /// logged.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let target = Target::member(Endpoint::Fittings, member_id, ApplyOrder::CreateFirst);
        let pending = match self
            .ctx
            .sync_collection(target, &self.fittings, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => return Ok(validator),
            Synced::Changed(pending) => pending,
        };

        for fitting in pending.applied.created.iter().chain(&pending.applied.updated) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let scope = Scope::child(member_id, fitting.fitting_id);
            if let Err(e) = replace_all(&self.items, scope, &fitting.item_rows()).await {
                warn!(fitting_id = fitting.fitting_id, error = %e, "failed to replace fitting items");
            }
            self.ctx.invalidate::<FittingItemRow>(scope).await;
        }

        for fitting in &pending.deleted {
            let scope = Scope::child(member_id, fitting.fitting_id);
            if let Err(e) = self.items.clear(scope).await {
                warn!(fitting_id = fitting.fitting_id, error = %e, "failed to drop fitting items");
            }
            self.ctx.invalidate::<FittingItemRow>(scope).await;
        }

        self.ctx.finish(pending, &self.fittings, cancel).await
    }

    /// Serves stored fittings.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<Fitting>, IngestError> {
        self.ctx.read(&self.fittings, Scope::member(member_id), page).await
    }

    /// Serves the stored item rows of one fitting.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn items(&self, member_id: i64, fitting_id: i64) -> Result<Vec<FittingItemRow>, IngestError> {
        self.ctx
            .read(&self.items, Scope::child(member_id, fitting_id), None)
            .await
    }
}

#[async_trait]
impl Ingestor for FittingIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Fittings
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        FittingIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::Fittings, &EndpointParams::member(member_id))
            .await
    }
}
