//! Member assets (paginated).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Synced, Target, to_json};
use crate::classify::EntityKind;
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::CacheValidator;
use crate::reconcile::ApplyOrder;
use crate::resolve::{ForeignRef, RefRole, References};
use crate::store::{PageParams, Record, Scope, SqliteRecordStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub item_id: i64,
    pub type_id: i64,
    pub location_id: i64,
    pub location_flag: String,
    /// `station`, `solar_system`, `item` or `other`.
    pub location_type: String,
    pub quantity: i32,
    pub is_singleton: bool,
    #[serde(default)]
    pub is_blueprint_copy: Option<bool>,
    #[serde(default)]
    pub location_kind: EntityKind,
}

impl Record for Asset {
    const KIND: &'static str = "asset";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.item_id
    }
}

impl References for Asset {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        // Items inside containers point at another asset, not an entity.
        match self.location_type.as_str() {
            "item" => Vec::new(),
            "station" => vec![ForeignRef::hinted(
                self.location_id,
                RefRole::Location,
                EntityKind::Station,
            )],
            "solar_system" => vec![ForeignRef::hinted(
                self.location_id,
                RefRole::Location,
                EntityKind::SolarSystem,
            )],
            _ => vec![ForeignRef::new(self.location_id, RefRole::Location)],
        }
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        if role == RefRole::Location {
            self.location_kind = kind;
        }
    }
}

/// Independent collection: delete, update, create. No cascade.
#[derive(Debug, Clone)]
pub struct AssetIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<Asset>,
}

impl AssetIngestor {
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
        let target = Target::member(Endpoint::Assets, member_id, ApplyOrder::DeleteFirst);
        match self
            .ctx
            .sync_collection(target, &self.repo, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => Ok(validator),
            Synced::Changed(pending) => self.ctx.finish(pending, &self.repo, cancel).await,
        }
    }

    /// Serves stored assets.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<Asset>, IngestError> {
        self.ctx.read(&self.repo, Scope::member(member_id), page).await
    }
}

#[async_trait]
impl Ingestor for AssetIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Assets
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        AssetIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::Assets, &EndpointParams::member(member_id))
            .await
    }
}
