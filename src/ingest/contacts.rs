//! Member contacts.

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
pub struct Contact {
    pub contact_id: i64,
    /// `character`, `corporation`, `alliance` or `faction`.
    pub contact_type: String,
    pub standing: f64,
    #[serde(default)]
    pub is_blocked: Option<bool>,
    #[serde(default)]
    pub is_watched: Option<bool>,
    #[serde(default)]
    pub label_ids: Vec<i64>,
    #[serde(default)]
    pub contact_kind: EntityKind,
}

impl Record for Contact {
    const KIND: &'static str = "contact";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.contact_id
    }
}

impl References for Contact {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        vec![ForeignRef::hinted(
            self.contact_id,
            RefRole::Contact,
            EntityKind::from_category(&self.contact_type),
        )]
    }

    fn apply_kind(&mut self, role: RefRole, _id: i64, kind: EntityKind) {
        if role == RefRole::Contact {
            self.contact_kind = kind;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContactIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<Contact>,
}

impl ContactIngestor {
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
        let target = Target::member(Endpoint::Contacts, member_id, ApplyOrder::DeleteFirst);
        match self
            .ctx
            .sync_collection(target, &self.repo, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => Ok(validator),
            Synced::Changed(pending) => self.ctx.finish(pending, &self.repo, cancel).await,
        }
    }

    /// Serves stored contacts.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<Contact>, IngestError> {
        self.ctx.read(&self.repo, Scope::member(member_id), page).await
    }
}

#[async_trait]
impl Ingestor for ContactIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Contacts
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        ContactIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::Contacts, &EndpointParams::member(member_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(contact_id: i64, contact_type: &str) -> Contact {
        Contact {
            contact_id,
            contact_type: contact_type.to_string(),
            standing: 5.0,
            is_blocked: None,
            is_watched: Some(true),
            label_ids: vec![1, 2],
            contact_kind: EntityKind::Unknown,
        }
    }

    #[test]
    fn test_contact_type_hints_kind() {
        let refs = contact(500_001, "faction").foreign_refs();
        assert_eq!(refs[0].kind(), EntityKind::Faction);

        let refs = contact(2_112_000_000, "character").foreign_refs();
        assert_eq!(refs[0].kind(), EntityKind::Character);
    }

    #[test]
    fn test_contact_label_change_is_a_difference() {
        let a = contact(90_000_001, "character");
        let mut b = a.clone();
        b.label_ids.push(3);
        assert_ne!(a, b);
    }
}
