//! Trained skills, the skill point summary, and the training queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Synced, Target, to_json};
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::{CacheValidator, Fetched};
use crate::reconcile::ApplyOrder;
use crate::resolve::References;
use crate::store::{PageParams, Record, RecordRepository, Scope, SqliteRecordStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub skill_id: i64,
    pub active_skill_level: i32,
    pub trained_skill_level: i32,
    pub skillpoints_in_skill: i64,
}

impl Record for Skill {
    const KIND: &'static str = "skill";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.skill_id
    }
}

impl References for Skill {}

/// Totals stored next to the skill list, one row per member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSummary {
    pub member_id: i64,
    pub total_sp: i64,
    #[serde(default)]
    pub unallocated_sp: Option<i64>,
}

impl Record for SkillSummary {
    const KIND: &'static str = "skill_summary";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.member_id
    }
}

/// The skills endpoint returns the list together with the totals.
#[derive(Debug, Deserialize)]
struct SkillSheet {
    skills: Vec<Skill>,
    total_sp: i64,
    #[serde(default)]
    unallocated_sp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillQueueEntry {
    pub queue_position: i32,
    pub skill_id: i64,
    pub finished_level: i32,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub training_start_sp: Option<i64>,
    #[serde(default)]
    pub level_start_sp: Option<i64>,
    #[serde(default)]
    pub level_end_sp: Option<i64>,
}

impl Record for SkillQueueEntry {
    const KIND: &'static str = "skill_queue_entry";
    type Key = i32;

    fn natural_key(&self) -> i32 {
        self.queue_position
    }
}

impl References for SkillQueueEntry {}

#[derive(Debug, Clone)]
pub struct SkillIngestor {
    ctx: IngestContext,
    skills: SqliteRecordStore<Skill>,
    summaries: SqliteRecordStore<SkillSummary>,
}

impl SkillIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let db = ctx.db().clone();
        Self {
            ctx,
            skills: SqliteRecordStore::new(db.clone()),
            summaries: SqliteRecordStore::new(db),
        }
    }

    /// Runs one ingestion cycle and stores the summary.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures, or cancellation. A failed summary write
    /// is logged.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let target = Target::member(Endpoint::Skills, member_id, ApplyOrder::DeleteFirst);
        if let Some(validator) = self
            .ctx
            .fresh_validator(target.endpoint, &target.params)
            .await?
        {
            return Ok(validator);
        }

        let (sheet, validator) = match self
            .ctx
            .fetcher()
            .fetch_deferred::<SkillSheet>(target.endpoint, &target.params, cancel)
            .await?
        {
            Fetched::NotModified { validator } => return Ok(validator),
            Fetched::Fresh { value, validator } => (value, validator),
        };

        let summary = SkillSummary {
            member_id,
            total_sp: sheet.total_sp,
            unallocated_sp: sheet.unallocated_sp,
        };
        let pending = self
            .ctx
            .apply_snapshot(
                target,
                &self.skills,
                self.ctx.resolver(),
                sheet.skills,
                validator,
                cancel,
            )
            .await?;

        if let Err(e) = self.summaries.upsert(target.scope, &summary).await {
            warn!(error = %e, "failed to store skill summary");
        }
        self.ctx.invalidate::<SkillSummary>(target.scope).await;

        self.ctx.finish(pending, &self.skills, cancel).await
    }

    /// Serves stored skills.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<Skill>, IngestError> {
        self.ctx.read(&self.skills, Scope::member(member_id), page).await
    }

    /// Serves the stored summary.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn summary(&self, member_id: i64) -> Result<Option<SkillSummary>, IngestError> {
        let rows = self
            .ctx
            .read(&self.summaries, Scope::member(member_id), None)
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Ingestor for SkillIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Skills
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        SkillIngestor::ensure_fresh(self, member_id, cancel).await
    }

    async fn get_json(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError> {
        let skills = self.get(member_id, page).await?;
        let summary = self.summary(member_id).await?;
        to_json(&serde_json::json!({ "summary": summary, "skills": skills }))
    }

    async fn last_validator(&self, member_id: i64) -> Result<Option<CacheValidator>, IngestError> {
        self.ctx
            .stored_validator(Endpoint::Skills, &EndpointParams::member(member_id))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct SkillQueueIngestor {
    ctx: IngestContext,
    repo: SqliteRecordStore<SkillQueueEntry>,
}

impl SkillQueueIngestor {
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
        let target = Target::member(Endpoint::SkillQueue, member_id, ApplyOrder::DeleteFirst);
        match self
            .ctx
            .sync_collection(target, &self.repo, self.ctx.resolver(), cancel)
            .await?
        {
            Synced::Unchanged(validator) => Ok(validator),
            Synced::Changed(pending) => self.ctx.finish(pending, &self.repo, cancel).await,
        }
    }

    /// Serves the stored queue in position order.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(
        &self,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<Vec<SkillQueueEntry>, IngestError> {
        self.ctx.read(&self.repo, Scope::member(member_id), page).await
    }
}

#[async_trait]
impl Ingestor for SkillQueueIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::SkillQueue
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        SkillQueueIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::SkillQueue, &EndpointParams::member(member_id))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_sheet_decodes_totals() {
        let sheet: SkillSheet = serde_json::from_str(
            r#"{"skills":[{"skill_id":3300,"active_skill_level":5,"trained_skill_level":5,
                "skillpoints_in_skill":256000}],"total_sp":5000000}"#,
        )
        .unwrap();
        assert_eq!(sheet.skills.len(), 1);
        assert_eq!(sheet.total_sp, 5_000_000);
        assert_eq!(sheet.unallocated_sp, None);
    }

    #[test]
    fn test_skill_queue_keyed_by_position() {
        let entry: SkillQueueEntry = serde_json::from_str(
            r#"{"queue_position":2,"skill_id":3300,"finished_level":4}"#,
        )
        .unwrap();
        assert_eq!(entry.natural_key(), 2);
    }
}
