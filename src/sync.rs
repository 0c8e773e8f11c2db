//! Runs every member ingestor and collects their outcomes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::etag::CacheValidator;
use crate::ingest::{
    AssetIngestor, ContactIngestor, ContractIngestor, FittingIngestor, IngestContext, IngestEntity,
    IngestError, Ingestor, MailIngestor, SkillIngestor, SkillQueueIngestor, WalletBalanceIngestor,
    WalletJournalIngestor, WalletTransactionIngestor,
};
use crate::store::PageParams;

/// Result of one entity's cycle.
#[derive(Debug)]
pub struct EntityOutcome {
    pub entity: IngestEntity,
    pub result: Result<CacheValidator, IngestError>,
    /// Validator on record after the cycle; on failure this is the stale one.
    pub last_validator: Option<CacheValidator>,
}

impl EntityOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of one member sync, in run order.
#[derive(Debug)]
pub struct SyncReport {
    pub member_id: i64,
    pub outcomes: Vec<EntityOutcome>,
}

impl SyncReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// True if the run stopped early because of cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.result.as_ref().is_err_and(IngestError::is_cancelled))
    }
}

/// Owns one ingestor per entity family.
pub struct SyncService {
    ingestors: Vec<Arc<dyn Ingestor>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entities: Vec<IngestEntity> = self.ingestors.iter().map(|i| i.entity()).collect();
        f.debug_struct("SyncService").field("entities", &entities).finish()
    }
}

impl SyncService {
    /// Builds every ingestor over a shared context.
    #[must_use]
    pub fn new(ctx: &IngestContext) -> Self {
        let ingestors: Vec<Arc<dyn Ingestor>> = vec![
            Arc::new(AssetIngestor::new(ctx.clone())),
            Arc::new(ContactIngestor::new(ctx.clone())),
            Arc::new(ContractIngestor::new(ctx.clone())),
            Arc::new(MailIngestor::new(ctx.clone())),
            Arc::new(SkillIngestor::new(ctx.clone())),
            Arc::new(SkillQueueIngestor::new(ctx.clone())),
            Arc::new(WalletBalanceIngestor::new(ctx.clone())),
            Arc::new(WalletTransactionIngestor::new(ctx.clone())),
            Arc::new(WalletJournalIngestor::new(ctx.clone())),
            Arc::new(FittingIngestor::new(ctx.clone())),
        ];
        Self { ingestors }
    }

    /// Uses an explicit set of ingestors.
    #[must_use]
    pub fn with_ingestors(ingestors: Vec<Arc<dyn Ingestor>>) -> Self {
        Self { ingestors }
    }

    #[must_use]
    pub fn ingestor(&self, entity: IngestEntity) -> Option<&Arc<dyn Ingestor>> {
        self.ingestors.iter().find(|i| i.entity() == entity)
    }

    /// Runs `EnsureFresh` for the selected entities one after another.
    ///
    /// An empty selection means every entity. A failure is recorded and the
    /// run moves on; cancellation ends the run after recording it.
    #[instrument(skip(self, selection, cancel))]
    pub async fn ensure_all(
        &self,
        member_id: i64,
        selection: &[IngestEntity],
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut outcomes = Vec::new();

        for ingestor in &self.ingestors {
            let entity = ingestor.entity();
            if !selection.is_empty() && !selection.contains(&entity) {
                continue;
            }

            let result = if cancel.is_cancelled() {
                Err(IngestError::Cancelled)
            } else {
                ingestor.ensure_fresh(member_id, cancel).await
            };

            let last_validator = match &result {
                Ok(validator) => Some(validator.clone()),
                Err(e) => {
                    if !e.is_cancelled() {
                        warn!(%entity, error = %e, "entity sync failed");
                    }
                    ingestor.last_validator(member_id).await.ok().flatten()
                }
            };
            let stop = result.as_ref().is_err_and(IngestError::is_cancelled);
            outcomes.push(EntityOutcome {
                entity,
                result,
                last_validator,
            });
            if stop {
                break;
            }
        }

        let report = SyncReport { member_id, outcomes };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "member sync finished"
        );
        report
    }

    /// Serves one entity's stored snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Store failures of the selected ingestor.
    pub async fn show(
        &self,
        entity: IngestEntity,
        member_id: i64,
        page: Option<PageParams>,
    ) -> Result<serde_json::Value, IngestError> {
        match self.ingestor(entity) {
            Some(ingestor) => ingestor.get_json(member_id, page).await,
            None => Ok(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::client::FetchError;

    struct Scripted {
        entity: IngestEntity,
        outcome: fn() -> Result<CacheValidator, IngestError>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(entity: IngestEntity, outcome: fn() -> Result<CacheValidator, IngestError>) -> Arc<Self> {
            Arc::new(Self {
                entity,
                outcome,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn ok() -> Result<CacheValidator, IngestError> {
        Ok(CacheValidator::new("assets:1:-", "\"v1\"", Utc::now()))
    }

    fn not_found() -> Result<CacheValidator, IngestError> {
        Err(IngestError::Fetch(FetchError::status("/characters/1/contacts/", 404)))
    }

    fn cancelled() -> Result<CacheValidator, IngestError> {
        Err(IngestError::Cancelled)
    }

    #[async_trait]
    impl Ingestor for Scripted {
        fn entity(&self) -> IngestEntity {
            self.entity
        }

        async fn ensure_fresh(
            &self,
            _member_id: i64,
            _cancel: &CancellationToken,
        ) -> Result<CacheValidator, IngestError> {
            *self.calls.lock().unwrap() += 1;
            (self.outcome)()
        }

        async fn get_json(
            &self,
            _member_id: i64,
            _page: Option<PageParams>,
        ) -> Result<serde_json::Value, IngestError> {
            Ok(serde_json::json!([self.entity.as_str()]))
        }

        async fn last_validator(&self, _member_id: i64) -> Result<Option<CacheValidator>, IngestError> {
            Ok(Some(CacheValidator::new("stale", "\"v0\"", Utc::now())))
        }
    }

    fn service(ingestors: &[Arc<Scripted>]) -> SyncService {
        SyncService::with_ingestors(
            ingestors
                .iter()
                .map(|i| Arc::clone(i) as Arc<dyn Ingestor>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_sync_ensure_all_continues_past_failures() {
        let assets = Scripted::new(IngestEntity::Assets, ok);
        let contacts = Scripted::new(IngestEntity::Contacts, not_found);
        let skills = Scripted::new(IngestEntity::Skills, ok);
        let sync = service(&[assets, Arc::clone(&contacts), Arc::clone(&skills)]);

        let report = sync.ensure_all(1, &[], &CancellationToken::new()).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(skills.calls(), 1);
        let failed = &report.outcomes[1];
        assert_eq!(failed.entity, IngestEntity::Contacts);
        assert_eq!(failed.last_validator.as_ref().unwrap().key, "stale");
    }

    #[tokio::test]
    async fn test_sync_ensure_all_honours_selection() {
        let assets = Scripted::new(IngestEntity::Assets, ok);
        let skills = Scripted::new(IngestEntity::Skills, ok);
        let sync = service(&[Arc::clone(&assets), Arc::clone(&skills)]);

        let report = sync
            .ensure_all(1, &[IngestEntity::Skills], &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(assets.calls(), 0);
        assert_eq!(skills.calls(), 1);
    }

    #[tokio::test]
    async fn test_sync_ensure_all_stops_on_cancellation() {
        let assets = Scripted::new(IngestEntity::Assets, cancelled);
        let skills = Scripted::new(IngestEntity::Skills, ok);
        let sync = service(&[assets, Arc::clone(&skills)]);

        let report = sync.ensure_all(1, &[], &CancellationToken::new()).await;

        assert!(report.was_cancelled());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(skills.calls(), 0);
    }

    #[tokio::test]
    async fn test_sync_show_routes_to_entity() {
        let sync = service(&[Scripted::new(IngestEntity::Fittings, ok)]);
        let json = sync.show(IngestEntity::Fittings, 1, None).await.unwrap();
        assert_eq!(json, serde_json::json!(["fittings"]));
        let missing = sync.show(IngestEntity::Mail, 1, None).await.unwrap();
        assert!(missing.is_null());
    }
}
