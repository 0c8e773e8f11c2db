//! Member mail: mailing lists, labels, headers and bodies.
//!
//! Lists and labels are synced first so recipients of type `mailing_list`
//! are known when headers arrive. Sender and recipient resolution runs on the
//! `mail` pacing lane. New headers get their body fetched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{IngestContext, IngestEntity, IngestError, Ingestor, Synced, Target, to_json};
use crate::classify::EntityKind;
use crate::client::FetchError;
use crate::client::constants::LANE_MAIL;
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::{CacheValidator, Fetched};
use crate::reconcile::ApplyOrder;
use crate::resolve::{ForeignRef, ReferenceResolver, RefRole, References};
use crate::store::{PageParams, Record, RecordRepository, Scope, SqliteRecordStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingList {
    pub mailing_list_id: i64,
    pub name: String,
}

impl Record for MailingList {
    const KIND: &'static str = "mailing_list";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.mailing_list_id
    }
}

impl References for MailingList {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailLabel {
    pub label_id: i64,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub unread_count: Option<i32>,
}

impl Record for MailLabel {
    const KIND: &'static str = "mail_label";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.label_id
    }
}

impl References for MailLabel {}

/// The labels endpoint wraps its list in an object.
#[derive(Debug, Deserialize)]
struct LabelSheet {
    #[serde(default)]
    labels: Vec<MailLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecipient {
    pub recipient_id: i64,
    /// `character`, `corporation`, `alliance` or `mailing_list`.
    pub recipient_type: String,
    #[serde(default)]
    pub recipient_kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailHeader {
    pub mail_id: i64,
    #[serde(rename = "from")]
    pub sender_id: i64,
    #[serde(default)]
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub labels: Vec<i64>,
    #[serde(default)]
    pub recipients: Vec<MailRecipient>,
    #[serde(default)]
    pub sender_kind: EntityKind,
}

impl Record for MailHeader {
    const KIND: &'static str = "mail_header";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.mail_id
    }
}

impl References for MailHeader {
    fn foreign_refs(&self) -> Vec<ForeignRef> {
        std::iter::once(ForeignRef::new(self.sender_id, RefRole::Sender))
            .chain(self.recipients.iter().map(|r| {
                ForeignRef::hinted(
                    r.recipient_id,
                    RefRole::Recipient,
                    EntityKind::from_category(&r.recipient_type),
                )
            }))
            .collect()
    }

    fn apply_kind(&mut self, role: RefRole, id: i64, kind: EntityKind) {
        match role {
            RefRole::Sender => self.sender_kind = kind,
            RefRole::Recipient => {
                for recipient in self.recipients.iter_mut().filter(|r| r.recipient_id == id) {
                    recipient.recipient_kind = kind;
                }
            }
            _ => {}
        }
    }
}

/// Full mail content, fetched once per new header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBody {
    #[serde(default)]
    pub mail_id: i64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record for MailBody {
    const KIND: &'static str = "mail_body";
    type Key = i64;

    fn natural_key(&self) -> i64 {
        self.mail_id
    }
}

#[derive(Debug, Clone)]
pub struct MailIngestor {
    ctx: IngestContext,
    senders: ReferenceResolver,
    lists: SqliteRecordStore<MailingList>,
    labels: SqliteRecordStore<MailLabel>,
    headers: SqliteRecordStore<MailHeader>,
    bodies: SqliteRecordStore<MailBody>,
}

impl MailIngestor {
    #[must_use]
    pub fn new(ctx: IngestContext) -> Self {
        let db = ctx.db().clone();
        let senders = ctx.resolver().paced(ctx.pacer().clone(), LANE_MAIL);
        Self {
            ctx,
            senders,
            lists: SqliteRecordStore::new(db.clone()),
            labels: SqliteRecordStore::new(db.clone()),
            headers: SqliteRecordStore::new(db.clone()),
            bodies: SqliteRecordStore::new(db),
        }
    }

    /// Runs one cycle: lists, labels, headers, then bodies of new headers.
    ///
    /// # Errors
    ///
    /// Fetch and reconcile failures of the headers, or cancellation. List,
    /// label and body failures are logged.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        let lists = Target::member(Endpoint::MailingLists, member_id, ApplyOrder::DeleteFirst);
        self.ctx.sync_child(lists, &self.lists, cancel).await?;

        if let Err(e) = self.sync_labels(member_id, cancel).await {
            if e.is_cancelled() {
                return Err(e);
            }
            warn!(error = %e, "mail label sync failed");
        }

        let target = Target::member(Endpoint::MailHeaders, member_id, ApplyOrder::CreateFirst);
        let pending = match self
            .ctx
            .sync_collection(target, &self.headers, &self.senders, cancel)
            .await?
        {
            Synced::Unchanged(validator) => return Ok(validator),
            Synced::Changed(pending) => pending,
        };

        for header in &pending.applied.created {
            self.fetch_body(member_id, header.mail_id, cancel).await?;
        }
        for header in &pending.deleted {
            let body = MailBody {
                mail_id: header.mail_id,
                body: None,
                subject: None,
                timestamp: None,
            };
            if let Err(e) = self.bodies.delete_many(Scope::member(member_id), &[body]).await {
                warn!(mail_id = header.mail_id, error = %e, "failed to drop mail body");
            }
        }
        if !pending.deleted.is_empty() {
            self.ctx.invalidate::<MailBody>(Scope::member(member_id)).await;
        }

        self.ctx.finish(pending, &self.headers, cancel).await
    }

    async fn sync_labels(&self, member_id: i64, cancel: &CancellationToken) -> Result<(), IngestError> {
        let target = Target::member(Endpoint::MailLabels, member_id, ApplyOrder::DeleteFirst);
        if self
            .ctx
            .fresh_validator(target.endpoint, &target.params)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let fetched = self
            .ctx
            .fetcher()
            .fetch_deferred::<LabelSheet>(target.endpoint, &target.params, cancel)
            .await?;
        let Fetched::Fresh { value, validator } = fetched else {
            return Ok(());
        };

        let pending = self
            .ctx
            .apply_snapshot(
                target,
                &self.labels,
                self.ctx.resolver(),
                value.labels,
                validator,
                cancel,
            )
            .await?;
        self.ctx.finish(pending, &self.labels, cancel).await?;
        Ok(())
    }

    async fn fetch_body(
        &self,
        member_id: i64,
        mail_id: i64,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let params = EndpointParams::member_entity(member_id, mail_id);
        let fetched: Result<MailBody, FetchError> = self
            .ctx
            .fetcher()
            .fetch_fresh(Endpoint::MailBody, &params, cancel)
            .await;

        match fetched {
            Ok(mut body) => {
                body.mail_id = mail_id;
                if let Err(e) = self.bodies.upsert(Scope::member(member_id), &body).await {
                    warn!(mail_id, error = %e, "failed to store mail body");
                }
                self.ctx.invalidate::<MailBody>(Scope::member(member_id)).await;
                debug!(mail_id, "mail body stored");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(IngestError::Cancelled),
            Err(e) => {
                warn!(mail_id, error = %e, "mail body fetch failed");
                Ok(())
            }
        }
    }

    /// Serves stored mail headers.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get(&self, member_id: i64, page: Option<PageParams>) -> Result<Vec<MailHeader>, IngestError> {
        self.ctx.read(&self.headers, Scope::member(member_id), page).await
    }

    /// Serves one stored mail body.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn body(&self, member_id: i64, mail_id: i64) -> Result<Option<MailBody>, IngestError> {
        let bodies = self.ctx.read(&self.bodies, Scope::member(member_id), None).await?;
        Ok(bodies.into_iter().find(|b| b.mail_id == mail_id))
    }

    /// Serves stored labels.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn labels(&self, member_id: i64) -> Result<Vec<MailLabel>, IngestError> {
        self.ctx.read(&self.labels, Scope::member(member_id), None).await
    }

    /// Serves stored mailing lists.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn mailing_lists(&self, member_id: i64) -> Result<Vec<MailingList>, IngestError> {
        self.ctx.read(&self.lists, Scope::member(member_id), None).await
    }
}

#[async_trait]
impl Ingestor for MailIngestor {
    fn entity(&self) -> IngestEntity {
        IngestEntity::Mail
    }

    async fn ensure_fresh(
        &self,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<CacheValidator, IngestError> {
        MailIngestor::ensure_fresh(self, member_id, cancel).await
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
            .stored_validator(Endpoint::MailHeaders, &EndpointParams::member(member_id))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header() -> MailHeader {
        serde_json::from_str(
            r#"{"mail_id":7,"from":90000001,"subject":"hi","timestamp":"2025-01-01T00:00:00Z",
                "labels":[1],"recipients":[
                    {"recipient_id":145000001,"recipient_type":"mailing_list"},
                    {"recipient_id":98000001,"recipient_type":"corporation"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_mail_header_refs_hint_recipients() {
        let refs = header().foreign_refs();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].role, RefRole::Sender);
        assert_eq!(refs[1].kind(), EntityKind::MailingList);
        assert_eq!(refs[2].kind(), EntityKind::Corporation);
    }

    #[test]
    fn test_mail_header_apply_kind_targets_matching_recipient() {
        let mut header = header();
        header.apply_kind(RefRole::Recipient, 98_000_001, EntityKind::Corporation);
        header.apply_kind(RefRole::Sender, 90_000_001, EntityKind::Character);

        assert_eq!(header.sender_kind, EntityKind::Character);
        assert_eq!(header.recipients[0].recipient_kind, EntityKind::Unknown);
        assert_eq!(header.recipients[1].recipient_kind, EntityKind::Corporation);
    }

    #[test]
    fn test_recipient_change_is_a_difference() {
        let a = header();
        let mut b = a.clone();
        b.recipients.pop();
        assert_ne!(a, b);
    }

    #[test]
    fn test_label_sheet_decodes_wrapped_list() {
        let sheet: LabelSheet = serde_json::from_str(
            r#"{"total_unread_count":3,"labels":[{"label_id":1,"name":"Inbox","unread_count":3}]}"#,
        )
        .unwrap();
        assert_eq!(sheet.labels.len(), 1);
        assert_eq!(sheet.labels[0].unread_count, Some(3));
    }
}
