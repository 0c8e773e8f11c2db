//! Full ingestion cycles against a mock API and an in-memory store.

mod support;

use ingestor_core::ingest::{Contact, ContactIngestor};
use ingestor_core::{EntityKind, IngestEntity, Ingestor, PageParams, SyncService};
use serde_json::json;
use support::socket_guard::start_mock_server_or_skip;
use support::{FAR_FUTURE, Harness, LONG_AGO, MEMBER_ID};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn contacts_path() -> String {
    format!("/characters/{MEMBER_ID}/contacts/")
}

fn faction(id: i64, standing: f64) -> serde_json::Value {
    json!({"contact_id": id, "contact_type": "faction", "standing": standing})
}

fn sorted(mut contacts: Vec<Contact>) -> Vec<Contact> {
    contacts.sort_by_key(|c| c.contact_id);
    contacts
}

async fn mount_once(server: &MockServer, etag: &str, expires: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(contacts_path()))
        .and(header("authorization", "Bearer token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", etag)
                .insert_header("expires", expires)
                .set_body_json(body),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_contacts_cycle_creates_updates_and_deletes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_once(
        &server,
        "\"c1\"",
        LONG_AGO,
        json!([faction(500_001, 5.0), faction(500_002, 0.0)]),
    )
    .await;
    mount_once(
        &server,
        "\"c2\"",
        FAR_FUTURE,
        json!([faction(500_001, -10.0), faction(500_003, 10.0)]),
    )
    .await;

    let harness = Harness::new(&server.uri()).await;
    let ingestor = ContactIngestor::new(harness.ctx.clone());
    let cancel = CancellationToken::new();

    let first = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    assert_eq!(first.validator, "\"c1\"");
    let stored = sorted(ingestor.get(MEMBER_ID, None).await.unwrap());
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|c| c.contact_kind == EntityKind::Faction));

    let second = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    assert_eq!(second.validator, "\"c2\"");
    let stored = sorted(ingestor.get(MEMBER_ID, None).await.unwrap());
    let ids: Vec<i64> = stored.iter().map(|c| c.contact_id).collect();
    assert_eq!(ids, vec![500_001, 500_003]);
    assert!((stored[0].standing - -10.0).abs() < f64::EPSILON);

    let page = ingestor
        .get(MEMBER_ID, Some(PageParams { offset: 1, limit: 5 }))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn test_fresh_validator_short_circuits_remote_call() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(contacts_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"c1\"")
                .insert_header("expires", FAR_FUTURE)
                .set_body_json(json!([faction(500_001, 5.0)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri()).await;
    let ingestor = ContactIngestor::new(harness.ctx.clone());
    let cancel = CancellationToken::new();

    let first = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    let second = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_not_modified_keeps_snapshot() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_once(&server, "\"c1\"", LONG_AGO, json!([faction(500_001, 5.0)])).await;
    Mock::given(method("GET"))
        .and(path(contacts_path()))
        .and(header("if-none-match", "\"c1\""))
        .respond_with(ResponseTemplate::new(304).insert_header("expires", FAR_FUTURE))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri()).await;
    let ingestor = ContactIngestor::new(harness.ctx.clone());
    let cancel = CancellationToken::new();

    let first = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    let second = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap();
    assert_eq!(second.validator, "\"c1\"");
    assert!(second.expires_at > first.expires_at);
    assert_eq!(ingestor.get(MEMBER_ID, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_cycle_keeps_previous_validator() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_once(&server, "\"c1\"", LONG_AGO, json!([faction(500_001, 5.0)])).await;

    let harness = Harness::new(&server.uri()).await;
    let ingestor = ContactIngestor::new(harness.ctx.clone());
    let first = ingestor
        .ensure_fresh(MEMBER_ID, &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = ingestor.ensure_fresh(MEMBER_ID, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());

    let last = Ingestor::last_validator(&ingestor, MEMBER_ID).await.unwrap();
    assert_eq!(last, Some(first));
    assert_eq!(ingestor.get(MEMBER_ID, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sync_service_reports_each_entity() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_once(&server, "\"c1\"", FAR_FUTURE, json!([faction(500_001, 5.0)])).await;
    Mock::given(method("GET"))
        .and(path(format!("/characters/{MEMBER_ID}/wallet/")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = Harness::new(&server.uri()).await;
    let sync = SyncService::new(&harness.ctx);
    let report = sync
        .ensure_all(
            MEMBER_ID,
            &[IngestEntity::Contacts, IngestEntity::WalletBalance],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.member_id, MEMBER_ID);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(!report.was_cancelled());
    let failed = report.outcomes.iter().find(|o| !o.is_ok()).unwrap();
    assert_eq!(failed.entity, IngestEntity::WalletBalance);
    assert!(failed.last_validator.is_none());

    let shown = sync.show(IngestEntity::Contacts, MEMBER_ID, None).await.unwrap();
    assert_eq!(shown[0]["contact_id"], 500_001);
}
