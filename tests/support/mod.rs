//! Shared wiring for integration tests against a mock API.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;

use ingestor_core::{
    ApiClient, CacheStore, ClientConfig, ConditionalFetcher, Database, EndpointTable,
    EntityStore, IngestContext, MemoryCache, Pacer, ReferenceResolver, SqliteValidatorStore,
    StaticTokenSource, UniverseService,
};

pub const MEMBER_ID: i64 = 2_112_000_001;
pub const FAR_FUTURE: &str = "Wed, 21 Oct 2037 07:28:00 GMT";
pub const LONG_AGO: &str = "Thu, 01 Jan 2015 00:00:00 GMT";

/// Every service wired to one in-memory database and `base_url`.
pub struct Harness {
    pub db: Database,
    pub cache: Arc<dyn CacheStore>,
    pub fetcher: ConditionalFetcher,
    pub universe: Arc<UniverseService>,
    pub pacer: Arc<Pacer>,
    pub ctx: IngestContext,
}

impl Harness {
    pub async fn new(base_url: &str) -> Self {
        Self::with_db(base_url, Database::new_in_memory().await.unwrap()).await
    }

    pub async fn with_db(base_url: &str, db: Database) -> Self {
        let config = ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let fetcher = ConditionalFetcher::new(
            client,
            Arc::new(EndpointTable::new()),
            Arc::new(SqliteValidatorStore::with_cache(db.clone(), Arc::clone(&cache))),
            Arc::new(StaticTokenSource::new("token")),
        )
        .with_max_attempts(1);

        let universe = Arc::new(UniverseService::new(
            fetcher.clone(),
            EntityStore::new(db.clone()),
            Arc::clone(&cache),
        ));
        let pacer = Arc::new(Pacer::disabled());
        let ctx = IngestContext::new(
            fetcher.clone(),
            ReferenceResolver::new(Arc::clone(&universe)),
            Arc::clone(&cache),
            db.clone(),
            Arc::clone(&pacer),
        );

        Self {
            db,
            cache,
            fetcher,
            universe,
            pacer,
            ctx,
        }
    }
}
