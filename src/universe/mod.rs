//! Typed universe lookups shared by reference resolution and catalog import.
//!
//! Every lookup walks the same tiers: fast cache, entity store, remote API.
//! A remote hit is written back to the store and then the cache.

pub mod models;

pub use models::{
    Alliance, Ancestry, Bloodline, Category, Character, Constellation, Corporation, Group,
    ItemType, Lookup, NameEntry, Race, Region, SolarSystem, Station, Structure,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::cache::{self, CacheStore};
use crate::client::{FetchError, Pacer};
use crate::endpoint::{Endpoint, EndpointParams};
use crate::etag::ConditionalFetcher;
use crate::store::{Entity, EntityStore, StoreError};

/// How long resolved entities stay in the fast cache.
pub const DEFAULT_ENTITY_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound of ids per bulk name call.
pub const MAX_NAMES_PER_CALL: usize = 1000;

/// A typed lookup failed. Never fatal to a resolution batch.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to fetch {kind} {id}: {source}")]
    Fetch {
        kind: &'static str,
        id: i64,
        #[source]
        source: FetchError,
    },

    #[error("failed to store {kind} {id}: {source}")]
    Store {
        kind: &'static str,
        id: i64,
        #[source]
        source: StoreError,
    },

    #[error("{kind} {id} needs a member to authenticate the lookup")]
    MemberRequired { kind: &'static str, id: i64 },

    #[error("bulk name lookup failed: {0}")]
    Names(#[source] FetchError),

    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    fn fetch(kind: &'static str, id: i64, source: FetchError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Fetch { kind, id, source }
        }
    }

    fn names(source: FetchError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Names(source)
        }
    }

    /// True when the lookup stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status of the failed remote call, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Fetch { source, .. } | Self::Names(source) => source.status_code(),
            _ => None,
        }
    }
}

fn entity_cache_key(kind: &str, id: i64) -> String {
    format!("entity:{kind}:{id}")
}

/// Typed lookups over cache, store and remote.
#[derive(Clone)]
pub struct UniverseService {
    fetcher: ConditionalFetcher,
    entities: EntityStore,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl std::fmt::Debug for UniverseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniverseService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UniverseService {
    /// Creates a lookup service.
    #[must_use]
    pub fn new(fetcher: ConditionalFetcher, entities: EntityStore, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            fetcher,
            entities,
            cache,
            ttl: DEFAULT_ENTITY_TTL,
        }
    }

    /// Overrides the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The fetcher used for remote calls.
    #[must_use]
    pub fn fetcher(&self) -> &ConditionalFetcher {
        &self.fetcher
    }

    /// The backing entity store.
    #[must_use]
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// Looks up `T` by id: cache, then store, then remote.
    ///
    /// `member_id` authenticates lookups of member-visible entities.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the remote fetch or the store write fails.
    pub async fn lookup<T: Lookup>(
        &self,
        id: i64,
        member_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<T, ResolveError> {
        self.lookup_paced(id, member_id, None, cancel).await
    }

    /// Like [`lookup`](Self::lookup), waiting on `pacing` only when the
    /// entity has to come from the remote API.
    ///
    /// # Errors
    ///
    /// See [`lookup`](Self::lookup).
    #[instrument(skip(self, pacing, cancel), fields(kind = T::KIND))]
    pub async fn lookup_paced<T: Lookup>(
        &self,
        id: i64,
        member_id: Option<i64>,
        pacing: Option<(&Pacer, &str)>,
        cancel: &CancellationToken,
    ) -> Result<T, ResolveError> {
        let key = entity_cache_key(T::KIND, id);
        if let Some(hit) = cache::get_json::<T>(self.cache.as_ref(), &key).await {
            debug!("served from cache");
            return Ok(hit);
        }

        match self.entities.find::<T>(id).await {
            Ok(Some(stored)) => {
                cache::set_json(self.cache.as_ref(), &key, &stored, self.ttl).await;
                debug!("served from store");
                return Ok(stored);
            }
            Ok(None) => {}
            Err(source) => {
                tracing::warn!(error = %source, "entity store read failed, going remote");
            }
        }

        if let Some((pacer, lane)) = pacing {
            pacer.acquire(lane).await;
        }
        let fetched = self.fetch_remote::<T>(id, member_id, cancel).await?;
        self.save(&fetched).await?;
        Ok(fetched)
    }

    /// Fetches `T` from the remote API only, without touching store or cache.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Fetch`] or [`ResolveError::MemberRequired`].
    pub async fn fetch_remote<T: Lookup>(
        &self,
        id: i64,
        member_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<T, ResolveError> {
        let params = if T::NEEDS_MEMBER {
            let member = member_id.ok_or(ResolveError::MemberRequired { kind: T::KIND, id })?;
            EndpointParams::member_entity(member, id)
        } else {
            EndpointParams::entity(id)
        };

        let mut entity: T = self
            .fetcher
            .fetch_fresh(T::ENDPOINT, &params, cancel)
            .await
            .map_err(|e| ResolveError::fetch(T::KIND, id, e))?;
        entity.assign_id(id);
        Ok(entity)
    }

    /// Writes an entity to the store, then to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Store`] if the store write fails.
    pub async fn save<T: Entity>(&self, entity: &T) -> Result<(), ResolveError> {
        self.entities
            .put(entity)
            .await
            .map_err(|source| ResolveError::Store {
                kind: T::KIND,
                id: entity.id(),
                source,
            })?;
        cache::set_json(
            self.cache.as_ref(),
            &entity_cache_key(T::KIND, entity.id()),
            entity,
            self.ttl,
        )
        .await;
        Ok(())
    }

    /// Fetches a public list endpoint (region ids, races, ...).
    ///
    /// # Errors
    ///
    /// Returns the underlying [`FetchError`].
    pub async fn list<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, FetchError> {
        self.fetcher
            .fetch_fresh(endpoint, &EndpointParams::default(), cancel)
            .await
    }

    pub async fn character(&self, id: i64, cancel: &CancellationToken) -> Result<Character, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn corporation(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<Corporation, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn alliance(&self, id: i64, cancel: &CancellationToken) -> Result<Alliance, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn station(&self, id: i64, cancel: &CancellationToken) -> Result<Station, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    /// Structures are only visible to members with access; `member_id`
    /// authenticates the call.
    pub async fn structure(
        &self,
        id: i64,
        member_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Structure, ResolveError> {
        self.lookup(id, Some(member_id), cancel).await
    }

    pub async fn solar_system(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<SolarSystem, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn constellation(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<Constellation, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn region(&self, id: i64, cancel: &CancellationToken) -> Result<Region, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    pub async fn item_type(&self, id: i64, cancel: &CancellationToken) -> Result<ItemType, ResolveError> {
        self.lookup(id, None, cancel).await
    }

    /// Bulk name lookup for ids that cannot be classified locally.
    ///
    /// Ids are deduplicated and sent in chunks of [`MAX_NAMES_PER_CALL`].
    /// Answers are persisted so later reads can show them.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Names`] if any chunk fails.
    #[instrument(skip(self, ids, cancel), fields(count = ids.len()))]
    pub async fn names(
        &self,
        ids: &BTreeSet<i64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NameEntry>, ResolveError> {
        let ids: Vec<i64> = ids.iter().copied().collect();
        let mut entries = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_NAMES_PER_CALL) {
            let mut answered: Vec<NameEntry> = self
                .fetcher
                .post_json(Endpoint::Names, &EndpointParams::default(), chunk, cancel)
                .await
                .map_err(ResolveError::names)?;
            entries.append(&mut answered);
        }

        for entry in &entries {
            if let Err(e) = self.entities.put(entry).await {
                tracing::warn!(id = entry.id, error = %e, "failed to persist name entry");
            }
        }

        debug!(resolved = entries.len(), "bulk names resolved");
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_cache_key_shape() {
        assert_eq!(entity_cache_key("station", 60_003_760), "entity:station:60003760");
    }

    #[test]
    fn test_resolve_error_maps_cancellation() {
        let err = ResolveError::fetch("station", 1, FetchError::Cancelled);
        assert!(err.is_cancelled());

        let err = ResolveError::fetch("station", 1, FetchError::status("/universe/stations/1/", 404));
        assert!(!err.is_cancelled());
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(
            err.to_string(),
            "failed to fetch station 1: HTTP 404 requesting /universe/stations/1/"
        );
    }
}
