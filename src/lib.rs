//! Ingestor Core Library
//!
//! Keeps a local, reconciled copy of member-scoped collections and public
//! universe data from a cache-validating REST API.
//!
//! # Architecture
//!
//! - [`classify`] - maps bare numeric ids to entity kinds by range
//! - [`client`] - HTTP transport, retries, pacing and error budget
//! - [`endpoint`] - endpoint table: paths, auth, pagination, cache keys
//! - [`etag`] - validator store and the conditional-fetch client
//! - [`reconcile`] - snapshot diffing and ordered application
//! - [`universe`] - typed universe lookups over cache, store and remote
//! - [`resolve`] - foreign-reference resolution for fetched records
//! - [`ingest`] - per-entity ingestion cycles
//! - [`catalog`] - bulk catalog tree import
//! - [`sync`] - runs every ingestor for a member
//! - [`db`], [`store`], [`cache`] - persistence and fast cache

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod catalog;
pub mod classify;
pub mod client;
pub mod db;
pub mod endpoint;
pub mod etag;
pub mod ingest;
pub mod reconcile;
pub mod resolve;
pub mod store;
pub mod sync;
pub mod universe;

// Re-export commonly used types
pub use cache::{CacheStore, MemoryCache};
pub use catalog::{
    CatalogError, CatalogImporter, ImportOptions, ImportSummary, NoopProgress, ProgressHandle,
    ProgressSink, TreeSummary,
};
pub use classify::{EntityKind, classify};
pub use client::{ApiClient, ClientConfig, FetchError, Pacer, StaticTokenSource, TokenSource};
pub use db::{Database, DatabaseOptions, DbError};
pub use endpoint::{Endpoint, EndpointParams, EndpointTable};
pub use etag::{CacheValidator, ConditionalFetcher, FetchMode, Fetched, SqliteValidatorStore, ValidatorStore};
pub use ingest::{IngestContext, IngestEntity, IngestError, Ingestor};
pub use reconcile::{ApplyOrder, Diff, ReconcileError, apply_diff, reconcile};
pub use resolve::{ReferenceResolver, ResolutionReport};
pub use store::{EntityStore, PageParams, Scope, SqliteRecordStore, StoreError};
pub use sync::{EntityOutcome, SyncReport, SyncService};
pub use universe::{ResolveError, UniverseService};
