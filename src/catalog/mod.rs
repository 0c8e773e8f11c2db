//! Bulk import of the public catalog trees.
//!
//! Roots are walked one at a time. Each root's children fan out over a
//! bounded [`TaskPool`], and each of those fans out again over the leaves.
//! A node that cannot be fetched or stored is skipped together with its
//! subtree; the rest of the walk carries on.

mod pool;
mod progress;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use pool::{PoolStats, TaskPool};
pub use progress::{NoopProgress, ProgressHandle, ProgressSink};

use crate::client::constants::LANE_CATALOG;
use crate::client::{FetchError, Pacer};
use crate::endpoint::Endpoint;
use crate::store::Entity;
use crate::universe::{
    Ancestry, Bloodline, Category, Constellation, Group, ItemType, Lookup, Race, Region,
    ResolveError, SolarSystem, UniverseService,
};

/// Workers per root for the middle level (groups, constellations).
pub const DEFAULT_GROUP_WORKERS: usize = 10;

/// Workers per middle node for the leaf level (types, systems).
pub const DEFAULT_TYPE_WORKERS: usize = 5;

/// Which trees to import and whether to report progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub skip_character_tree: bool,
    pub skip_inventory_tree: bool,
    pub skip_location_tree: bool,
    pub disable_progress_output: bool,
}

/// Node counts of one imported tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub imported: usize,
    pub failed: usize,
}

/// Per-tree outcome of an import; `None` for skipped trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inventory: Option<TreeSummary>,
    pub location: Option<TreeSummary>,
    pub character: Option<TreeSummary>,
}

impl ImportSummary {
    /// Failed nodes across all trees.
    #[must_use]
    pub fn failed(&self) -> usize {
        [self.inventory, self.location, self.character]
            .iter()
            .flatten()
            .map(|tree| tree.failed)
            .sum()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to list {tree} roots: {source}")]
    RootList {
        tree: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("catalog import cancelled")]
    Cancelled,
}

impl CatalogError {
    fn root_list(tree: &'static str, source: FetchError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::RootList { tree, source }
        }
    }
}

/// A catalog node that carries the ids of its children.
pub trait Branch: Lookup {
    /// Moves the child ids out, leaving the node's list empty.
    fn take_children(&mut self) -> Vec<i64>;
}

impl Branch for Category {
    fn take_children(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.groups)
    }
}

impl Branch for Group {
    fn take_children(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.types)
    }
}

impl Branch for Region {
    fn take_children(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.constellations)
    }
}

impl Branch for Constellation {
    fn take_children(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.systems)
    }
}

/// Static description of a three-level tree.
#[derive(Debug, Clone, Copy)]
struct TreeShape {
    name: &'static str,
    roots: Endpoint,
    labels: [&'static str; 3],
}

const INVENTORY: TreeShape = TreeShape {
    name: "inventory",
    roots: Endpoint::Categories,
    labels: ["categories", "groups", "types"],
};

const LOCATION: TreeShape = TreeShape {
    name: "location",
    roots: Endpoint::Regions,
    labels: ["regions", "constellations", "systems"],
};

/// Walks the catalog trees into the entity store.
#[derive(Clone)]
pub struct CatalogImporter {
    universe: Arc<UniverseService>,
    pacer: Arc<Pacer>,
    progress: Arc<dyn ProgressSink>,
    group_workers: usize,
    type_workers: usize,
}

impl std::fmt::Debug for CatalogImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogImporter")
            .field("group_workers", &self.group_workers)
            .field("type_workers", &self.type_workers)
            .finish_non_exhaustive()
    }
}

impl CatalogImporter {
    #[must_use]
    pub fn new(universe: Arc<UniverseService>, pacer: Arc<Pacer>) -> Self {
        Self {
            universe,
            pacer,
            progress: Arc::new(NoopProgress),
            group_workers: DEFAULT_GROUP_WORKERS,
            type_workers: DEFAULT_TYPE_WORKERS,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Overrides the pool sizes of the middle and leaf levels.
    #[must_use]
    pub fn with_workers(mut self, group_workers: usize, type_workers: usize) -> Self {
        self.group_workers = group_workers;
        self.type_workers = type_workers;
        self
    }

    /// Imports the trees selected by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RootList`] if a tree's root list cannot be
    /// fetched, or [`CatalogError::Cancelled`]. Individual node failures are
    /// counted in the summary instead.
    #[instrument(skip(self, cancel))]
    pub async fn import(
        &self,
        options: ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary, CatalogError> {
        let sink: Arc<dyn ProgressSink> = if options.disable_progress_output {
            Arc::new(NoopProgress)
        } else {
            Arc::clone(&self.progress)
        };

        let mut summary = ImportSummary::default();
        if !options.skip_inventory_tree {
            let walk = self.walk(&sink, cancel);
            summary.inventory = Some(walk.tree::<Category, Group, ItemType>(INVENTORY).await?);
        }
        if !options.skip_location_tree {
            let walk = self.walk(&sink, cancel);
            summary.location = Some(
                walk.tree::<Region, Constellation, SolarSystem>(LOCATION)
                    .await?,
            );
        }
        if !options.skip_character_tree {
            let walk = self.walk(&sink, cancel);
            summary.character = Some(walk.character_tree().await?);
        }

        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        info!(failed = summary.failed(), "catalog import finished");
        Ok(summary)
    }

    fn walk(&self, sink: &Arc<dyn ProgressSink>, cancel: &CancellationToken) -> Walk {
        Walk {
            universe: Arc::clone(&self.universe),
            pacer: Arc::clone(&self.pacer),
            sink: Arc::clone(sink),
            cancel: cancel.clone(),
            group_workers: self.group_workers,
            type_workers: self.type_workers,
            tally: Arc::new(Tally::default()),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    imported: AtomicUsize,
    failed: AtomicUsize,
    mid_total: AtomicU64,
    leaf_total: AtomicU64,
}

impl Tally {
    fn summary(&self) -> TreeSummary {
        TreeSummary {
            imported: self.imported.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bars {
    mid: ProgressHandle,
    leaf: ProgressHandle,
}

/// State of one tree walk, cloned into every worker.
#[derive(Clone)]
struct Walk {
    universe: Arc<UniverseService>,
    pacer: Arc<Pacer>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    group_workers: usize,
    type_workers: usize,
    tally: Arc<Tally>,
}

impl Walk {
    async fn tree<R: Branch, M: Branch, L: Lookup>(
        &self,
        shape: TreeShape,
    ) -> Result<TreeSummary, CatalogError> {
        self.pacer.acquire(LANE_CATALOG).await;
        let roots: Vec<i64> = self
            .universe
            .list(shape.roots, &self.cancel)
            .await
            .map_err(|e| CatalogError::root_list(shape.name, e))?;
        info!(tree = shape.name, roots = roots.len(), "importing catalog tree");

        let [root_label, mid_label, leaf_label] = shape.labels;
        let root_bar = self.sink.new_bar(root_label, roots.len() as u64);
        let bars = Bars {
            mid: self.sink.new_bar(mid_label, 0),
            leaf: self.sink.new_bar(leaf_label, 0),
        };

        for root in roots {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(children) = self.node::<R>(root).await {
                self.grow(bars.mid, &self.tally.mid_total, children.len());
                let walk = self.clone();
                TaskPool::new(self.group_workers)
                    .run(children, move |id| {
                        let walk = walk.clone();
                        async move { walk.middle::<M, L>(id, bars).await }
                    })
                    .await;
            }
            self.sink.increment(root_bar);
        }

        for bar in [root_bar, bars.mid, bars.leaf] {
            self.sink.finish(bar);
        }
        if self.cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        let summary = self.tally.summary();
        info!(tree = shape.name, imported = summary.imported, failed = summary.failed, "catalog tree done");
        Ok(summary)
    }

    async fn middle<M: Branch, L: Lookup>(self, id: i64, bars: Bars) -> bool {
        let Some(children) = self.node::<M>(id).await else {
            self.sink.increment(bars.mid);
            return false;
        };

        self.grow(bars.leaf, &self.tally.leaf_total, children.len());
        let walk = self.clone();
        TaskPool::new(self.type_workers)
            .run(children, move |leaf| {
                let walk = walk.clone();
                async move {
                    let ok = walk.leaf::<L>(leaf).await;
                    walk.sink.increment(bars.leaf);
                    ok
                }
            })
            .await;

        self.sink.increment(bars.mid);
        true
    }

    /// Fetches and stores a branch node, returning its child ids.
    async fn node<B: Branch>(&self, id: i64) -> Option<Vec<i64>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.pacer.acquire(LANE_CATALOG).await;
        let mut node = match self.universe.fetch_remote::<B>(id, None, &self.cancel).await {
            Ok(node) => node,
            Err(e) => {
                self.skip(B::KIND, id, &e);
                return None;
            }
        };

        let children = node.take_children();
        if let Err(e) = self.universe.save(&node).await {
            self.skip(B::KIND, id, &e);
            return None;
        }
        self.tally.imported.fetch_add(1, Ordering::SeqCst);
        debug!(kind = B::KIND, id, children = children.len(), "imported node");
        Some(children)
    }

    async fn leaf<L: Lookup>(&self, id: i64) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.pacer.acquire(LANE_CATALOG).await;
        let result = match self.universe.fetch_remote::<L>(id, None, &self.cancel).await {
            Ok(entity) => self.universe.save(&entity).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.tally.imported.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                self.skip(L::KIND, id, &e);
                false
            }
        }
    }

    async fn character_tree(&self) -> Result<TreeSummary, CatalogError> {
        self.flat::<Race>(Endpoint::Races, "races").await?;
        self.flat::<Bloodline>(Endpoint::Bloodlines, "bloodlines").await?;
        self.flat::<Ancestry>(Endpoint::Ancestries, "ancestries").await?;
        Ok(self.tally.summary())
    }

    /// Imports a list endpoint whose entries are complete entities.
    async fn flat<T: Entity>(&self, endpoint: Endpoint, label: &'static str) -> Result<(), CatalogError> {
        self.pacer.acquire(LANE_CATALOG).await;
        let entries: Vec<T> = self
            .universe
            .list(endpoint, &self.cancel)
            .await
            .map_err(|e| CatalogError::root_list(label, e))?;

        let bar = self.sink.new_bar(label, entries.len() as u64);
        stream::iter(&entries)
            .for_each_concurrent(self.type_workers.max(1), |entry| async move {
                match self.universe.save(entry).await {
                    Ok(()) => {
                        self.tally.imported.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => self.skip(T::KIND, entry.id(), &e),
                }
                self.sink.increment(bar);
            })
            .await;
        self.sink.finish(bar);
        Ok(())
    }

    fn grow(&self, bar: ProgressHandle, total: &AtomicU64, by: usize) {
        let now = total.fetch_add(by as u64, Ordering::SeqCst) + by as u64;
        self.sink.set_total(bar, now);
    }

    fn skip(&self, kind: &'static str, id: i64, error: &ResolveError) {
        self.tally.failed.fetch_add(1, Ordering::SeqCst);
        if !error.is_cancelled() {
            warn!(kind, id, error = %error, "skipping catalog subtree");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_take_children_empties_node() {
        let mut category = Category {
            id: 6,
            name: "Ship".to_string(),
            published: true,
            groups: vec![25, 26],
        };
        assert_eq!(category.take_children(), vec![25, 26]);
        assert!(category.groups.is_empty());
    }

    #[test]
    fn test_import_summary_failed_sums_present_trees() {
        let summary = ImportSummary {
            inventory: Some(TreeSummary { imported: 10, failed: 2 }),
            location: None,
            character: Some(TreeSummary { imported: 4, failed: 1 }),
        };
        assert_eq!(summary.failed(), 3);
    }

    #[test]
    fn test_catalog_error_maps_cancelled_root_list() {
        assert!(matches!(
            CatalogError::root_list("inventory", FetchError::Cancelled),
            CatalogError::Cancelled
        ));
        let err = CatalogError::root_list("inventory", FetchError::status("/universe/categories/", 503));
        assert_eq!(
            err.to_string(),
            "failed to list inventory roots: HTTP 503 requesting /universe/categories/"
        );
    }
}
