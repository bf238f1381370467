//! # Materialization Cache
//!
//! Keyed by configuration fingerprint, backed by `moka::sync::Cache`.
//!
//! - At most one build per fingerprint: concurrent callers of the same key
//!   wait on the single in-flight initialization (`try_get_with`).
//! - Failed builds are not cached; the next caller retries.
//! - Entries are evicted by capacity and time to live.
//!
//! The optional durable layer (`ondisk=<dir>`) sits underneath: a miss first
//! consults the store in that directory when `ondisk.reuse=true`.

use crate::config::Fingerprint;
use crate::graph::Graph;
use crate::sink::GraphCounts;
use crate::storage::DurableStore;
use crate::QuarryError;
use moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// CACHE ENTRY
// =============================================================================

/// A finished materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub fingerprint: Fingerprint,
    pub graph: Graph,
    /// Quads per produced graph, for audit.
    pub counts: GraphCounts,
    /// Where the durable copy lives, if one was requested.
    pub durable_path: Option<PathBuf>,
}

impl Materialized {
    /// Wrap a collected graph with the counts its sink kept while emitting.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, graph: Graph, counts: GraphCounts) -> Self {
        Self {
            fingerprint,
            graph,
            counts,
            durable_path: None,
        }
    }

    /// Wrap a graph read back from a durable store. Nothing was emitted, so
    /// the counts are taken from the graph itself.
    #[must_use]
    pub fn reloaded(fingerprint: Fingerprint, graph: Graph) -> Self {
        let counts = GraphCounts::of(&graph);
        Self::new(fingerprint, graph, counts)
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Shared cache of materializations.
pub struct MaterializationCache {
    entries: Cache<Fingerprint, Arc<Materialized>>,
    builds: AtomicU64,
}

impl std::fmt::Debug for MaterializationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializationCache")
            .field("entries", &self.entries.entry_count())
            .field("builds", &self.builds.load(Ordering::Relaxed))
            .finish()
    }
}

impl MaterializationCache {
    #[must_use]
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();
        Self {
            entries,
            builds: AtomicU64::new(0),
        }
    }

    /// Return the cached materialization or run `build` exactly once.
    ///
    /// Concurrent callers with the same fingerprint block until the single
    /// build finishes and then share its result. A failed build publishes
    /// nothing; every waiting caller receives the error.
    pub fn get_or_build<F>(
        &self,
        fingerprint: Fingerprint,
        build: F,
    ) -> Result<Arc<Materialized>, QuarryError>
    where
        F: FnOnce() -> Result<Materialized, QuarryError>,
    {
        self.entries
            .try_get_with(fingerprint, || {
                self.builds.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%fingerprint, "cache miss, building");
                build().map(Arc::new)
            })
            .map_err(|e: Arc<QuarryError>| (*e).clone())
    }

    /// Lookup without building.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Materialized>> {
        self.entries.get(fingerprint)
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint);
    }

    /// Drop every entry; later lookups rebuild.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        tracing::debug!("cache invalidated");
    }

    /// Number of builds started since creation.
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Approximate number of live entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// DURABLE LAYER
// =============================================================================

/// Serve a materialization from the store in `dir`, or build and persist it.
///
/// With `reuse` an existing store is loaded as-is. The check is path-based:
/// a store written under a different fingerprint is still served, with a
/// warning.
pub fn load_or_build_durable<F>(
    dir: &Path,
    reuse: bool,
    fingerprint: Fingerprint,
    locator: &str,
    build: F,
) -> Result<Materialized, QuarryError>
where
    F: FnOnce() -> Result<(Graph, GraphCounts), QuarryError>,
{
    if reuse && DurableStore::exists_in(dir) {
        let store = DurableStore::open(dir)?;
        match store.stored_fingerprint()? {
            Some(stored) if stored == fingerprint.to_hex() => {}
            stored => tracing::warn!(
                path = %store.path().display(),
                stored = stored.as_deref().unwrap_or("none"),
                requested = %fingerprint,
                "reusing durable store written by a different configuration"
            ),
        }
        let graph = store.read_graph()?;
        tracing::info!(path = %store.path().display(), quads = graph.len(), "reused durable store");
        let mut materialized = Materialized::reloaded(fingerprint, graph);
        materialized.durable_path = Some(store.path().to_path_buf());
        return Ok(materialized);
    }

    let (graph, counts) = build()?;
    let store = DurableStore::open(dir)?;
    store.write_graph(&graph, &fingerprint, locator)?;
    let mut materialized = Materialized::new(fingerprint, graph, counts);
    materialized.durable_path = Some(store.path().to_path_buf());
    Ok(materialized)
}

// =============================================================================
// TESTS
// =============================================================================
