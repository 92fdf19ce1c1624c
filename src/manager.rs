//! GraphManager - public entry point of the store
//!
//! Validates inputs, routes each operation to the shard that owns the key,
//! and runs the two protocols that span shards:
//!
//! - **Reciprocal edges**: the local half of an edge is written as part of
//!   the caller's acknowledged request; the mirror half is sent to the
//!   peer's shard from a spawned task (see `settle` for how to wait on it)
//! - **Splits**: a graph's shard count doubles and rows whose placement
//!   changes are copied, the layout is swapped, then the moved originals
//!   are evicted
//!
//! # Usage
//!
//! ```no_run
//! use ursa::{ForeignKeys, GraphManager, LocalKeys};
//!
//! # async fn demo() -> ursa::Result<()> {
//! let manager = GraphManager::default();
//! manager.create_graph_named("people")?;
//!
//! manager.insert("people", "alice", "Alice", LocalKeys::none(), ForeignKeys::none()).await?;
//! let receipt = manager
//!     .insert("people", "bob", "Bob", "alice", ("cities", "paris"))
//!     .await?;
//! receipt.settled().await?;
//!
//! assert!(manager.select_local_keys("people", "alice").await?.contains("bob"));
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value as Json;
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::edges::{ForeignKeys, LocalKeys};
use crate::error::{GraphError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{Graph, GraphInfo, GraphRegistry, Registration, ShardLayout};
use crate::settle::{Receipt, SettleTracker};
use crate::shard::{Pending, ShardHandle, ShardStats};
use crate::{Key, Value};

/// Outcome of `split_graph`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitReport {
    pub graph: String,
    pub old_shard_count: usize,
    pub new_shard_count: usize,
    pub rows_moved: usize,
    pub epoch: u64,
}

/// Mirror half of an edge, addressed to the peer row.
enum Mirror {
    /// Add `other_key` to `key`'s local set.
    Local { key: Key, other_key: Key },
    /// Add `foreign_key` (of `foreign_graph`) to `key`'s foreign set.
    Foreign {
        key: Key,
        foreign_graph: String,
        foreign_key: Key,
    },
}

impl Mirror {
    fn key(&self) -> &str {
        match self {
            Mirror::Local { key, .. } | Mirror::Foreign { key, .. } => key,
        }
    }

    fn send(&self, shard: &ShardHandle) -> Pending<()> {
        match self {
            Mirror::Local { key, other_key } => shard.add_local_edge(key, other_key),
            Mirror::Foreign {
                key,
                foreign_graph,
                foreign_key,
            } => shard.add_foreign_edge(key, foreign_graph, foreign_key),
        }
    }
}

struct Inner {
    registry: GraphRegistry,
    settle: Arc<SettleTracker>,
    metrics: Arc<Metrics>,
}

/// Routes graph operations to shards.
///
/// Cheap to clone; clones share the registry, the settle barrier and the
/// metrics. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct GraphManager {
    inner: Arc<Inner>,
}

impl Default for GraphManager {
    fn default() -> Self {
        Self::build(ManagerConfig::default())
    }
}

impl GraphManager {
    /// Build a manager; fails with `InvalidArgument` if `config` does not
    /// validate.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: GraphRegistry::new(config),
                settle: Arc::new(SettleTracker::default()),
                metrics: Arc::new(Metrics::new()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        self.inner.registry.config()
    }

    fn registry(&self) -> &GraphRegistry {
        &self.inner.registry
    }

    // ── Graphs ──────────────────────────────────────────────────────

    /// Register a graph with a single shard.
    ///
    /// A missing or empty name fails with `InvalidArgument`, a name already
    /// created through this call with `AlreadyExists`. A graph that exists
    /// only because a foreign key pointed at it is claimed instead.
    pub fn create_graph(&self, name: Option<&str>) -> Result<()> {
        let name = name.ok_or_else(|| {
            GraphError::InvalidArgument("Graph name is required".to_string())
        })?;

        match self.registry().register(name)? {
            Registration::Created => {
                self.inner.metrics.record_graph_created(false);
                tracing::info!(graph = name, "graph created");
            }
            Registration::Claimed => {
                tracing::info!(graph = name, "implicit graph claimed");
            }
        }
        Ok(())
    }

    /// `create_graph(Some(name))`.
    pub fn create_graph_named(&self, name: &str) -> Result<()> {
        self.create_graph(Some(name))
    }

    pub fn graph_exists(&self, name: &str) -> bool {
        self.registry().contains(name)
    }

    pub fn list_graphs(&self) -> Vec<GraphInfo> {
        self.registry().list()
    }

    /// Snapshot of a graph's current shards, in layout order.
    pub fn shards(&self, graph: &str) -> Result<Vec<ShardHandle>> {
        Ok(self.registry().get(graph)?.layout().shards.clone())
    }

    pub async fn shard_stats(&self, graph: &str) -> Result<Vec<ShardStats>> {
        let layout = self.registry().get(graph)?.layout();
        join_all(layout.shards.iter().map(ShardHandle::stats))
            .await
            .into_iter()
            .collect()
    }

    fn graph_or_create(&self, name: &str) -> Result<Arc<Graph>> {
        let (graph, created) = self.registry().get_or_create(name)?;
        if created {
            self.inner.metrics.record_graph_created(true);
            tracing::info!(graph = name, "graph created implicitly");
        }
        Ok(graph)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Store a row and the local half of every declared edge.
    ///
    /// Returns once the row's own shard has acknowledged the write. Mirror
    /// writes to the peers (same graph for local keys, the named graph for
    /// foreign keys) are started before returning and tracked by the
    /// receipt. Unknown graphs and peer rows are created on the way.
    pub async fn insert(
        &self,
        graph: &str,
        key: &str,
        value: impl Into<Value>,
        local_keys: impl Into<LocalKeys>,
        foreign_keys: impl Into<ForeignKeys>,
    ) -> Result<Receipt> {
        let local_keys = local_keys.into();
        let foreign_keys = foreign_keys.into();

        for (foreign_graph, _) in foreign_keys.iter() {
            self.registry().validate_name(foreign_graph)?;
        }

        let local = local_keys.into_set();
        let foreign = foreign_keys.into_map();

        let target = self.graph_or_create(graph)?;
        {
            let _gate = target.write_access().await;
            let shard = target.route(key);
            tracing::debug!(graph, key, shard = shard.index(), "insert");
            shard
                .upsert(key, Some(value.into()), local.clone(), foreign.clone())
                .await?;
        }
        self.inner.metrics.record_row_written();

        self.dispatch_mirrors(&target, key, &local, &foreign)
    }

    /// `insert` for dynamically typed edge declarations.
    ///
    /// `local_keys`: null, a key, or an array of keys. `foreign_keys`: null
    /// or an object mapping graph name to a key or an array of keys. Any
    /// other shape fails with `InvalidArgument` before a shard is touched.
    pub async fn insert_dynamic(
        &self,
        graph: &str,
        key: &str,
        value: impl Into<Value>,
        local_keys: &Json,
        foreign_keys: &Json,
    ) -> Result<Receipt> {
        let local_keys = LocalKeys::from_json(local_keys)?;
        let foreign_keys = ForeignKeys::from_json(foreign_keys)?;
        self.insert(graph, key, value, local_keys, foreign_keys).await
    }

    /// Link `key` to `other_key` within `graph`.
    ///
    /// `key` must exist (placeholders count); `other_key` is created as a
    /// placeholder if needed.
    pub async fn add_local_keys(&self, graph: &str, key: &str, other_key: &str) -> Result<Receipt> {
        let source = self.registry().get(graph)?;
        {
            let _gate = source.write_access().await;
            let shard = self.existing_row(&source, key).await?;
            shard.add_local_edge(key, other_key).await?;
        }

        let local = BTreeSet::from([other_key.to_string()]);
        self.dispatch_mirrors(&source, key, &local, &BTreeMap::new())
    }

    /// Link `key` in `graph` to `foreign_key` in `foreign_graph`.
    ///
    /// `key` must exist; `foreign_graph` and `foreign_key` are created if
    /// needed.
    pub async fn add_foreign_keys(
        &self,
        graph: &str,
        key: &str,
        foreign_graph: &str,
        foreign_key: &str,
    ) -> Result<Receipt> {
        self.registry().validate_name(foreign_graph)?;
        let source = self.registry().get(graph)?;
        {
            let _gate = source.write_access().await;
            let shard = self.existing_row(&source, key).await?;
            shard.add_foreign_edge(key, foreign_graph, foreign_key).await?;
        }

        let foreign = BTreeMap::from([(
            foreign_graph.to_string(),
            BTreeSet::from([foreign_key.to_string()]),
        )]);
        self.dispatch_mirrors(&source, key, &BTreeSet::new(), &foreign)
    }

    /// Owning shard of `key`, or `KeyNotFound` if it holds no such row.
    ///
    /// Must be called with the graph's write gate held so the answer
    /// cannot be invalidated by a concurrent split.
    async fn existing_row(&self, graph: &Graph, key: &str) -> Result<ShardHandle> {
        let shard = graph.route(key);
        if shard.row_exists(key, Duration::ZERO).await? {
            Ok(shard)
        } else {
            Err(GraphError::key_not_found(graph.name(), key))
        }
    }

    // ── Reciprocal protocol ─────────────────────────────────────────

    fn dispatch_mirrors(
        &self,
        source: &Arc<Graph>,
        key: &str,
        local: &BTreeSet<Key>,
        foreign: &BTreeMap<String, BTreeSet<Key>>,
    ) -> Result<Receipt> {
        let mut writes = Vec::new();

        for other_key in local {
            // A self-loop is already symmetric
            if other_key == key {
                continue;
            }
            let mirror = Mirror::Local {
                key: other_key.clone(),
                other_key: key.to_string(),
            };
            writes.push(self.spawn_mirror(Arc::clone(source), mirror));
        }

        for (foreign_graph, foreign_keys) in foreign {
            if foreign_keys.is_empty() {
                continue;
            }
            // Created here, before the follow-up is dispatched
            let target = self.graph_or_create(foreign_graph)?;
            for foreign_key in foreign_keys {
                let mirror = Mirror::Foreign {
                    key: foreign_key.clone(),
                    foreign_graph: source.name().to_string(),
                    foreign_key: key.to_string(),
                };
                writes.push(self.spawn_mirror(Arc::clone(&target), mirror));
            }
        }

        Ok(Receipt::new(writes))
    }

    fn spawn_mirror(&self, target: Arc<Graph>, mirror: Mirror) -> JoinHandle<Result<()>> {
        let in_flight = SettleTracker::begin(&self.inner.settle);
        let metrics = Arc::clone(&self.inner.metrics);
        metrics.record_reciprocal_dispatched();

        tokio::spawn(async move {
            let _in_flight = in_flight;
            let result = {
                let _gate = target.write_access().await;
                let shard = target.route(mirror.key());
                tracing::debug!(
                    graph = target.name(),
                    key = mirror.key(),
                    shard = shard.index(),
                    "reciprocal write"
                );
                mirror.send(&shard).await
            };

            metrics.record_reciprocal_finished(result.is_ok());
            if let Err(e) = &result {
                tracing::warn!(
                    graph = target.name(),
                    key = mirror.key(),
                    error = %e,
                    "reciprocal write failed"
                );
            }
            result
        })
    }

    /// Wait until every reciprocal write dispatched so far has finished.
    pub async fn settle(&self) {
        self.inner.settle.wait_idle().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Value of a row.
    pub fn select_row(&self, graph: &str, key: &str) -> Pending<Value> {
        match self.registry().get(graph) {
            Ok(graph) => routed_read(graph, key, |shard, key| shard.get(key)),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Local adjacency of a row. May lag behind in-flight mirror writes.
    pub fn select_local_keys(&self, graph: &str, key: &str) -> Pending<BTreeSet<Key>> {
        match self.registry().get(graph) {
            Ok(graph) => routed_read(graph, key, |shard, key| shard.local_keys(key)),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Foreign adjacency of a row, one future per foreign graph.
    ///
    /// The set of graphs is known without a round trip; only the key sets
    /// need one. A row with no foreign keys gives an empty map, a missing
    /// row `KeyNotFound`.
    pub fn select_foreign_keys(
        &self,
        graph: &str,
        key: &str,
    ) -> Result<BTreeMap<String, Pending<BTreeSet<Key>>>> {
        let graph = self.registry().get(graph)?;

        let foreign_graphs = loop {
            let layout = graph.layout();
            let found = layout.shard_for(key).foreign_graphs(key);
            // Row may have moved between reading the layout and the catalogue
            if found.is_some() || graph.layout().epoch == layout.epoch {
                break found;
            }
        }
        .ok_or_else(|| GraphError::key_not_found(graph.name(), key))?;

        Ok(foreign_graphs
            .into_iter()
            .map(|foreign_graph| {
                let read_graph = foreign_graph.clone();
                let pending = routed_read(Arc::clone(&graph), key, move |shard, key| {
                    shard.foreign_keys(key, &read_graph)
                });
                (foreign_graph, pending)
            })
            .collect())
    }

    // ── Split ───────────────────────────────────────────────────────

    /// Double a graph's shard count (minimum 2) and migrate rows.
    ///
    /// Shards keep their index; the new ones are appended. Writes to the
    /// graph wait until the new layout is in place, reads are served from
    /// the old layout until the swap.
    pub async fn split_graph(&self, graph: &str) -> Result<SplitReport> {
        let graph = self.registry().get(graph)?;
        let _gate = graph.split_access().await;

        let old = graph.layout();
        let next = old.partitioner.split();
        let mut shards = old.shards.clone();
        for index in old.shard_count()..next.shard_count() {
            shards.push(graph.spawn_shard(index));
        }

        // Plan: for every old shard, the keys that change owner, by target
        let key_sets = join_all(old.shards.iter().map(ShardHandle::list_keys)).await;
        let mut moves: Vec<(usize, BTreeMap<usize, Vec<Key>>)> = Vec::with_capacity(key_sets.len());
        for (source, keys) in key_sets.into_iter().enumerate() {
            let mut plan = next.plan(keys?.iter().map(String::as_str));
            plan.remove(&source);
            if !plan.is_empty() {
                moves.push((source, plan));
            }
        }

        // Copy: originals stay readable until the swap
        let copies = moves.iter().flat_map(|(source, plan)| {
            let from = old.shards[*source].clone();
            plan.iter().map(move |(target, keys)| (from.clone(), *target, keys.clone()))
        });
        let rows_moved = join_all(copies.map(|(from, target, keys)| {
            let to = shards[target].clone();
            async move {
                let rows = from.export_rows(keys).await?;
                to.install_rows(rows).await
            }
        }))
        .await
        .into_iter()
        .sum::<Result<usize>>()
        .map_err(|e| {
            tracing::warn!(graph = graph.name(), error = %e, "split aborted, layout unchanged");
            e
        })?;

        let report = SplitReport {
            graph: graph.name().to_string(),
            old_shard_count: old.shard_count(),
            new_shard_count: next.shard_count(),
            rows_moved,
            epoch: old.epoch + 1,
        };

        graph.swap_layout(ShardLayout {
            epoch: report.epoch,
            partitioner: next,
            shards,
        });

        // Evict: routing already points at the new owners, so a failure
        // here leaves stale copies behind but the split stands
        let evictions = moves.into_iter().map(|(source, plan)| {
            let keys: Vec<Key> = plan.into_values().flatten().collect();
            let shard = old.shards[source].clone();
            async move { (shard.index(), shard.evict_rows(keys).await) }
        });
        for (source, evicted) in join_all(evictions).await {
            if let Err(e) = evicted {
                tracing::warn!(
                    graph = graph.name(),
                    shard = source,
                    error = %e,
                    "eviction after split failed"
                );
            }
        }

        self.inner.metrics.record_split(rows_moved as u64);
        tracing::info!(
            graph = graph.name(),
            old_shards = report.old_shard_count,
            new_shards = report.new_shard_count,
            rows_moved,
            epoch = report.epoch,
            "graph split"
        );
        Ok(report)
    }
}

/// Read from the shard owning `key`, re-routing if a split moved the row
/// away between routing and the shard answering.
fn routed_read<T, F>(graph: Arc<Graph>, key: &str, op: F) -> Pending<T>
where
    T: Send + 'static,
    F: Fn(&ShardHandle, &str) -> Pending<T> + Send + 'static,
{
    let key = key.to_string();
    let mut layout = graph.layout();
    let mut attempt = op(layout.shard_for(&key), &key);

    Pending::deferred(async move {
        loop {
            let result = attempt.await;
            let current = graph.layout();
            match result {
                Err(GraphError::KeyNotFound { .. }) if current.epoch != layout.epoch => {
                    layout = current;
                    attempt = op(layout.shard_for(&key), &key);
                }
                other => return other,
            }
        }
    })
}
