//! GraphRegistry - thread-safe map of graph name to shard layout
//!
//! # Architecture
//!
//! - `GraphRegistry` holds a `RwLock<HashMap<String, Arc<Graph>>>`; only
//!   registration, claiming and lazy creation take the write lock
//! - Each `Graph` holds its current `ShardLayout` behind a short-lived
//!   `RwLock<Arc<..>>`: routing clones the `Arc`, a split swaps it
//! - Each `Graph` also has a split gate (`tokio::sync::RwLock<()>`). Writers
//!   hold it shared while they touch shards, a split holds it exclusively
//!   from migration start until the new layout is in place
//! - Graphs created implicitly (as the target of a foreign key) are marked
//!   so a later explicit `create_graph` can claim them

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock as GateLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::ManagerConfig;
use crate::error::{GraphError, Result};
use crate::partitioner::Partitioner;
use crate::shard::ShardHandle;

/// How a graph came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GraphOrigin {
    /// Registered through `create_graph`.
    Explicit,
    /// Created on first foreign-key reference or write.
    Implicit,
}

/// Ordered shard list of a graph plus the partitioner that routes into it.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    /// Incremented on every completed split.
    pub epoch: u64,
    pub partitioner: Partitioner,
    pub shards: Vec<ShardHandle>,
}

impl ShardLayout {
    fn spawn(graph: &str, shard_count: usize, probe_timeout: Duration) -> Self {
        let shards = (0..shard_count)
            .map(|index| ShardHandle::spawn(graph, index, probe_timeout))
            .collect();
        Self {
            epoch: 0,
            partitioner: Partitioner::new(shard_count),
            shards,
        }
    }

    /// Shard that owns `key` under this layout.
    pub fn shard_for(&self, key: &str) -> &ShardHandle {
        &self.shards[self.partitioner.shard_for(key)]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// A named graph.
pub struct Graph {
    name: String,
    implicit: AtomicBool,
    layout: RwLock<Arc<ShardLayout>>,
    split_gate: GateLock<()>,
    probe_timeout: Duration,
    #[cfg(test)]
    stop_new_shards: AtomicBool,
}

impl Graph {
    fn new(name: &str, config: &ManagerConfig, origin: GraphOrigin) -> Self {
        let layout = ShardLayout::spawn(name, config.initial_shards, config.probe_timeout());
        Self {
            name: name.to_string(),
            implicit: AtomicBool::new(origin == GraphOrigin::Implicit),
            layout: RwLock::new(Arc::new(layout)),
            split_gate: GateLock::new(()),
            probe_timeout: config.probe_timeout(),
            #[cfg(test)]
            stop_new_shards: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> GraphOrigin {
        if self.implicit.load(Ordering::SeqCst) {
            GraphOrigin::Implicit
        } else {
            GraphOrigin::Explicit
        }
    }

    /// Current layout snapshot.
    pub fn layout(&self) -> Arc<ShardLayout> {
        Arc::clone(&self.layout.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Shard that owns `key` right now.
    pub fn route(&self, key: &str) -> ShardHandle {
        self.layout().shard_for(key).clone()
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn info(&self) -> GraphInfo {
        let layout = self.layout();
        GraphInfo {
            name: self.name.clone(),
            origin: self.origin(),
            epoch: layout.epoch,
            shard_count: layout.shard_count(),
        }
    }

    /// Shared gate held by writers for the duration of their shard writes.
    pub(crate) async fn write_access(&self) -> RwLockReadGuard<'_, ()> {
        self.split_gate.read().await
    }

    /// Exclusive gate held by a split.
    pub(crate) async fn split_access(&self) -> RwLockWriteGuard<'_, ()> {
        self.split_gate.write().await
    }

    /// Spawn an empty shard for position `index` of this graph.
    pub(crate) fn spawn_shard(&self, index: usize) -> ShardHandle {
        let shard = ShardHandle::spawn(&self.name, index, self.probe_timeout);
        #[cfg(test)]
        if self.stop_new_shards.load(Ordering::SeqCst) {
            shard.stop();
        }
        shard
    }

    /// Make every shard spawned from now on unreachable.
    #[cfg(test)]
    pub(crate) fn stop_new_shards(&self) {
        self.stop_new_shards.store(true, Ordering::SeqCst);
    }

    /// Replace the layout in one step; returns the previous one.
    pub(crate) fn swap_layout(&self, layout: ShardLayout) -> Arc<ShardLayout> {
        let mut current = self.layout.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(layout))
    }

    fn claim(&self) -> bool {
        self.implicit.swap(false, Ordering::SeqCst)
    }
}

/// Graph information for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphInfo {
    pub name: String,
    pub origin: GraphOrigin,
    pub epoch: u64,
    pub shard_count: usize,
}

/// Result of registering a graph name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new graph was created.
    Created,
    /// An implicitly created graph became explicit.
    Claimed,
}

/// Registry of every graph known to a manager.
pub struct GraphRegistry {
    graphs: RwLock<HashMap<String, Arc<Graph>>>,
    config: ManagerConfig,
}

impl GraphRegistry {
    /// `config` must already be validated.
    pub(crate) fn new(config: ManagerConfig) -> Self {
        Self {
            graphs: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Validate a graph name
    ///
    /// Non-empty, at most `max_graph_name_len` bytes, no control characters.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(GraphError::InvalidArgument(
                "Graph name must not be empty".to_string(),
            ));
        }
        if name.len() > self.config.max_graph_name_len {
            return Err(GraphError::InvalidArgument(format!(
                "Graph name must be at most {} bytes",
                self.config.max_graph_name_len
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(GraphError::InvalidArgument(
                "Graph name must not contain control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Register a graph explicitly.
    ///
    /// Claims an implicitly created graph of the same name instead of
    /// failing; an explicit duplicate fails with `AlreadyExists`.
    pub fn register(&self, name: &str) -> Result<Registration> {
        self.validate_name(name)?;

        let mut graphs = self.graphs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = graphs.get(name) {
            return if existing.claim() {
                Ok(Registration::Claimed)
            } else {
                Err(GraphError::AlreadyExists(name.to_string()))
            };
        }

        let graph = Arc::new(Graph::new(name, &self.config, GraphOrigin::Explicit));
        graphs.insert(name.to_string(), graph);
        Ok(Registration::Created)
    }

    /// Get a graph by name
    pub fn get(&self, name: &str) -> Result<Arc<Graph>> {
        let graphs = self.graphs.read().unwrap_or_else(PoisonError::into_inner);
        graphs
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::GraphNotFound(name.to_string()))
    }

    /// Get a graph, creating it implicitly if absent.
    ///
    /// Returns the graph and whether this call created it.
    pub fn get_or_create(&self, name: &str) -> Result<(Arc<Graph>, bool)> {
        if let Ok(graph) = self.get(name) {
            return Ok((graph, false));
        }
        self.validate_name(name)?;

        let mut graphs = self.graphs.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks
        if let Some(graph) = graphs.get(name) {
            return Ok((Arc::clone(graph), false));
        }
        let graph = Arc::new(Graph::new(name, &self.config, GraphOrigin::Implicit));
        graphs.insert(name.to_string(), Arc::clone(&graph));
        Ok((graph, true))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graphs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// List all graphs, sorted by name.
    pub fn list(&self) -> Vec<GraphInfo> {
        let graphs = self.graphs.read().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<GraphInfo> = graphs.values().map(|g| g.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GraphRegistry {
        GraphRegistry::new(ManagerConfig::default())
    }

    // ============================================================================
    // Registration
    // ============================================================================

    #[tokio::test]
    async fn test_register_new_graph() {
        let registry = registry();
        assert_eq!(registry.register("Good name").unwrap(), Registration::Created);
        assert!(registry.contains("Good name"));

        let graph = registry.get("Good name").unwrap();
        assert_eq!(graph.origin(), GraphOrigin::Explicit);
        assert_eq!(graph.layout().shard_count(), 1);
        assert_eq!(graph.layout().epoch, 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let registry = registry();
        registry.register("g").unwrap();
        assert!(matches!(
            registry.register("g").unwrap_err(),
            GraphError::AlreadyExists(_)
        ));
    }

    #[tokio::test]
    async fn test_register_claims_implicit_graph() {
        let registry = registry();
        let (graph, created) = registry.get_or_create("lazy").unwrap();
        assert!(created);
        assert_eq!(graph.origin(), GraphOrigin::Implicit);

        assert_eq!(registry.register("lazy").unwrap(), Registration::Claimed);
        assert_eq!(graph.origin(), GraphOrigin::Explicit);
        assert!(registry.register("lazy").is_err());
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let (first, created_first) = registry.get_or_create("g").unwrap();
        let (second, created_second) = registry.get_or_create("g").unwrap();
        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_initial_shards_from_config() {
        let registry = GraphRegistry::new(ManagerConfig {
            initial_shards: 3,
            ..ManagerConfig::default()
        });
        registry.register("g").unwrap();
        assert_eq!(registry.get("g").unwrap().layout().shard_count(), 3);
    }

    // ============================================================================
    // Name validation
    // ============================================================================

    #[test]
    fn test_validate_name() {
        let registry = registry();
        assert!(registry.validate_name("Test Graph").is_ok());
        assert!(registry.validate_name("a").is_ok());
        assert!(registry.validate_name("").is_err());
        assert!(registry.validate_name("tab\there").is_err());
        assert!(registry.validate_name(&"x".repeat(257)).is_err());
        assert!(registry.validate_name(&"x".repeat(256)).is_ok());
    }

    #[test]
    fn test_get_not_found() {
        let registry = registry();
        match registry.get("nonexistent").err().unwrap() {
            GraphError::GraphNotFound(name) => assert_eq!(name, "nonexistent"),
            e => panic!("Expected GraphNotFound error, got: {:?}", e),
        }
    }

    // ============================================================================
    // Layout
    // ============================================================================

    #[tokio::test]
    async fn test_swap_layout_changes_routing() {
        let registry = registry();
        registry.register("g").unwrap();
        let graph = registry.get("g").unwrap();

        let old = graph.layout();
        let mut shards = old.shards.clone();
        shards.push(ShardHandle::spawn("g", 1, Duration::from_secs(1)));
        let previous = graph.swap_layout(ShardLayout {
            epoch: old.epoch + 1,
            partitioner: Partitioner::new(2),
            shards,
        });

        assert_eq!(previous.shard_count(), 1);
        let info = graph.info();
        assert_eq!(info.shard_count, 2);
        assert_eq!(info.epoch, 1);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let registry = registry();
        registry.register("b").unwrap();
        registry.get_or_create("a").unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
