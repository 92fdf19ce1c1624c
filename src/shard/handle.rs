//! Cloneable address of a running shard task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::shard::actor::{self, Catalogue, ShardRequest};
use crate::shard::pending::{Pending, Reply};
use crate::shard::row::Row;
use crate::shard::store::ShardStore;
use crate::shard::ShardStats;
use crate::{Key, Value};

/// Handle to a shard task.
///
/// Every method enqueues exactly one request and returns a `Pending` for
/// its reply. The mailbox is unbounded, so sending never blocks and
/// requests issued from one place are processed in issue order.
///
/// The task stops once the last handle is dropped.
#[derive(Clone)]
pub struct ShardHandle {
    graph: Arc<str>,
    index: usize,
    tx: mpsc::UnboundedSender<ShardRequest>,
    catalogue: Catalogue,
    probe_timeout: Duration,
}

impl fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardHandle")
            .field("graph", &self.graph)
            .field("index", &self.index)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ShardHandle {
    /// Spawn an empty shard task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(graph: &str, index: usize, probe_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let catalogue: Catalogue = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(actor::run(ShardStore::new(graph, index), rx, Arc::clone(&catalogue)));

        Self {
            graph: Arc::from(graph),
            index,
            tx,
            catalogue,
            probe_timeout,
        }
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    /// Position of this shard in its graph's layout.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True once the shard task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn label(&self) -> String {
        format!("{}[{}]", self.graph, self.index)
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> ShardRequest) -> Pending<T> {
        let (reply, pending) = Pending::channel(self.label());
        match self.tx.send(make(reply)) {
            Ok(()) => pending,
            Err(_) => Pending::unavailable(self.label()),
        }
    }

    // ── Row operations ──────────────────────────────────────────────

    /// Insert or update a row. `None` marks a new row as a placeholder.
    pub fn put(&self, key: &str, value: Option<Value>) -> Pending<()> {
        let key = key.to_string();
        self.call(|reply| ShardRequest::Put { key, value, reply })
    }

    /// Write a value and the local half of every declared edge in one step.
    pub fn upsert(
        &self,
        key: &str,
        value: Option<Value>,
        local_keys: BTreeSet<Key>,
        foreign_keys: BTreeMap<String, BTreeSet<Key>>,
    ) -> Pending<()> {
        let key = key.to_string();
        self.call(|reply| ShardRequest::Upsert {
            key,
            value,
            local_keys,
            foreign_keys,
            reply,
        })
    }

    pub fn get(&self, key: &str) -> Pending<Value> {
        let key = key.to_string();
        self.call(|reply| ShardRequest::Get { key, reply })
    }

    /// Whether `key` is held by this shard.
    ///
    /// An absent key is not reported immediately: the probe waits inside
    /// the shard for up to `timeout` in case a migration is about to land
    /// it, then resolves `false`. Expiry is not an error.
    pub fn row_exists(&self, key: &str, timeout: Duration) -> Pending<bool> {
        let key = key.to_string();
        let deadline = Instant::now() + timeout;
        self.call(|reply| ShardRequest::RowExists { key, deadline, reply })
    }

    /// `row_exists` with the manager's configured probe timeout.
    pub fn row_exists_default(&self, key: &str) -> Pending<bool> {
        self.row_exists(key, self.probe_timeout)
    }

    pub fn add_local_edge(&self, key: &str, other_key: &str) -> Pending<()> {
        let key = key.to_string();
        let other_key = other_key.to_string();
        self.call(|reply| ShardRequest::AddLocalEdge { key, other_key, reply })
    }

    pub fn add_foreign_edge(&self, key: &str, foreign_graph: &str, foreign_key: &str) -> Pending<()> {
        let key = key.to_string();
        let foreign_graph = foreign_graph.to_string();
        let foreign_key = foreign_key.to_string();
        self.call(|reply| ShardRequest::AddForeignEdge {
            key,
            foreign_graph,
            foreign_key,
            reply,
        })
    }

    pub fn local_keys(&self, key: &str) -> Pending<BTreeSet<Key>> {
        let key = key.to_string();
        self.call(|reply| ShardRequest::LocalKeys { key, reply })
    }

    pub fn foreign_keys(&self, key: &str, foreign_graph: &str) -> Pending<BTreeSet<Key>> {
        let key = key.to_string();
        let foreign_graph = foreign_graph.to_string();
        self.call(|reply| ShardRequest::ForeignKeys { key, foreign_graph, reply })
    }

    /// Foreign graphs `key` currently has edges into, read without a
    /// round trip from the set the shard publishes after each write.
    ///
    /// `None` if the shard holds no row for `key`.
    pub fn foreign_graphs(&self, key: &str) -> Option<BTreeSet<String>> {
        self.catalogue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn list_keys(&self) -> Pending<BTreeSet<Key>> {
        self.call(|reply| ShardRequest::ListKeys { reply })
    }

    pub fn stats(&self) -> Pending<ShardStats> {
        self.call(|reply| ShardRequest::Stats { reply })
    }

    // ── Migration ───────────────────────────────────────────────────

    pub(crate) fn export_rows(&self, keys: Vec<Key>) -> Pending<Vec<(Key, Row)>> {
        self.call(|reply| ShardRequest::ExportRows { keys, reply })
    }

    pub(crate) fn install_rows(&self, rows: Vec<(Key, Row)>) -> Pending<usize> {
        self.call(|reply| ShardRequest::InstallRows { rows, reply })
    }

    pub(crate) fn evict_rows(&self, keys: Vec<Key>) -> Pending<usize> {
        self.call(|reply| ShardRequest::EvictRows { keys, reply })
    }

    /// Stop the shard task; later requests resolve `Unavailable`.
    #[cfg(test)]
    pub(crate) fn stop(&self) {
        let _ = self.tx.send(ShardRequest::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHORT: Duration = Duration::from_millis(50);

    fn spawn() -> ShardHandle {
        ShardHandle::spawn("Test Graph", 0, Duration::from_secs(5))
    }

    // ============================================================================
    // Request / reply
    // ============================================================================

    #[tokio::test]
    async fn test_put_get() {
        let shard = spawn();
        shard.put("Key1", Some(json!("Value1"))).await.unwrap();
        assert_eq!(shard.get("Key1").await.unwrap(), json!("Value1"));
    }

    #[tokio::test]
    async fn test_requests_apply_in_issue_order() {
        let shard = spawn();
        // Not awaited before the read: FIFO mailbox still orders them
        let write = shard.put("k", Some(json!(1)));
        let edge = shard.add_local_edge("k", "other");
        let read = shard.local_keys("k");

        assert_eq!(read.await.unwrap(), BTreeSet::from(["other".to_string()]));
        write.await.unwrap();
        edge.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_placeholder_is_not_found() {
        let shard = spawn();
        shard.put("ghost", None).await.unwrap();
        assert!(shard.get("ghost").await.unwrap_err().is_not_found());
        assert!(shard.row_exists("ghost", SHORT).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_and_stats() {
        let shard = spawn();
        shard.put("a", Some(json!(1))).await.unwrap();
        shard.add_local_edge("b", "a").await.unwrap();

        let keys = shard.list_keys().await.unwrap();
        assert_eq!(keys, BTreeSet::from(["a".to_string(), "b".to_string()]));

        let stats = shard.stats().await.unwrap();
        assert_eq!(stats.row_count, 2);
        assert_eq!(stats.placeholder_count, 1);
    }

    // ============================================================================
    // row_exists probing
    // ============================================================================

    #[tokio::test]
    async fn test_row_exists_absent_times_out_false() {
        let shard = spawn();
        let started = std::time::Instant::now();
        assert!(!shard.row_exists("never", SHORT).await.unwrap());
        assert!(started.elapsed() >= SHORT);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_row_exists_zero_timeout_answers_immediately() {
        let shard = spawn();
        assert!(!shard.row_exists("never", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_parked_probe_wakes_on_install() {
        let shard = spawn();
        let probe = shard.row_exists("late", Duration::from_secs(5));

        // Shard keeps serving while the probe is parked
        shard.put("other", Some(json!(0))).await.unwrap();
        shard
            .install_rows(vec![("late".to_string(), Row::with_value(json!("moved")))])
            .await
            .unwrap();

        assert!(probe.await.unwrap());
        assert_eq!(shard.get("late").await.unwrap(), json!("moved"));
    }

    #[tokio::test]
    async fn test_mixed_deadlines_expire_independently() {
        let shard = spawn();
        let short = shard.row_exists("k", SHORT);
        let long = shard.row_exists("k", Duration::from_secs(5));

        assert!(!short.await.unwrap());
        shard.put("k", Some(json!(1))).await.unwrap();
        assert!(long.await.unwrap());
    }

    // ============================================================================
    // Foreign catalogue
    // ============================================================================

    #[tokio::test]
    async fn test_foreign_graphs_published_after_write() {
        let shard = spawn();
        assert_eq!(shard.foreign_graphs("Key1"), None);

        shard.add_foreign_edge("Key1", "Other Graph", "Foreign Key").await.unwrap();
        assert_eq!(
            shard.foreign_graphs("Key1"),
            Some(BTreeSet::from(["Other Graph".to_string()]))
        );

        shard.evict_rows(vec!["Key1".to_string()]).await.unwrap();
        assert_eq!(shard.foreign_graphs("Key1"), None);
    }

    #[tokio::test]
    async fn test_every_row_is_published() {
        let shard = spawn();
        shard.put("plain", Some(json!(1))).await.unwrap();
        shard.add_local_edge("linked", "plain").await.unwrap();
        shard
            .install_rows(vec![("moved".to_string(), Row::with_value(json!(2)))])
            .await
            .unwrap();

        for key in ["plain", "linked", "moved"] {
            assert_eq!(shard.foreign_graphs(key), Some(BTreeSet::new()), "{}", key);
        }
        assert_eq!(shard.foreign_graphs("never"), None);
    }

    #[tokio::test]
    async fn test_stopped_shard_is_unavailable() {
        let shard = spawn();
        shard.put("k", Some(json!(1))).await.unwrap();
        shard.stop();

        let err = shard.get("k").await.unwrap_err();
        assert!(matches!(err, crate::error::GraphError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_closed_shard_is_unavailable() {
        let (tx, rx) = mpsc::unbounded_channel::<ShardRequest>();
        drop(rx);
        let shard = ShardHandle {
            graph: Arc::from("g"),
            index: 0,
            tx,
            catalogue: Arc::new(RwLock::new(HashMap::new())),
            probe_timeout: SHORT,
        };

        assert!(shard.is_closed());
        let err = shard.get("k").await.unwrap_err();
        assert!(matches!(err, crate::error::GraphError::Unavailable(_)));
    }
}
