//! In-memory state of a single shard.
//!
//! `ShardStore` is plain synchronous data: the shard task owns exactly one
//! and applies mailbox messages to it in order. Keeping it free of channels
//! and timers lets the adjacency rules be tested without a runtime.

use std::collections::{BTreeSet, HashMap};

use crate::error::{GraphError, Result};
use crate::shard::row::Row;
use crate::shard::ShardStats;
use crate::{Key, Value};

/// Rows owned by one shard of one graph.
pub struct ShardStore {
    /// Graph this shard belongs to (for error reporting).
    graph: String,

    /// Position of this shard in its graph's layout.
    index: usize,

    rows: HashMap<Key, Row>,
}

impl ShardStore {
    pub fn new(graph: impl Into<String>, index: usize) -> Self {
        Self {
            graph: graph.into(),
            index,
            rows: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    fn row_mut(&mut self, key: &str) -> &mut Row {
        self.rows.entry(key.to_string()).or_insert_with(Row::placeholder)
    }

    fn missing(&self, key: &str) -> GraphError {
        GraphError::key_not_found(&self.graph, key)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Insert or update a row.
    ///
    /// `None` creates a placeholder for an unknown key and leaves an
    /// existing row's value untouched.
    pub fn put(&mut self, key: &str, value: Option<Value>) {
        let row = self.row_mut(key);
        if value.is_some() {
            row.value = value;
        }
    }

    /// Apply a complete insert: value plus the local half of every edge.
    pub fn upsert(
        &mut self,
        key: &str,
        value: Option<Value>,
        local_keys: impl IntoIterator<Item = Key>,
        foreign_keys: impl IntoIterator<Item = (String, BTreeSet<Key>)>,
    ) {
        self.put(key, value);
        let row = self.row_mut(key);
        row.local_keys.extend(local_keys);
        for (graph, keys) in foreign_keys {
            if !keys.is_empty() {
                row.foreign_keys.entry(graph).or_default().extend(keys);
            }
        }
    }

    /// Add `other_key` to `key`'s local set, creating `key` if absent.
    ///
    /// Returns true if the edge was not already present.
    pub fn add_local_edge(&mut self, key: &str, other_key: &str) -> bool {
        self.row_mut(key).local_keys.insert(other_key.to_string())
    }

    /// Add `foreign_key` to `key`'s set for `foreign_graph`, creating `key`
    /// if absent.
    ///
    /// Returns true if the edge was not already present.
    pub fn add_foreign_edge(&mut self, key: &str, foreign_graph: &str, foreign_key: &str) -> bool {
        self.row_mut(key)
            .foreign_keys
            .entry(foreign_graph.to_string())
            .or_default()
            .insert(foreign_key.to_string())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Row value. Placeholders have none and report `KeyNotFound`.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.rows
            .get(key)
            .and_then(|row| row.value.clone())
            .ok_or_else(|| self.missing(key))
    }

    pub fn local_keys(&self, key: &str) -> Result<BTreeSet<Key>> {
        self.rows
            .get(key)
            .map(|row| row.local_keys.clone())
            .ok_or_else(|| self.missing(key))
    }

    /// Keys held for `foreign_graph`. Empty if the row has none for it.
    pub fn foreign_keys(&self, key: &str, foreign_graph: &str) -> Result<BTreeSet<Key>> {
        let row = self.rows.get(key).ok_or_else(|| self.missing(key))?;
        Ok(row.foreign_keys.get(foreign_graph).cloned().unwrap_or_default())
    }

    pub fn list_keys(&self) -> BTreeSet<Key> {
        self.rows.keys().cloned().collect()
    }

    // ── Migration ───────────────────────────────────────────────────

    /// Copy out the rows for `keys`. Unknown keys are skipped.
    pub fn export_rows(&self, keys: &[Key]) -> Vec<(Key, Row)> {
        keys.iter()
            .filter_map(|key| self.rows.get(key).map(|row| (key.clone(), row.clone())))
            .collect()
    }

    /// Install migrated rows, merging into any row already present.
    ///
    /// Returns the installed keys.
    pub fn install_rows(&mut self, rows: Vec<(Key, Row)>) -> Vec<Key> {
        let mut installed = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            match self.rows.get_mut(&key) {
                Some(existing) => existing.merge(row),
                None => {
                    self.rows.insert(key.clone(), row);
                }
            }
            installed.push(key);
        }
        installed
    }

    /// Drop rows that now live on another shard. Returns how many went.
    pub fn evict_rows(&mut self, keys: &[Key]) -> usize {
        keys.iter().filter(|key| self.rows.remove(*key).is_some()).count()
    }

    pub fn stats(&self) -> ShardStats {
        let placeholder_count = self.rows.values().filter(|row| row.is_placeholder()).count();
        let local_edge_count = self.rows.values().map(|row| row.local_keys.len()).sum();
        let foreign_edge_count = self
            .rows
            .values()
            .flat_map(|row| row.foreign_keys.values())
            .map(|keys| keys.len())
            .sum();

        ShardStats {
            shard_index: self.index,
            row_count: self.rows.len(),
            placeholder_count,
            local_edge_count,
            foreign_edge_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ShardStore {
        ShardStore::new("Test Graph", 0)
    }

    // ============================================================================
    // Values
    // ============================================================================

    #[test]
    fn test_put_get_roundtrip() {
        let mut s = store();
        s.put("Key1", Some(json!("Value1")));
        assert_eq!(s.get("Key1").unwrap(), json!("Value1"));
    }

    #[test]
    fn test_get_missing_is_key_not_found() {
        let s = store();
        match s.get("nope").unwrap_err() {
            GraphError::KeyNotFound { graph, key } => {
                assert_eq!(graph, "Test Graph");
                assert_eq!(key, "nope");
            }
            e => panic!("Expected KeyNotFound, got: {:?}", e),
        }
    }

    #[test]
    fn test_placeholder_exists_but_has_no_value() {
        let mut s = store();
        s.put("ghost", None);
        assert!(s.contains("ghost"));
        assert!(s.get("ghost").is_err());
        assert!(s.local_keys("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_put_none_keeps_existing_value() {
        let mut s = store();
        s.put("Key1", Some(json!(1)));
        s.put("Key1", None);
        assert_eq!(s.get("Key1").unwrap(), json!(1));
    }

    // ============================================================================
    // Adjacency
    // ============================================================================

    #[test]
    fn test_add_local_edge_creates_placeholder() {
        let mut s = store();
        assert!(s.add_local_edge("Key1", "Key2"));
        assert!(!s.add_local_edge("Key1", "Key2"));

        assert!(s.row("Key1").unwrap().is_placeholder());
        assert_eq!(s.local_keys("Key1").unwrap(), BTreeSet::from(["Key2".to_string()]));
        assert!(!s.contains("Key2"));
    }

    #[test]
    fn test_add_foreign_edge() {
        let mut s = store();
        s.put("Key1", Some(json!("Value1")));
        s.add_foreign_edge("Key1", "Other Graph", "Foreign Key");

        assert_eq!(
            s.foreign_keys("Key1", "Other Graph").unwrap(),
            BTreeSet::from(["Foreign Key".to_string()])
        );
        assert!(s.foreign_keys("Key1", "Unrelated").unwrap().is_empty());
        assert!(s.foreign_keys("Missing", "Other Graph").is_err());
    }

    #[test]
    fn test_upsert_applies_all_halves() {
        let mut s = store();
        s.upsert(
            "Key3",
            Some(json!("Value3")),
            vec!["Key1".to_string()],
            vec![("H".to_string(), BTreeSet::from(["FKey".to_string()]))],
        );

        let row = s.row("Key3").unwrap();
        assert_eq!(row.value, Some(json!("Value3")));
        assert!(row.local_keys.contains("Key1"));
        assert!(row.foreign_keys["H"].contains("FKey"));
    }

    #[test]
    fn test_upsert_skips_empty_foreign_sets() {
        let mut s = store();
        s.upsert("k", Some(json!(0)), Vec::new(), vec![("H".to_string(), BTreeSet::new())]);
        assert!(s.row("k").unwrap().foreign_keys.is_empty());
    }

    // ============================================================================
    // Migration
    // ============================================================================

    #[test]
    fn test_export_install_evict() {
        let mut source = store();
        source.put("a", Some(json!("A")));
        source.add_local_edge("a", "b");
        source.put("c", Some(json!("C")));

        let exported = source.export_rows(&["a".to_string(), "missing".to_string()]);
        assert_eq!(exported.len(), 1);

        let mut target = ShardStore::new("Test Graph", 1);
        target.add_foreign_edge("a", "H", "x");
        let installed = target.install_rows(exported);
        assert_eq!(installed, vec!["a".to_string()]);

        let row = target.row("a").unwrap();
        assert_eq!(row.value, Some(json!("A")));
        assert!(row.local_keys.contains("b"));
        assert!(row.foreign_keys["H"].contains("x"));

        assert_eq!(source.evict_rows(&["a".to_string(), "a".to_string()]), 1);
        assert!(!source.contains("a"));
        assert!(source.contains("c"));
    }

    #[test]
    fn test_stats() {
        let mut s = store();
        s.put("a", Some(json!(1)));
        s.add_local_edge("a", "b");
        s.add_local_edge("b", "a");
        s.add_foreign_edge("a", "H", "x");

        let stats = s.stats();
        assert_eq!(stats.row_count, 2);
        assert_eq!(stats.placeholder_count, 1);
        assert_eq!(stats.local_edge_count, 2);
        assert_eq!(stats.foreign_edge_count, 1);
    }
}
