//! Row record held by a shard.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Key, Value};

/// A key/value entry plus its local and foreign adjacency.
///
/// `value == None` marks a placeholder: the row exists only because some
/// other row declared an edge to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub value: Option<Value>,
    pub local_keys: BTreeSet<Key>,
    pub foreign_keys: BTreeMap<String, BTreeSet<Key>>,
}

impl Row {
    /// Row with a value and no edges.
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Row with no value, created as the target of an edge.
    pub fn placeholder() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.value.is_none()
    }

    /// Union another copy of the same row into this one.
    ///
    /// Used when a migrated row lands on a shard that already holds a
    /// placeholder for the key. Adjacency is unioned; an incoming value
    /// wins over an absent one.
    pub fn merge(&mut self, other: Row) {
        if other.value.is_some() {
            self.value = other.value;
        }
        self.local_keys.extend(other.local_keys);
        for (graph, keys) in other.foreign_keys {
            self.foreign_keys.entry(graph).or_default().extend(keys);
        }
    }

    /// Foreign graphs this row has at least one key for.
    pub fn foreign_graphs(&self) -> BTreeSet<String> {
        self.foreign_keys
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(graph, _)| graph.clone())
            .collect()
    }
}
