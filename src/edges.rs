//! Edge declarations accepted by `insert`.
//!
//! `LocalKeys` is a set of keys in the row's own graph; `ForeignKeys` maps
//! a foreign graph name to a set of keys in that graph. Both accept a single
//! key wherever a set is expected and normalise it into a singleton.
//!
//! Typed callers build these through `From` impls. Callers holding dynamic
//! input (decoded JSON from a client) go through `from_json`, which is the
//! only place malformed shapes can appear and is where they are rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{GraphError, Result};
use crate::Key;

// ── Local keys ──────────────────────────────────────────────────────

/// Same-graph edge targets declared on a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalKeys(BTreeSet<Key>);

impl LocalKeys {
    /// No local edges.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }

    pub fn into_set(self) -> BTreeSet<Key> {
        self.0
    }

    /// Parse from dynamic input: `null`, a string, or an array of strings.
    pub fn from_json(value: &Json) -> Result<Self> {
        match value {
            Json::Null => Ok(Self::none()),
            other => keys_from_json(other, "local_keys").map(Self),
        }
    }
}

impl From<&str> for LocalKeys {
    fn from(key: &str) -> Self {
        Self(BTreeSet::from([key.to_string()]))
    }
}

impl From<String> for LocalKeys {
    fn from(key: String) -> Self {
        Self(BTreeSet::from([key]))
    }
}

impl From<Vec<&str>> for LocalKeys {
    fn from(keys: Vec<&str>) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for LocalKeys {
    fn from(keys: Vec<String>) -> Self {
        Self(keys.into_iter().collect())
    }
}

impl<const N: usize> From<[&str; N]> for LocalKeys {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<BTreeSet<Key>> for LocalKeys {
    fn from(keys: BTreeSet<Key>) -> Self {
        Self(keys)
    }
}

impl From<HashSet<Key>> for LocalKeys {
    fn from(keys: HashSet<Key>) -> Self {
        Self(keys.into_iter().collect())
    }
}

impl From<Option<&str>> for LocalKeys {
    fn from(key: Option<&str>) -> Self {
        key.map(Self::from).unwrap_or_default()
    }
}

// ── Foreign keys ────────────────────────────────────────────────────

/// Cross-graph edge targets declared on a row: graph name -> keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeys(BTreeMap<String, BTreeSet<Key>>);

impl ForeignKeys {
    /// No foreign edges.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder-style: add one key under `graph`.
    pub fn with(mut self, graph: impl Into<String>, key: impl Into<Key>) -> Self {
        self.0.entry(graph.into()).or_default().insert(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|keys| keys.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<Key>)> {
        self.0.iter()
    }

    pub fn into_map(self) -> BTreeMap<String, BTreeSet<Key>> {
        self.0
    }

    /// Reject graph names that could never be registered.
    ///
    /// Applied by the manager before any shard is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.0.keys().any(|graph| graph.is_empty()) {
            return Err(GraphError::InvalidArgument(
                "foreign_keys: graph name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse from dynamic input: `null`, or an object whose values are a
    /// string or an array of strings.
    pub fn from_json(value: &Json) -> Result<Self> {
        let object = match value {
            Json::Null => return Ok(Self::none()),
            Json::Object(object) => object,
            other => {
                return Err(GraphError::InvalidArgument(format!(
                    "foreign_keys must be a mapping of graph name to key(s), got {}",
                    json_kind(other)
                )))
            }
        };

        let mut map = BTreeMap::new();
        for (graph, keys) in object {
            let field = format!("foreign_keys[{}]", graph);
            map.insert(graph.clone(), keys_from_json(keys, &field)?);
        }

        let parsed = Self(map);
        parsed.validate()?;
        Ok(parsed)
    }
}

impl<G: Into<String>, K: Into<Key>> From<(G, K)> for ForeignKeys {
    fn from((graph, key): (G, K)) -> Self {
        Self::none().with(graph, key)
    }
}

impl From<HashMap<&str, &str>> for ForeignKeys {
    fn from(map: HashMap<&str, &str>) -> Self {
        map.into_iter()
            .fold(Self::none(), |acc, (graph, key)| acc.with(graph, key))
    }
}

impl From<HashMap<String, HashSet<Key>>> for ForeignKeys {
    fn from(map: HashMap<String, HashSet<Key>>) -> Self {
        Self(
            map.into_iter()
                .map(|(graph, keys)| (graph, keys.into_iter().collect()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, BTreeSet<Key>>> for ForeignKeys {
    fn from(map: BTreeMap<String, BTreeSet<Key>>) -> Self {
        Self(map)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn keys_from_json(value: &Json, field: &str) -> Result<BTreeSet<Key>> {
    match value {
        Json::String(key) => Ok(BTreeSet::from([key.clone()])),
        Json::Array(items) => items
            .iter()
            .map(|item| match item {
                Json::String(key) => Ok(key.clone()),
                other => Err(GraphError::InvalidArgument(format!(
                    "{}: keys must be strings, got {}",
                    field,
                    json_kind(other)
                ))),
            })
            .collect(),
        other => Err(GraphError::InvalidArgument(format!(
            "{} must be a key or a set of keys, got {}",
            field,
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
