//! URSA - sharded graph key/value store
//!
//! Rows live in named graphs, each split across shard tasks. A row holds a
//! JSON value, a set of *local keys* (edges to rows in the same graph) and
//! a map of *foreign keys* (edges to rows in other graphs). Every edge is
//! kept symmetric: writing one half dispatches the mirror half to the
//! peer's shard.
//!
//! - [`GraphManager`] is the entry point: graph creation, writes, reads
//!   and splits
//! - [`ShardHandle`] addresses a single shard task; every request returns a
//!   [`Pending`] future for its reply
//! - [`Partitioner`] maps keys to shard indices
//!
//! Logging goes through `tracing`; see [`logging`] to install a subscriber.

pub mod config;
pub mod edges;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod partitioner;
pub mod registry;
pub mod settle;
pub mod shard;

/// Row key, unique within a graph.
pub type Key = String;

/// Row payload.
pub type Value = serde_json::Value;

pub use config::ManagerConfig;
pub use edges::{ForeignKeys, LocalKeys};
pub use error::{GraphError, Result};
pub use manager::{GraphManager, SplitReport};
pub use metrics::MetricsSnapshot;
pub use partitioner::Partitioner;
pub use registry::{GraphInfo, GraphOrigin};
pub use settle::Receipt;
pub use shard::{Pending, ShardHandle, ShardStats};
