//! Shards: independently addressable storage units.
//!
//! A shard owns a disjoint subset of one graph's rows and processes its
//! requests strictly one at a time:
//!
//! ```text
//! ShardHandle --mpsc--> shard task { ShardStore, parked probes } --oneshot--> Pending<T>
//! ```
//!
//! - `store`: synchronous row/adjacency state (`ShardStore`)
//! - `actor`: the task loop that owns a store and drains the mailbox
//! - `handle`: the cloneable address (`ShardHandle`) callers send through
//! - `pending`: the future returned for every request

pub mod row;
pub mod store;
mod actor;
mod handle;
mod pending;

pub use handle::ShardHandle;
pub use pending::Pending;
pub use row::Row;
pub use store::ShardStore;

use serde::Serialize;

/// Per-shard statistics for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub shard_index: usize,
    pub row_count: usize,
    pub placeholder_count: usize,
    pub local_edge_count: usize,
    pub foreign_edge_count: usize,
}
