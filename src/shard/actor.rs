//! Shard task loop.
//!
//! One task per shard owns the `ShardStore` and drains the mailbox in
//! arrival order. The only state kept outside the store is the set of
//! parked `row_exists` probes, which wait inside the task for a key to
//! arrive (normally via migration) until their deadline passes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::shard::pending::Reply;
use crate::shard::row::Row;
use crate::shard::store::ShardStore;
use crate::shard::ShardStats;
use crate::{Key, Value};

/// Key -> foreign graphs with at least one edge from that row.
///
/// Holds an entry (possibly empty) for every row the shard owns, so a
/// missing entry means a missing row. Written only by the shard task; read
/// synchronously by the manager to build the outer map of
/// `select_foreign_keys`.
pub(crate) type Catalogue = Arc<RwLock<HashMap<Key, BTreeSet<String>>>>;

pub(crate) enum ShardRequest {
    Put {
        key: Key,
        value: Option<Value>,
        reply: Reply<()>,
    },
    Upsert {
        key: Key,
        value: Option<Value>,
        local_keys: BTreeSet<Key>,
        foreign_keys: BTreeMap<String, BTreeSet<Key>>,
        reply: Reply<()>,
    },
    Get {
        key: Key,
        reply: Reply<Value>,
    },
    RowExists {
        key: Key,
        deadline: Instant,
        reply: Reply<bool>,
    },
    AddLocalEdge {
        key: Key,
        other_key: Key,
        reply: Reply<()>,
    },
    AddForeignEdge {
        key: Key,
        foreign_graph: String,
        foreign_key: Key,
        reply: Reply<()>,
    },
    LocalKeys {
        key: Key,
        reply: Reply<BTreeSet<Key>>,
    },
    ForeignKeys {
        key: Key,
        foreign_graph: String,
        reply: Reply<BTreeSet<Key>>,
    },
    ListKeys {
        reply: Reply<BTreeSet<Key>>,
    },
    ExportRows {
        keys: Vec<Key>,
        reply: Reply<Vec<(Key, Row)>>,
    },
    InstallRows {
        rows: Vec<(Key, Row)>,
        reply: Reply<usize>,
    },
    EvictRows {
        keys: Vec<Key>,
        reply: Reply<usize>,
    },
    Stats {
        reply: Reply<ShardStats>,
    },
    /// Stop the task without replying; the mailbox closes behind it.
    #[cfg(test)]
    Stop,
}

// ── Parked probes ───────────────────────────────────────────────────

#[derive(Default)]
struct Probes {
    waiting: HashMap<Key, Vec<(Instant, Reply<bool>)>>,
}

impl Probes {
    fn park(&mut self, key: Key, deadline: Instant, reply: Reply<bool>) {
        self.waiting.entry(key).or_default().push((deadline, reply));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting
            .values()
            .flat_map(|probes| probes.iter().map(|(deadline, _)| *deadline))
            .min()
    }

    /// Resolve every probe whose key is now present.
    fn wake_present(&mut self, store: &ShardStore) {
        if self.waiting.is_empty() {
            return;
        }
        let arrived: Vec<Key> = self
            .waiting
            .keys()
            .filter(|key| store.contains(key))
            .cloned()
            .collect();
        for key in arrived {
            for (_, reply) in self.waiting.remove(&key).unwrap_or_default() {
                let _ = reply.send(Ok(true));
            }
        }
    }

    /// Resolve every probe whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        self.waiting.retain(|_, probes| {
            let (expired, live): (Vec<_>, Vec<_>) =
                probes.drain(..).partition(|(deadline, _)| *deadline <= now);
            for (_, reply) in expired {
                let _ = reply.send(Ok(false));
            }
            *probes = live;
            !probes.is_empty()
        });
    }

    fn drain_negative(&mut self) {
        for (_, probes) in self.waiting.drain() {
            for (_, reply) in probes {
                let _ = reply.send(Ok(false));
            }
        }
    }
}

// ── Task loop ───────────────────────────────────────────────────────

/// Idle wake-up used when no probe is parked; the timer branch is
/// disabled in that case so the value only has to be in the future.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

pub(crate) async fn run(
    mut store: ShardStore,
    mut mailbox: mpsc::UnboundedReceiver<ShardRequest>,
    catalogue: Catalogue,
) {
    let mut probes = Probes::default();
    tracing::debug!(graph = store.graph(), shard = store.index(), "shard task started");

    loop {
        let wake_at = probes.next_deadline();
        let timer = sleep_until(wake_at.unwrap_or_else(|| Instant::now() + IDLE_WAKE));

        tokio::select! {
            request = mailbox.recv() => match request {
                Some(request) => {
                    #[cfg(test)]
                    if matches!(request, ShardRequest::Stop) {
                        break;
                    }
                    apply(&mut store, &catalogue, &mut probes, request);
                    probes.wake_present(&store);
                }
                None => break,
            },
            _ = timer, if wake_at.is_some() => probes.expire(Instant::now()),
        }
    }

    probes.drain_negative();
    tracing::debug!(graph = store.graph(), shard = store.index(), "shard task stopped");
}

fn apply(store: &mut ShardStore, catalogue: &Catalogue, probes: &mut Probes, request: ShardRequest) {
    match request {
        ShardRequest::Put { key, value, reply } => {
            store.put(&key, value);
            publish(store, catalogue, &key);
            let _ = reply.send(Ok(()));
        }
        ShardRequest::Upsert { key, value, local_keys, foreign_keys, reply } => {
            store.upsert(&key, value, local_keys, foreign_keys);
            publish(store, catalogue, &key);
            let _ = reply.send(Ok(()));
        }
        ShardRequest::Get { key, reply } => {
            let _ = reply.send(store.get(&key));
        }
        ShardRequest::RowExists { key, deadline, reply } => {
            if store.contains(&key) {
                let _ = reply.send(Ok(true));
            } else if deadline <= Instant::now() {
                let _ = reply.send(Ok(false));
            } else {
                probes.park(key, deadline, reply);
            }
        }
        ShardRequest::AddLocalEdge { key, other_key, reply } => {
            let created = !store.contains(&key);
            store.add_local_edge(&key, &other_key);
            if created {
                publish(store, catalogue, &key);
            }
            let _ = reply.send(Ok(()));
        }
        ShardRequest::AddForeignEdge { key, foreign_graph, foreign_key, reply } => {
            if store.add_foreign_edge(&key, &foreign_graph, &foreign_key) {
                publish(store, catalogue, &key);
            }
            let _ = reply.send(Ok(()));
        }
        ShardRequest::LocalKeys { key, reply } => {
            let _ = reply.send(store.local_keys(&key));
        }
        ShardRequest::ForeignKeys { key, foreign_graph, reply } => {
            let _ = reply.send(store.foreign_keys(&key, &foreign_graph));
        }
        ShardRequest::ListKeys { reply } => {
            let _ = reply.send(Ok(store.list_keys()));
        }
        ShardRequest::ExportRows { keys, reply } => {
            let _ = reply.send(Ok(store.export_rows(&keys)));
        }
        ShardRequest::InstallRows { rows, reply } => {
            let installed = store.install_rows(rows);
            for key in &installed {
                publish(store, catalogue, key);
            }
            let _ = reply.send(Ok(installed.len()));
        }
        ShardRequest::EvictRows { keys, reply } => {
            let evicted = store.evict_rows(&keys);
            let mut published = catalogue.write().unwrap_or_else(PoisonError::into_inner);
            for key in &keys {
                published.remove(key);
            }
            let _ = reply.send(Ok(evicted));
        }
        ShardRequest::Stats { reply } => {
            let _ = reply.send(Ok(store.stats()));
        }
        #[cfg(test)]
        ShardRequest::Stop => {}
    }
}

/// Refresh the published foreign-graph set for `key`.
fn publish(store: &ShardStore, catalogue: &Catalogue, key: &str) {
    let graphs = store.row(key).map(Row::foreign_graphs);
    let mut published = catalogue.write().unwrap_or_else(PoisonError::into_inner);
    match graphs {
        Some(graphs) => {
            published.insert(key.to_string(), graphs);
        }
        None => {
            published.remove(key);
        }
    }
}
