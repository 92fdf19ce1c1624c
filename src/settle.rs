//! Acknowledgement for reciprocal edge writes.
//!
//! The mirror half of an edge runs on its own task after the caller's
//! write returns. Two ways to wait for it:
//!
//! - `Receipt::settled()` waits for the mirror writes of one call;
//! - `GraphManager::settle()` waits until no mirror write is in flight.
//!
//! Neither is required; dropping a receipt leaves its writes running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{GraphError, Result};

/// Counts in-flight reciprocal writes and wakes barrier waiters at zero.
#[derive(Debug, Default)]
pub(crate) struct SettleTracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Registration of one in-flight write; finishing it is dropping it.
pub(crate) struct InFlight {
    tracker: Arc<SettleTracker>,
}

impl SettleTracker {
    pub(crate) fn begin(tracker: &Arc<Self>) -> InFlight {
        tracker.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            tracker: Arc::clone(tracker),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until the in-flight count is zero.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a drop to zero in between is not missed
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// Handle to the reciprocal writes started by one `insert` / `add_*_keys`.
#[derive(Debug, Default)]
pub struct Receipt {
    writes: Vec<JoinHandle<Result<()>>>,
}

impl Receipt {
    pub(crate) fn new(writes: Vec<JoinHandle<Result<()>>>) -> Self {
        Self { writes }
    }

    /// Number of mirror writes this receipt covers.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Wait for every mirror write; report the first failure.
    pub async fn settled(self) -> Result<()> {
        let mut outcome = Ok(());
        for joined in join_all(self.writes).await {
            let result = joined
                .map_err(|e| GraphError::Unavailable(format!("reciprocal write task: {}", e)))
                .and_then(|r| r);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }
}
