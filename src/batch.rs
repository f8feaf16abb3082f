//! In-memory batching between the walks and persistence.
//!
//! The accumulator is eager at first and batched later:
//!
//! 1. **Warm-up**: until more than `activity_threshold` items have been
//!    accepted, every offer flushes, so the first entries of a run become
//!    visible one by one.
//! 2. **Batched**: afterwards, items are held until `batch_size` are pending.
//! 3. **Boundary**: an offer flagged as a walk boundary always flushes.
//!
//! Both walks offer concurrently. The pending list is swapped out under a
//! lock, so no offer can land in a list that is already being committed.
//! The dispatch turn is taken before that lock is released, so batches reach
//! the sink one at a time and in the order they were swapped out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::models::RemoteItem;

pub const DEFAULT_ACTIVITY_THRESHOLD: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Receiver of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn commit(&self, batch: Vec<RemoteItem>) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub activity_threshold: usize,
    pub batch_size: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl From<&SyncConfig> for FlushPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            activity_threshold: config.activity_threshold,
            batch_size: config.batch_size.max(1),
        }
    }
}

impl FlushPolicy {
    /// Flush is withheld only while warmed up, under the cap, and not at a
    /// boundary.
    pub fn should_flush(&self, accepted: usize, pending: usize, boundary: bool) -> bool {
        let withhold = accepted > self.activity_threshold && pending < self.batch_size && !boundary;
        !withhold
    }
}

/// What a single offer led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Kept pending.
    Withheld,
    /// A flush was due but nothing was pending.
    Empty,
    Committed(usize),
    Failed(usize),
}

/// Counters for one accumulator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Every offer, absent results included.
    pub processed: usize,
    /// Offers that carried an item.
    pub accepted: usize,
    pub committed_items: usize,
    pub committed_batches: usize,
    pub failed_items: usize,
    pub failed_batches: usize,
}

#[derive(Default)]
struct Pending {
    items: Vec<RemoteItem>,
    processed: usize,
    accepted: usize,
}

pub struct BatchAccumulator {
    policy: FlushPolicy,
    sink: Arc<dyn BatchSink>,
    pending: Mutex<Pending>,
    dispatch_turn: Mutex<()>,
    committed_items: AtomicUsize,
    committed_batches: AtomicUsize,
    failed_items: AtomicUsize,
    failed_batches: AtomicUsize,
}

impl BatchAccumulator {
    pub fn new(policy: FlushPolicy, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            policy,
            sink,
            pending: Mutex::new(Pending::default()),
            dispatch_turn: Mutex::new(()),
            committed_items: AtomicUsize::new(0),
            committed_batches: AtomicUsize::new(0),
            failed_items: AtomicUsize::new(0),
            failed_batches: AtomicUsize::new(0),
        }
    }

    /// Offer one walk result. `None` (an absent slot) is counted but never
    /// persisted.
    pub async fn offer(&self, item: Option<RemoteItem>, boundary: bool) -> FlushOutcome {
        let (batch, _turn) = {
            let mut pending = self.pending.lock().await;
            pending.processed += 1;
            if let Some(item) = item {
                if boundary {
                    debug!(number = item.number, "forced flush at walk boundary");
                }
                pending.items.push(item);
                pending.accepted += 1;
            }

            if !self
                .policy
                .should_flush(pending.accepted, pending.items.len(), boundary)
            {
                return FlushOutcome::Withheld;
            }
            let batch = std::mem::take(&mut pending.items);
            (batch, self.dispatch_turn.lock().await)
        };

        self.dispatch(batch).await
    }

    /// Flush whatever is pending, regardless of thresholds.
    pub async fn drain(&self) -> FlushOutcome {
        let (batch, _turn) = {
            let mut pending = self.pending.lock().await;
            let batch = std::mem::take(&mut pending.items);
            (batch, self.dispatch_turn.lock().await)
        };
        self.dispatch(batch).await
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.items.len()
    }

    pub async fn stats(&self) -> BatchStats {
        let pending = self.pending.lock().await;
        BatchStats {
            processed: pending.processed,
            accepted: pending.accepted,
            committed_items: self.committed_items.load(Ordering::SeqCst),
            committed_batches: self.committed_batches.load(Ordering::SeqCst),
            failed_items: self.failed_items.load(Ordering::SeqCst),
            failed_batches: self.failed_batches.load(Ordering::SeqCst),
        }
    }

    async fn dispatch(&self, batch: Vec<RemoteItem>) -> FlushOutcome {
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let size = batch.len();
        match self.sink.commit(batch).await {
            Ok(written) => {
                self.committed_items.fetch_add(size, Ordering::SeqCst);
                self.committed_batches.fetch_add(1, Ordering::SeqCst);
                FlushOutcome::Committed(written)
            }
            Err(e) => {
                self.failed_items.fetch_add(size, Ordering::SeqCst);
                self.failed_batches.fetch_add(1, Ordering::SeqCst);
                warn!(count = size, error = %e, "dropping failed batch");
                FlushOutcome::Failed(size)
            }
        }
    }
}
