//! Transactional persistence of fetched items.
//!
//! [`PersistenceGateway::upsert`] converts a batch of [`RemoteItem`]s into
//! [`LocalItem`]s (resolving dates and recomputing every normalized twin as an
//! explicit step) and hands them to the store as one all-or-nothing write.
//! Commits are serialized: at most one batch is in flight at a time.
//!
//! Successful commits are announced on a broadcast channel so readers (a UI,
//! a watcher) can refresh.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error};

use crate::batch::BatchSink;
use crate::models::{LocalItem, RemoteItem};
use crate::store::ItemStore;

const EVENT_CAPACITY: usize = 64;

/// Change notification published after each commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Committed { numbers: Vec<u32> },
}

pub struct PersistenceGateway {
    store: Arc<dyn ItemStore>,
    commit_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            commit_lock: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Create or update every item of `batch` in a single transaction.
    ///
    /// On failure nothing from the batch is applied and the error is returned
    /// to the caller; the batch is not retried here.
    pub async fn upsert(&self, batch: &[RemoteItem]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let rows: Vec<LocalItem> = batch.iter().map(LocalItem::from_remote).collect();
        let numbers: Vec<u32> = rows.iter().map(|row| row.number).collect();

        let _guard = self.commit_lock.lock().await;
        match self.store.upsert_batch(&rows).await {
            Ok(written) => {
                debug!(count = written, first = numbers[0], "batch committed");
                // No subscribers is fine
                let _ = self.events.send(StoreEvent::Committed { numbers });
                Ok(written)
            }
            Err(e) => {
                error!(count = rows.len(), first = numbers[0], error = %e, "batch rolled back");
                Err(e.context(format!("batch of {} items rolled back", rows.len())))
            }
        }
    }
}

#[async_trait]
impl BatchSink for PersistenceGateway {
    async fn commit(&self, batch: Vec<RemoteItem>) -> Result<usize> {
        self.upsert(&batch).await
    }
}
