//! Storage abstraction for the local mirror.
//!
//! The [`ItemStore`] trait is everything the sync engine and the CLI need
//! from a durable store. [`SqliteStore`](crate::sqlite_store::SqliteStore)
//! is the production backend; [`InMemoryStore`](crate::memory_store::InMemoryStore)
//! backs tests.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`extremes`](ItemStore::extremes) | Lowest and highest stored number |
//! | [`get`](ItemStore::get) | Point lookup by number |
//! | [`search`](ItemStore::search) | Normalized-field / exact-number search |
//! | [`upsert_batch`](ItemStore::upsert_batch) | Transactional create-or-update |
//! | [`interior_gaps`](ItemStore::interior_gaps) | Holes between min and max |

use anyhow::Result;
use async_trait::async_trait;

use crate::gaps::ItemRange;
use crate::models::LocalItem;
use crate::search::SearchQuery;

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// `(min, max)` over stored numbers; both `None` when the store is empty.
    async fn extremes(&self) -> Result<(Option<u32>, Option<u32>)>;

    async fn get(&self, number: u32) -> Result<Option<LocalItem>>;

    /// Items matching `query`, highest number first, at most `limit`.
    async fn search(&self, query: &SearchQuery, limit: i64) -> Result<Vec<LocalItem>>;

    /// Create or update every item in one transaction.
    ///
    /// Either all items are applied or none are. Returns the number of rows
    /// written.
    async fn upsert_batch(&self, items: &[LocalItem]) -> Result<usize>;

    async fn count(&self) -> Result<i64>;

    /// Ranges of missing numbers strictly between the stored min and max,
    /// ascending.
    async fn interior_gaps(&self) -> Result<Vec<ItemRange>>;
}
