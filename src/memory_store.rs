//! In-memory [`ItemStore`] implementation for tests.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so number order comes for
//! free. A batch is validated before anything is applied, which gives the
//! same all-or-nothing behavior as the SQLite transaction.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::gaps::ItemRange;
use crate::models::LocalItem;
use crate::search::SearchQuery;
use crate::store::ItemStore;

pub struct InMemoryStore {
    items: RwLock<BTreeMap<u32, LocalItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<u32, LocalItem>>> {
        self.items.read().map_err(|_| anyhow!("item store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<u32, LocalItem>>> {
        self.items.write().map_err(|_| anyhow!("item store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn extremes(&self) -> Result<(Option<u32>, Option<u32>)> {
        let items = self.read()?;
        Ok((
            items.keys().next().copied(),
            items.keys().next_back().copied(),
        ))
    }

    async fn get(&self, number: u32) -> Result<Option<LocalItem>> {
        Ok(self.read()?.get(&number).cloned())
    }

    async fn search(&self, query: &SearchQuery, limit: i64) -> Result<Vec<LocalItem>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .read()?
            .values()
            .rev()
            .filter(|item| query.matches(item))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, items: &[LocalItem]) -> Result<usize> {
        if let Some(bad) = items.iter().find(|item| item.number == 0) {
            bail!("invalid item number {} in batch", bad.number);
        }

        let mut stored = self.write()?;
        for item in items {
            stored.insert(item.number, item.clone());
        }
        Ok(items.len())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.read()?.len() as i64)
    }

    async fn interior_gaps(&self) -> Result<Vec<ItemRange>> {
        let items = self.read()?;
        let numbers: Vec<u32> = items.keys().copied().collect();
        Ok(numbers
            .windows(2)
            .filter(|pair| pair[1] - pair[0] > 1)
            .map(|pair| ItemRange::new(pair[0] + 1, pair[1] - 1))
            .collect())
    }
}
