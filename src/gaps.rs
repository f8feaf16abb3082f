//! Gap detection between the local store and the remote archive.
//!
//! Only the extremes of the local set are consulted: anything below the
//! lowest stored number is walked downward to 1, anything above the highest
//! stored number is walked upward to the remote latest. An empty store is
//! walked from latest down to 1.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::store::ItemStore;

/// An inclusive run of item numbers walked from `start` towards `end`.
///
/// `end` is the walk's boundary: the step that reaches it force-flushes the
/// batch accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRange {
    pub start: u32,
    pub end: u32,
}

impl ItemRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_ascending(&self) -> bool {
        self.start <= self.end
    }

    /// Numbers in the range; never zero.
    pub fn count(&self) -> u32 {
        self.start.abs_diff(self.end) + 1
    }

    /// The number after `current` in walk order, or `None` once `current` is
    /// the boundary.
    pub fn step(&self, current: u32) -> Option<u32> {
        if current == self.end {
            None
        } else if self.is_ascending() {
            Some(current + 1)
        } else {
            Some(current - 1)
        }
    }
}

impl fmt::Display for ItemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// The walks one sync run has to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncRanges {
    pub older: Option<ItemRange>,
    pub newer: Option<ItemRange>,
}

/// Missing numbers below the lowest stored item, walked downward to 1.
pub fn older_range(local_min: Option<u32>) -> Option<ItemRange> {
    match local_min {
        Some(min) if min > 1 => Some(ItemRange::new(min - 1, 1)),
        _ => None,
    }
}

/// Missing numbers above the highest stored item.
///
/// With nothing stored, the whole archive is walked from `remote_latest`
/// down to 1 so the newest entries land first.
pub fn newer_range(local_max: Option<u32>, remote_latest: u32) -> Option<ItemRange> {
    if remote_latest == 0 {
        return None;
    }
    match local_max {
        None => Some(ItemRange::new(remote_latest, 1)),
        Some(max) if max < remote_latest => Some(ItemRange::new(max + 1, remote_latest)),
        Some(_) => None,
    }
}

pub fn compute_ranges(
    local_min: Option<u32>,
    local_max: Option<u32>,
    remote_latest: Option<u32>,
) -> SyncRanges {
    SyncRanges {
        older: older_range(local_min),
        newer: remote_latest.and_then(|latest| newer_range(local_max, latest)),
    }
}

/// Reads local extremes and interior holes from the store.
#[derive(Clone)]
pub struct GapResolver {
    store: Arc<dyn ItemStore>,
}

impl GapResolver {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    pub async fn local_extremes(&self) -> Result<(Option<u32>, Option<u32>)> {
        self.store.extremes().await
    }

    /// Holes strictly inside the stored range, each walked ascending.
    pub async fn interior_gaps(&self) -> Result<Vec<ItemRange>> {
        self.store.interior_gaps().await
    }
}
