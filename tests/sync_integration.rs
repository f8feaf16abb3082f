//! Sync engine tests against a scripted archive and real SQLite files.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use comic_mirror::batch::FlushPolicy;
use comic_mirror::config::Config;
use comic_mirror::db;
use comic_mirror::gaps::ItemRange;
use comic_mirror::gateway::{PersistenceGateway, StoreEvent};
use comic_mirror::memory_store::InMemoryStore;
use comic_mirror::migrate;
use comic_mirror::models::{LocalItem, RemoteItem};
use comic_mirror::progress::{SyncProgressEvent, SyncProgressReporter, WalkDirection};
use comic_mirror::remote::ItemSource;
use comic_mirror::sqlite_store::SqliteStore;
use comic_mirror::search::SearchQuery;
use comic_mirror::store::ItemStore;
use comic_mirror::sync::{SyncOrchestrator, SyncState};

fn comic(number: u32) -> RemoteItem {
    RemoteItem {
        number,
        title: format!("Comic {}", number),
        safe_title: format!("Comic {}", number),
        year: "2010".into(),
        month: "3".into(),
        day: format!("{}", number % 28 + 1),
        image_url: format!("https://imgs.example/comics/comic_{}.png", number),
        alt_text: format!("Alt text for {}", number),
        link: String::new(),
        news: String::new(),
        transcript: String::new(),
    }
}

/// Scripted remote archive: items `1..=latest`, minus `missing`.
struct Archive {
    latest: AtomicU32,
    latest_available: AtomicBool,
    missing: HashSet<u32>,
    overrides: HashMap<u32, RemoteItem>,
    cancel_at: Option<(u32, CancellationToken)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Archive {
    fn new(latest: u32) -> Self {
        Self {
            latest: AtomicU32::new(latest),
            latest_available: AtomicBool::new(true),
            missing: HashSet::new(),
            overrides: HashMap::new(),
            cancel_at: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn missing(mut self, numbers: &[u32]) -> Self {
        self.missing.extend(numbers.iter().copied());
        self
    }

    fn serving(mut self, number: u32, item: RemoteItem) -> Self {
        self.overrides.insert(number, item);
        self
    }

    fn cancelling_at(mut self, number: u32, token: CancellationToken) -> Self {
        self.cancel_at = Some((number, token));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn item(&self, number: u32) -> Option<RemoteItem> {
        if number == 0 || number > self.latest.load(Ordering::SeqCst) {
            return None;
        }
        if self.missing.contains(&number) {
            return None;
        }
        Some(
            self.overrides
                .get(&number)
                .cloned()
                .unwrap_or_else(|| comic(number)),
        )
    }
}

#[async_trait]
impl ItemSource for Archive {
    async fn fetch_item(&self, number: Option<u32>) -> Option<RemoteItem> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let result = match number {
            None if self.latest_available.load(Ordering::SeqCst) => {
                self.item(self.latest.load(Ordering::SeqCst))
            }
            None => None,
            Some(n) => self.item(n),
        };

        if let Some((at, token)) = &self.cancel_at {
            if number == Some(*at) {
                token.cancel();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_asset(&self, _url: &str, _prefer_high_resolution: bool) -> Option<Vec<u8>> {
        None
    }
}

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let pool = db::connect_path(&tmp.path().join("data").join("comics.sqlite"))
        .await
        .unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

async fn prestore(store: &dyn ItemStore, numbers: &[u32]) {
    let rows: Vec<LocalItem> = numbers
        .iter()
        .map(|n| LocalItem::from_remote(&comic(*n)))
        .collect();
    store.upsert_batch(&rows).await.unwrap();
}

fn policy(activity_threshold: usize, batch_size: usize) -> FlushPolicy {
    FlushPolicy {
        activity_threshold,
        batch_size,
    }
}

/// SQLite store whose next batch write fails while `fail_next` is set.
struct FlakyStore {
    inner: Arc<SqliteStore>,
    fail_next: AtomicBool,
    upserts: AtomicUsize,
}

impl FlakyStore {
    fn failing_once(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_next: AtomicBool::new(true),
            upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ItemStore for FlakyStore {
    async fn extremes(&self) -> Result<(Option<u32>, Option<u32>)> {
        self.inner.extremes().await
    }

    async fn get(&self, number: u32) -> Result<Option<LocalItem>> {
        self.inner.get(number).await
    }

    async fn search(&self, query: &SearchQuery, limit: i64) -> Result<Vec<LocalItem>> {
        self.inner.search(query, limit).await
    }

    async fn upsert_batch(&self, items: &[LocalItem]) -> Result<usize> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        self.inner.upsert_batch(items).await
    }

    async fn count(&self) -> Result<i64> {
        self.inner.count().await
    }

    async fn interior_gaps(&self) -> Result<Vec<ItemRange>> {
        self.inner.interior_gaps().await
    }
}

#[derive(Default)]
struct RecordingProgress {
    committed: Mutex<Vec<usize>>,
}

impl SyncProgressReporter for RecordingProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let SyncProgressEvent::BatchCommitted { count } = event {
            self.committed.lock().unwrap().push(count);
        }
    }
}

fn state_rank(state: SyncState) -> usize {
    match state {
        SyncState::Idle => 0,
        SyncState::ResolvingLatest => 1,
        SyncState::Walking => 2,
        SyncState::Draining => 3,
        SyncState::Done => 4,
    }
}

#[tokio::test]
async fn test_empty_store_mirrors_whole_archive() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let archive = Arc::new(Archive::new(10).missing(&[4]));
    let flush = FlushPolicy::from(&Config::minimal().sync);

    let orchestrator = SyncOrchestrator::new(archive.clone(), store.clone(), flush);
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.latest, Some(10));
    assert!(report.walk(WalkDirection::Older).is_none());
    let newer = report.walk(WalkDirection::Newer).unwrap();
    assert_eq!(newer.range, ItemRange::new(10, 1));
    assert!(newer.completed);
    assert_eq!(report.fetched(), 9);
    assert_eq!(report.absent(), 1);
    assert_eq!(report.upserted(), 9);
    assert_eq!(report.remote_calls() as usize, archive.calls());
    assert_eq!(archive.calls(), 11);

    assert_eq!(store.count().await.unwrap(), 9);
    assert_eq!(store.extremes().await.unwrap(), (Some(1), Some(10)));
    assert!(store.get(4).await.unwrap().is_none());
    assert_eq!(orchestrator.state(), SyncState::Done);
}

#[tokio::test]
async fn test_fills_both_sides_of_stored_range() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[5, 6, 7]).await;
    let archive = Arc::new(Archive::new(10));

    let orchestrator = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default());
    let report = orchestrator.run().await.unwrap();

    assert_eq!(
        report.walk(WalkDirection::Older).unwrap().range,
        ItemRange::new(4, 1)
    );
    assert_eq!(
        report.walk(WalkDirection::Newer).unwrap().range,
        ItemRange::new(8, 10)
    );
    // latest + 4 older + 3 newer
    assert_eq!(archive.calls(), 8);
    assert_eq!(report.upserted(), 7);
    assert_eq!(store.count().await.unwrap(), 10);
    assert!(store.interior_gaps().await.unwrap().is_empty());
    assert!(archive.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_second_run_only_asks_for_latest() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let archive = Arc::new(Archive::new(30).missing(&[17]));

    SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();
    let before = archive.calls();

    let report = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();

    assert_eq!(archive.calls() - before, 1);
    assert!(report.walks.is_empty());
    assert_eq!(report.upserted(), 0);
    assert_eq!(store.count().await.unwrap(), 29);
}

#[tokio::test]
async fn test_new_items_are_picked_up_on_next_run() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let archive = Arc::new(Archive::new(5));

    SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();

    archive.latest.store(8, Ordering::SeqCst);
    let before = archive.calls();
    let report = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();

    assert_eq!(archive.calls() - before, 4);
    assert_eq!(
        report.walk(WalkDirection::Newer).unwrap().range,
        ItemRange::new(6, 8)
    );
    assert_eq!(store.extremes().await.unwrap(), (Some(1), Some(8)));
}

#[tokio::test]
async fn test_boundaries_force_flush_below_thresholds() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[5]).await;
    let archive = Arc::new(Archive::new(8));

    let orchestrator = SyncOrchestrator::new(archive, store.clone(), policy(0, 1000));
    let mut events = orchestrator.gateway().subscribe();
    let report = orchestrator.run().await.unwrap();

    // One flush per walk boundary, nothing left for the drain
    assert_eq!(report.batches.committed_batches, 2);
    assert_eq!(report.batches.committed_items, 7);
    assert_eq!(store.count().await.unwrap(), 8);

    let mut committed = Vec::new();
    while let Ok(StoreEvent::Committed { numbers }) = events.try_recv() {
        committed.extend(numbers);
    }
    committed.sort_unstable();
    assert_eq!(committed, vec![1, 2, 3, 4, 6, 7, 8]);
}

#[tokio::test]
async fn test_absent_boundary_still_flushes() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[4, 5]).await;
    // Slot 1 ends the older walk but was never published
    let archive = Arc::new(Archive::new(5).missing(&[1]));

    let orchestrator = SyncOrchestrator::new(archive, store.clone(), policy(0, 1000));
    let mut events = orchestrator.gateway().subscribe();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.latest, Some(5));
    assert_eq!(report.batches.committed_batches, 1);
    assert_eq!(
        events.try_recv().unwrap(),
        StoreEvent::Committed {
            numbers: vec![3, 2]
        }
    );
    assert!(events.try_recv().is_err());
    assert_eq!(store.extremes().await.unwrap(), (Some(2), Some(5)));
}

#[tokio::test]
async fn test_unavailable_latest_still_walks_older() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[5, 6]).await;
    let archive = Arc::new(Archive::new(8));
    archive.latest_available.store(false, Ordering::SeqCst);

    let report = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();

    assert!(report.latest_unavailable());
    assert!(report.walk(WalkDirection::Newer).is_none());
    assert!(report.walk(WalkDirection::Older).unwrap().completed);
    assert_eq!(store.extremes().await.unwrap(), (Some(1), Some(6)));

    // Next run picks the newer side up once the latest lookup answers
    archive.latest_available.store(true, Ordering::SeqCst);
    let report = SyncOrchestrator::new(archive, store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();
    assert_eq!(report.latest, Some(8));
    assert_eq!(store.count().await.unwrap(), 8);
}

#[tokio::test]
async fn test_failed_batch_rolls_back_and_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore::failing_once(sqlite_store(&tmp).await));
    let archive = Arc::new(Archive::new(5));

    let report = SyncOrchestrator::new(archive.clone(), store.clone(), policy(0, 1000))
        .run()
        .await
        .unwrap();

    assert_eq!(archive.calls(), 6);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(report.batches.failed_batches, 1);
    assert_eq!(report.batches.failed_items, 5);
    assert_eq!(report.upserted(), 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_items_for_other_slots_are_absent() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let archive = Arc::new(
        Archive::new(5)
            .serving(3, comic(0))
            .serving(2, comic(9)),
    );

    let report = SyncOrchestrator::new(archive, store.clone(), policy(0, 1000))
        .run()
        .await
        .unwrap();

    assert_eq!(report.fetched(), 3);
    assert_eq!(report.absent(), 2);
    assert_eq!(report.batches.failed_batches, 0);
    assert_eq!(report.upserted(), 3);
    assert!(store.get(9).await.unwrap().is_none());
    assert_eq!(
        store.interior_gaps().await.unwrap(),
        vec![ItemRange::new(2, 3)]
    );
}

#[tokio::test]
async fn test_gateway_rollback_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let gateway = PersistenceGateway::new(store.clone());
    let mut events = gateway.subscribe();

    let err = gateway
        .upsert(&[comic(1), comic(0), comic(2)])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("rolled back"));
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_upsert_updates_in_place_and_refolds() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let gateway = PersistenceGateway::new(store.clone());

    gateway.upsert(&[comic(3)]).await.unwrap();

    let mut revised = comic(3);
    revised.safe_title = "Café Noir".to_string();
    revised.transcript = "[[Ümlauts everywhere]]".to_string();
    gateway.upsert(&[revised.clone()]).await.unwrap();

    let stored = store.get(3).await.unwrap().unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(stored.safe_title_normalized, "cafe noir");
    assert_eq!(
        stored.transcript_normalized.as_deref(),
        Some("[[umlauts everywhere]]")
    );
    assert!(stored.normalized_fields_consistent());
    assert!(stored.mirrors(&revised));
}

#[tokio::test]
async fn test_cancellation_drains_accepted_items() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let cancel = CancellationToken::new();
    let archive = Arc::new(Archive::new(10).cancelling_at(7, cancel.clone()));

    let orchestrator = SyncOrchestrator::new(archive.clone(), store.clone(), policy(0, 1000))
        .with_cancellation(cancel);
    let report = orchestrator.run().await.unwrap();

    assert!(report.cancelled);
    let newer = report.walk(WalkDirection::Newer).unwrap();
    assert!(!newer.completed);
    assert_eq!(newer.fetched, 4);
    // latest + 10, 9, 8, 7
    assert_eq!(archive.calls(), 5);
    assert_eq!(store.count().await.unwrap(), 4);
    assert_eq!(store.extremes().await.unwrap(), (Some(7), Some(10)));
    assert_eq!(orchestrator.state(), SyncState::Done);
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_requests() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[5]).await;
    let archive = Arc::new(Archive::new(8));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.latest_checked);
    assert_eq!(report.remote_calls(), 0);
    assert_eq!(archive.calls(), 0);
    assert!(!report.walk(WalkDirection::Older).unwrap().completed);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_progress_reports_every_committed_batch() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let archive = Arc::new(Archive::new(12).missing(&[7]));
    let progress = Arc::new(RecordingProgress::default());

    let report = SyncOrchestrator::new(archive, store.clone(), policy(3, 4))
        .with_progress(progress.clone())
        .run()
        .await
        .unwrap();

    let committed = progress.committed.lock().unwrap().clone();
    assert_eq!(committed.len(), report.batches.committed_batches);
    assert_eq!(committed.iter().sum::<usize>(), report.upserted());
    assert_eq!(report.upserted(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_state_only_moves_forward() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[10]).await;
    let archive = Arc::new(Archive::new(20));

    let orchestrator = SyncOrchestrator::new(archive, store, FlushPolicy::default());
    let mut states = orchestrator.watch_state();
    assert_eq!(*states.borrow(), SyncState::Idle);

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == SyncState::Done || states.changed().await.is_err() {
                break;
            }
        }
        seen
    });

    orchestrator.run().await.unwrap();
    let seen = watcher.await.unwrap();

    assert_eq!(seen.last(), Some(&SyncState::Done));
    assert!(seen
        .windows(2)
        .all(|pair| state_rank(pair[0]) <= state_rank(pair[1])));
}

#[tokio::test]
async fn test_repair_fills_interior_holes() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    prestore(store.as_ref(), &[1, 2, 5, 9, 10]).await;
    let archive = Arc::new(Archive::new(10));

    let plain = SyncOrchestrator::new(archive.clone(), store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();
    assert!(plain.walks.is_empty());
    assert_eq!(store.count().await.unwrap(), 5);

    let report = SyncOrchestrator::new(archive, store.clone(), FlushPolicy::default())
        .with_repair(true)
        .run()
        .await
        .unwrap();

    let repairs: Vec<ItemRange> = report
        .walks
        .iter()
        .filter(|w| w.direction == WalkDirection::Repair)
        .map(|w| w.range)
        .collect();
    assert_eq!(repairs, vec![ItemRange::new(3, 4), ItemRange::new(6, 8)]);
    assert_eq!(store.count().await.unwrap(), 10);
    assert!(store.interior_gaps().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_in_memory_store_behaves_like_sqlite() {
    let store = Arc::new(InMemoryStore::new());
    prestore(store.as_ref(), &[40]).await;
    let archive = Arc::new(Archive::new(75).missing(&[12, 60]));

    let report = SyncOrchestrator::new(archive, store.clone(), policy(5, 7))
        .run()
        .await
        .unwrap();

    assert_eq!(report.upserted(), 72);
    assert_eq!(report.batches.failed_batches, 0);
    assert_eq!(store.count().await.unwrap(), 73);
    assert_eq!(
        store.interior_gaps().await.unwrap(),
        vec![ItemRange::new(12, 12), ItemRange::new(60, 60)]
    );
}

#[tokio::test]
async fn test_search_over_synced_items() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let mut special = comic(2);
    special.safe_title = "Résumé Tips".to_string();
    let archive = Arc::new(Archive::new(3).serving(2, special));

    SyncOrchestrator::new(archive, store.clone(), FlushPolicy::default())
        .run()
        .await
        .unwrap();

    let query = SearchQuery::parse("resume");
    let hits = store.search(&query, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].number, 2);

    let by_number = store
        .search(&SearchQuery::parse("#3"), 10)
        .await
        .unwrap();
    assert_eq!(by_number[0].number, 3);

    let all = store
        .search(&SearchQuery::parse("comic"), 10)
        .await
        .unwrap();
    let numbers: Vec<u32> = all.iter().map(|i| i.number).collect();
    assert_eq!(numbers, vec![3, 1]);
}
