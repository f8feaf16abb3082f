//! Sync orchestration.
//!
//! One run moves through
//!
//! ```text
//! Idle → ResolvingLatest → Walking → Draining → Done
//! ```
//!
//! On entry the local extremes are read. The older walk (everything below
//! the lowest stored number) starts right away; the newer walk starts once
//! the latest lookup has answered. The two walks run concurrently, but each is
//! strictly sequential: fetch `n`, offer the result, then fetch the next
//! number. That caps this engine at two outstanding requests and makes the
//! last step of every walk a known force-flush point.
//!
//! If the latest lookup fails, only the older walk runs; the report records
//! the lookup failure so it is not mistaken for "already up to date".
//!
//! Cancellation is cooperative: a walk checks the token before each fetch,
//! results already in flight are still offered, and `Draining` flushes
//! whatever is pending.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{BatchAccumulator, BatchStats, FlushOutcome, FlushPolicy};
use crate::config::Config;
use crate::db;
use crate::gaps::{newer_range, older_range, GapResolver, ItemRange};
use crate::gateway::PersistenceGateway;
use crate::migrate;
use crate::progress::{NoProgress, ProgressMode, SyncProgressEvent, SyncProgressReporter, WalkDirection};
use crate::remote::{HttpItemSource, ItemSource};
use crate::sqlite_store::SqliteStore;
use crate::store::ItemStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    ResolvingLatest,
    Walking,
    Draining,
    Done,
}

/// Outcome of one walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub direction: WalkDirection,
    pub range: ItemRange,
    pub fetched: u32,
    pub absent: u32,
    /// False when the walk stopped early on cancellation.
    pub completed: bool,
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub local_min: Option<u32>,
    pub local_max: Option<u32>,
    /// `None` when the latest lookup failed or never ran.
    pub latest: Option<u32>,
    /// False when the run was cancelled before the latest lookup was sent.
    pub latest_checked: bool,
    pub walks: Vec<WalkReport>,
    pub batches: BatchStats,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn latest_unavailable(&self) -> bool {
        self.latest.is_none()
    }

    pub fn fetched(&self) -> u32 {
        self.walks.iter().map(|w| w.fetched).sum()
    }

    pub fn absent(&self) -> u32 {
        self.walks.iter().map(|w| w.absent).sum()
    }

    /// Remote item requests made, the latest lookup included.
    pub fn remote_calls(&self) -> u32 {
        self.fetched() + self.absent() + u32::from(self.latest_checked)
    }

    pub fn upserted(&self) -> usize {
        self.batches.committed_items
    }

    pub fn walk(&self, direction: WalkDirection) -> Option<&WalkReport> {
        self.walks.iter().find(|w| w.direction == direction)
    }
}

pub struct SyncOrchestrator {
    source: Arc<dyn ItemSource>,
    gaps: GapResolver,
    gateway: Arc<PersistenceGateway>,
    accumulator: BatchAccumulator,
    progress: Arc<dyn SyncProgressReporter>,
    cancel: CancellationToken,
    repair: bool,
    state: watch::Sender<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn ItemSource>, store: Arc<dyn ItemStore>, policy: FlushPolicy) -> Self {
        let gateway = Arc::new(PersistenceGateway::new(store.clone()));
        let accumulator = BatchAccumulator::new(policy, gateway.clone());
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            source,
            gaps: GapResolver::new(store),
            gateway,
            accumulator,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
            repair: false,
            state,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Also walk holes strictly inside the stored range.
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run one sync to completion (or until cancelled).
    ///
    /// Only local-store read failures are returned as errors; remote and
    /// batch failures are logged and reflected in the report.
    pub async fn run(&self) -> Result<SyncReport> {
        self.state.send_replace(SyncState::ResolvingLatest);

        let (local_min, local_max) = self
            .gaps
            .local_extremes()
            .await
            .context("Failed to read local extremes")?;
        let repairs = if self.repair {
            self.gaps
                .interior_gaps()
                .await
                .context("Failed to read interior gaps")?
        } else {
            Vec::new()
        };

        let older = async {
            let mut reports = Vec::new();
            if let Some(range) = older_range(local_min) {
                self.state.send_replace(SyncState::Walking);
                reports.push(self.walk(WalkDirection::Older, range).await);
            }
            for range in &repairs {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.state.send_replace(SyncState::Walking);
                reports.push(self.walk(WalkDirection::Repair, *range).await);
            }
            reports
        };

        let newer = async {
            if self.cancel.is_cancelled() {
                return (false, None, None);
            }
            let Some(latest) = self.resolve_latest().await else {
                return (true, None, None);
            };
            match newer_range(local_max, latest) {
                Some(range) => {
                    self.state.send_replace(SyncState::Walking);
                    let walk = self.walk(WalkDirection::Newer, range).await;
                    (true, Some(latest), Some(walk))
                }
                None => {
                    info!(latest, "no newer items");
                    (true, Some(latest), None)
                }
            }
        };

        let (mut walks, (latest_checked, latest, newer_walk)) = tokio::join!(older, newer);
        walks.extend(newer_walk);

        self.state.send_replace(SyncState::Draining);
        let drained = self.accumulator.drain().await;
        self.report_flush(drained);

        let report = SyncReport {
            local_min,
            local_max,
            latest,
            latest_checked,
            walks,
            batches: self.accumulator.stats().await,
            cancelled: self.cancel.is_cancelled(),
        };
        self.state.send_replace(SyncState::Done);

        info!(
            latest = ?report.latest,
            fetched = report.fetched(),
            absent = report.absent(),
            upserted = report.upserted(),
            failed_batches = report.batches.failed_batches,
            cancelled = report.cancelled,
            "sync finished"
        );
        Ok(report)
    }

    async fn resolve_latest(&self) -> Option<u32> {
        match self.source.fetch_item(None).await {
            Some(item) => {
                self.progress.report(SyncProgressEvent::Latest {
                    number: item.number,
                });
                Some(item.number)
            }
            None => {
                warn!("latest item unavailable; newer items will be retried next run");
                self.progress.report(SyncProgressEvent::LatestUnavailable);
                None
            }
        }
    }

    fn report_flush(&self, outcome: FlushOutcome) {
        if let FlushOutcome::Committed(count) = outcome {
            self.progress.report(SyncProgressEvent::BatchCommitted { count });
        }
    }

    /// Fetch every number of `range` in order, one request at a time.
    async fn walk(&self, direction: WalkDirection, range: ItemRange) -> WalkReport {
        info!(direction = direction.as_str(), range = %range, "walking");
        self.progress
            .report(SyncProgressEvent::WalkStarted { direction, range });

        let mut report = WalkReport {
            direction,
            range,
            fetched: 0,
            absent: 0,
            completed: false,
        };
        let total = range.count();
        let mut current = range.start;

        loop {
            if self.cancel.is_cancelled() {
                info!(direction = direction.as_str(), next = current, "walk cancelled");
                break;
            }

            let item = self
                .source
                .fetch_item(Some(current))
                .await
                .filter(|item| {
                    let matches = item.number == current;
                    if !matches {
                        warn!(
                            requested = current,
                            got = item.number,
                            "discarding item for another slot"
                        );
                    }
                    matches
                });
            let found = item.is_some();
            if found {
                report.fetched += 1;
            } else {
                report.absent += 1;
            }
            self.progress.report(SyncProgressEvent::Fetched {
                direction,
                number: current,
                found,
                done: report.fetched + report.absent,
                total,
            });

            let next = range.step(current);
            let outcome = self.accumulator.offer(item, next.is_none()).await;
            self.report_flush(outcome);

            match next {
                Some(n) => current = n,
                None => {
                    report.completed = true;
                    break;
                }
            }
        }

        report
    }
}

/// CLI entry point for `comic-mirror sync`.
pub async fn run_sync(config: &Config, repair: bool, progress: ProgressMode) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool)
        .await
        .context("Failed to prepare database schema")?;

    let store: Arc<dyn ItemStore> = Arc::new(SqliteStore::new(pool.clone()));
    let source: Arc<dyn ItemSource> = Arc::new(HttpItemSource::new(&config.remote)?);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight requests");
                cancel.cancel();
            }
        })
    };

    let started_at = chrono::Utc::now().timestamp();
    let orchestrator = SyncOrchestrator::new(source, store, FlushPolicy::from(&config.sync))
        .with_progress(Arc::from(progress.reporter()))
        .with_cancellation(cancel)
        .with_repair(repair);
    let report = orchestrator.run().await?;
    ctrl_c.abort();

    record_run(&pool, started_at, &report).await?;

    println!("sync");
    match report.latest {
        Some(latest) => println!("  latest: #{}", latest),
        None if !report.latest_checked => println!("  latest: not checked"),
        None => println!("  latest: unavailable (will retry next run)"),
    }
    for walk in &report.walks {
        println!(
            "  {} {}: {} fetched, {} absent{}",
            walk.direction.as_str(),
            walk.range,
            walk.fetched,
            walk.absent,
            if walk.completed { "" } else { " (stopped)" }
        );
    }
    println!("  fetched: {}", report.fetched());
    println!("  absent: {}", report.absent());
    println!("  upserted: {}", report.upserted());
    println!("  requests: {}", report.remote_calls());
    println!("  failed batches: {}", report.batches.failed_batches);
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

async fn record_run(pool: &sqlx::SqlitePool, started_at: i64, report: &SyncReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (started_at, finished_at, latest, fetched, absent, upserted, failed_batches, cancelled)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(report.latest.map(i64::from))
    .bind(i64::from(report.fetched()))
    .bind(i64::from(report.absent()))
    .bind(report.upserted() as i64)
    .bind(report.batches.failed_batches as i64)
    .bind(report.cancelled)
    .execute(pool)
    .await?;
    Ok(())
}
