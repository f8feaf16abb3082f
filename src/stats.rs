//! Mirror statistics and health overview.
//!
//! Summarizes what is stored: item count, covered number range, interior
//! holes, database size and the most recent sync runs. Used by
//! `comic-mirror stats` to confirm that syncs are making progress.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::store::ItemStore;

const RECENT_RUNS: i64 = 5;

struct RunStats {
    finished_at: i64,
    latest: Option<i64>,
    fetched: i64,
    absent: i64,
    upserted: i64,
    failed_batches: i64,
    cancelled: bool,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let total = store.count().await?;
    let (min, max) = store.extremes().await?;
    let gaps = store.interior_gaps().await?;
    let missing: u64 = gaps.iter().map(|g| u64::from(g.count())).sum();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Comic Mirror - Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", total);
    match (min, max) {
        (Some(min), Some(max)) => println!("  Range:       #{} - #{}", min, max),
        _ => println!("  Range:       (empty)"),
    }
    println!(
        "  Holes:       {} missing in {} range(s)",
        missing,
        gaps.len()
    );

    let run_rows = sqlx::query(
        r#"
        SELECT finished_at, latest, fetched, absent, upserted, failed_batches, cancelled
        FROM sync_runs
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(RECENT_RUNS)
    .fetch_all(&pool)
    .await?;

    let runs: Vec<RunStats> = run_rows
        .iter()
        .map(|row| RunStats {
            finished_at: row.get("finished_at"),
            latest: row.get("latest"),
            fetched: row.get("fetched"),
            absent: row.get("absent"),
            upserted: row.get("upserted"),
            failed_batches: row.get("failed_batches"),
            cancelled: row.get("cancelled"),
        })
        .collect();

    println!();
    if runs.is_empty() {
        println!("  Last sync:   never");
    } else {
        println!("  Recent syncs:");
        println!(
            "  {:<18} {:>7} {:>8} {:>7} {:>9} {:>7}   {}",
            "FINISHED", "LATEST", "FETCHED", "ABSENT", "UPSERTED", "FAILED", "STATUS"
        );
        println!("  {}", "-".repeat(76));

        for run in &runs {
            let latest = run
                .latest
                .map(|n| format!("#{}", n))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<18} {:>7} {:>8} {:>7} {:>9} {:>7}   {}",
                format_ts_relative(run.finished_at),
                latest,
                run.fetched,
                run.absent,
                run.upserted,
                run.failed_batches,
                if run.cancelled { "cancelled" } else { "ok" }
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
