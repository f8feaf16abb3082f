use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per item number; *_normalized columns are folded twins used by search
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            number INTEGER PRIMARY KEY CHECK (number > 0),
            title TEXT NOT NULL,
            safe_title TEXT NOT NULL,
            safe_title_normalized TEXT NOT NULL,
            year INTEGER NOT NULL,
            month TEXT NOT NULL,
            day TEXT NOT NULL,
            date_days INTEGER NOT NULL,
            image_url TEXT NOT NULL,
            alt_text TEXT,
            alt_text_normalized TEXT,
            link TEXT,
            link_normalized TEXT,
            news TEXT,
            transcript TEXT,
            transcript_normalized TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            latest INTEGER,
            fetched INTEGER NOT NULL,
            absent INTEGER NOT NULL,
            upserted INTEGER NOT NULL,
            failed_batches INTEGER NOT NULL,
            cancelled INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_date ON items(date_days DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_year ON items(year)")
        .execute(pool)
        .await?;

    Ok(())
}
