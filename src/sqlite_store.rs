//! SQLite-backed [`ItemStore`] implementation.
//!
//! Maps every trait operation onto the `items` table created by
//! [`migrate`](crate::migrate). Batch upserts run in one transaction: each
//! item is looked up by number and updated in place or inserted; any failure
//! rolls the whole batch back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::gaps::ItemRange;
use crate::models::LocalItem;
use crate::search::SearchQuery;
use crate::store::ItemStore;

const ITEM_COLUMNS: &str = "number, title, safe_title, safe_title_normalized, year, month, day, \
    date_days, image_url, alt_text, alt_text_normalized, link, link_normalized, news, \
    transcript, transcript_normalized, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn date_to_days(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

fn days_to_date(days: i64) -> NaiveDate {
    i32::try_from(days)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .unwrap_or(NaiveDate::MIN)
}

fn to_number(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("item number out of range: {}", value))
}

fn row_to_item(row: &SqliteRow) -> Result<LocalItem> {
    Ok(LocalItem {
        number: to_number(row.try_get("number")?)?,
        title: row.try_get("title")?,
        safe_title: row.try_get("safe_title")?,
        safe_title_normalized: row.try_get("safe_title_normalized")?,
        year: row.try_get("year")?,
        month: row.try_get("month")?,
        day: row.try_get("day")?,
        date: days_to_date(row.try_get("date_days")?),
        image_url: row.try_get("image_url")?,
        alt_text: row.try_get("alt_text")?,
        alt_text_normalized: row.try_get("alt_text_normalized")?,
        link: row.try_get("link")?,
        link_normalized: row.try_get("link_normalized")?,
        news: row.try_get("news")?,
        transcript: row.try_get("transcript")?,
        transcript_normalized: row.try_get("transcript_normalized")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn write_item(conn: &mut SqliteConnection, item: &LocalItem) -> Result<()> {
    let number = i64::from(item.number);
    let existing: Option<i64> = sqlx::query_scalar("SELECT number FROM items WHERE number = ?")
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?;

    let sql = if existing.is_some() {
        r#"
        UPDATE items SET
            title = ?, safe_title = ?, safe_title_normalized = ?, year = ?, month = ?, day = ?,
            date_days = ?, image_url = ?, alt_text = ?, alt_text_normalized = ?, link = ?,
            link_normalized = ?, news = ?, transcript = ?, transcript_normalized = ?, updated_at = ?
        WHERE number = ?
        "#
    } else {
        r#"
        INSERT INTO items (
            title, safe_title, safe_title_normalized, year, month, day,
            date_days, image_url, alt_text, alt_text_normalized, link,
            link_normalized, news, transcript, transcript_normalized, updated_at, number
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    };

    sqlx::query(sql)
        .bind(&item.title)
        .bind(&item.safe_title)
        .bind(&item.safe_title_normalized)
        .bind(item.year)
        .bind(&item.month)
        .bind(&item.day)
        .bind(date_to_days(item.date))
        .bind(&item.image_url)
        .bind(&item.alt_text)
        .bind(&item.alt_text_normalized)
        .bind(&item.link)
        .bind(&item.link_normalized)
        .bind(&item.news)
        .bind(&item.transcript)
        .bind(&item.transcript_normalized)
        .bind(item.updated_at)
        .bind(number)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to write item #{}", item.number))?;

    Ok(())
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn extremes(&self) -> Result<(Option<u32>, Option<u32>)> {
        let (min, max): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(number), MAX(number) FROM items")
                .fetch_one(&self.pool)
                .await?;

        Ok((min.map(to_number).transpose()?, max.map(to_number).transpose()?))
    }

    async fn get(&self, number: u32) -> Result<Option<LocalItem>> {
        let row = sqlx::query(&format!("SELECT {} FROM items WHERE number = ?", ITEM_COLUMNS))
            .bind(i64::from(number))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn search(&self, query: &SearchQuery, limit: i64) -> Result<Vec<LocalItem>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = query.like_pattern();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM items
            WHERE safe_title_normalized LIKE ?
               OR number = ?
               OR alt_text_normalized LIKE ?
               OR transcript_normalized LIKE ?
               OR link_normalized LIKE ?
            ORDER BY number DESC
            LIMIT ?
            "#,
            ITEM_COLUMNS
        ))
        .bind(pattern.as_deref())
        .bind(query.number.map(i64::from))
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn upsert_batch(&self, items: &[LocalItem]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            if let Err(e) = write_item(&mut tx, item).await {
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await.context("Failed to commit batch")?;
        Ok(items.len())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn interior_gaps(&self) -> Result<Vec<ItemRange>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT number + 1, next_number - 1 FROM (
                SELECT number, LEAD(number) OVER (ORDER BY number) AS next_number FROM items
            )
            WHERE next_number - number > 1
            ORDER BY number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(start, end)| Ok(ItemRange::new(to_number(start)?, to_number(end)?)))
            .collect()
    }
}
