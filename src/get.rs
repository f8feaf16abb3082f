//! Item retrieval by number.
//!
//! Used by `comic-mirror get` (print the stored record) and
//! `comic-mirror image` (download the item's image, preferring the
//! high-resolution variant).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::db;
use crate::models::LocalItem;
use crate::remote::{HttpItemSource, ItemSource};
use crate::sqlite_store::SqliteStore;
use crate::store::ItemStore;

/// Render a resolved date; the fallback date renders as `unknown`.
pub fn format_date(date: NaiveDate) -> String {
    if date == NaiveDate::MIN {
        "unknown".to_string()
    } else {
        date.format("%Y-%m-%d").to_string()
    }
}

/// Look up a stored item (used by both `get` and `image`).
pub async fn get_item(config: &Config, number: u32) -> Result<LocalItem> {
    let pool = db::connect(config).await?;
    let item = SqliteStore::new(pool.clone()).get(number).await;
    pool.close().await;

    match item? {
        Some(item) => Ok(item),
        None => bail!("item not found: #{}", number),
    }
}

/// CLI entry point for `comic-mirror get`.
pub async fn run_get(config: &Config, number: u32) -> Result<()> {
    let item = get_item(config, number).await?;

    println!("--- #{} ---", item.number);
    println!("title:      {}", item.safe_title);
    if item.title != item.safe_title {
        println!("raw title:  {}", item.title);
    }
    println!("date:       {}", format_date(item.date));
    println!("image:      {}", item.image_url);
    if let Some(ref link) = item.link {
        println!("link:       {}", link);
    }
    println!("updated_at: {}", format_ts_iso(item.updated_at));
    if let Some(ref alt) = item.alt_text {
        println!();
        println!("{}", alt);
    }
    if let Some(ref news) = item.news {
        println!();
        println!("--- News ---");
        println!("{}", news);
    }
    if let Some(ref transcript) = item.transcript {
        println!();
        println!("--- Transcript ---");
        println!("{}", transcript);
    }

    Ok(())
}

/// CLI entry point for `comic-mirror image`.
///
/// Writes to `out`, or to the image's file name in the current directory.
pub async fn run_image(
    config: &Config,
    number: u32,
    out: Option<PathBuf>,
    normal_resolution: bool,
) -> Result<()> {
    let item = get_item(config, number).await?;
    let source = HttpItemSource::new(&config.remote)?;

    let Some(bytes) = source
        .fetch_asset(&item.image_url, !normal_resolution)
        .await
    else {
        bail!("image for #{} could not be downloaded", number);
    };

    let path = out.unwrap_or_else(|| default_image_path(&item.image_url, number));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("#{}: wrote {} bytes to {}", number, bytes.len(), path.display());
    Ok(())
}

fn default_image_path(url: &str, number: u32) -> PathBuf {
    let name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.png", number));
    Path::new(".").join(name)
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
