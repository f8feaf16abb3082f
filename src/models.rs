//! Core data models.
//!
//! [`RemoteItem`] is the wire shape of one archive entry; [`LocalItem`] is the
//! row kept in the local store, carrying a resolved date and folded twins of
//! every searchable text field.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{fold, fold_opt};

/// One archive entry as served by `info.0.json`.
///
/// Number 404 does not exist upstream; requesting it yields a non-JSON
/// response, which the remote source reports as absent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteItem {
    #[serde(rename = "num")]
    pub number: u32,
    /// HTML-ish title; a few entries carry markup here.
    pub title: String,
    /// Plain-text title.
    pub safe_title: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub day: String,
    #[serde(rename = "img")]
    pub image_url: String,
    #[serde(rename = "alt", default)]
    pub alt_text: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub news: String,
    #[serde(default)]
    pub transcript: String,
}

impl RemoteItem {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Durable, search-ready form of an item. `number` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalItem {
    pub number: u32,
    pub title: String,
    pub safe_title: String,
    pub safe_title_normalized: String,
    pub year: i32,
    pub month: String,
    pub day: String,
    pub date: NaiveDate,
    pub image_url: String,
    pub alt_text: Option<String>,
    pub alt_text_normalized: Option<String>,
    pub link: Option<String>,
    pub link_normalized: Option<String>,
    pub news: Option<String>,
    pub transcript: Option<String>,
    pub transcript_normalized: Option<String>,
    pub updated_at: i64,
}

impl LocalItem {
    /// Build the stored form of `item`, computing the resolved date and all
    /// normalized twins.
    pub fn from_remote(item: &RemoteItem) -> Self {
        let alt_text = non_empty(&item.alt_text);
        let link = non_empty(&item.link);
        let transcript = non_empty(&item.transcript);

        Self {
            number: item.number,
            title: item.title.clone(),
            safe_title: item.safe_title.clone(),
            safe_title_normalized: fold(&item.safe_title),
            year: item.year.trim().parse().unwrap_or(0),
            month: item.month.clone(),
            day: item.day.clone(),
            date: resolve_date(&item.year, &item.month, &item.day),
            image_url: item.image_url.clone(),
            alt_text_normalized: fold_opt(alt_text.as_deref()),
            alt_text,
            link_normalized: fold_opt(link.as_deref()),
            link,
            news: non_empty(&item.news),
            transcript_normalized: fold_opt(transcript.as_deref()),
            transcript,
            updated_at: Utc::now().timestamp(),
        }
    }

    /// True when every normalized twin equals the fold of its source field.
    pub fn normalized_fields_consistent(&self) -> bool {
        self.safe_title_normalized == fold(&self.safe_title)
            && self.alt_text_normalized == fold_opt(self.alt_text.as_deref())
            && self.link_normalized == fold_opt(self.link.as_deref())
            && self.transcript_normalized == fold_opt(self.transcript.as_deref())
    }

    /// True when the stored content mirrors `item` (ignores `updated_at`).
    pub fn mirrors(&self, item: &RemoteItem) -> bool {
        let fresh = LocalItem::from_remote(item);
        LocalItem {
            updated_at: self.updated_at,
            ..fresh
        } == *self
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Resolve wire date strings to a calendar date.
///
/// Unparsable or impossible dates resolve to the earliest representable date
/// instead of failing.
pub fn resolve_date(year: &str, month: &str, day: &str) -> NaiveDate {
    let parsed = (
        year.trim().parse::<i32>(),
        month.trim().parse::<u32>(),
        day.trim().parse::<u32>(),
    );
    match parsed {
        (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN),
        _ => NaiveDate::MIN,
    }
}
