//! Remote archive client.
//!
//! Fetches one JSON document per item (`{base}/{n}/info.0.json`, or
//! `{base}/info.0.json` for the latest item) and the image assets those
//! documents point to.
//!
//! # Absence
//!
//! A numbered slot that does not exist upstream (404 is the famous one)
//! answers with an HTML error page. Anything that does not decode as an item
//! is therefore reported as `None`: failures are logged and never propagate
//! to the caller.
//!
//! # High-resolution assets
//!
//! Many images have a double-resolution twin named `<stem>_2x.png`. With
//! `prefer_high_resolution`, [`ItemSource::fetch_asset`] tries that twin first
//! and silently falls back to the original URL.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::models::RemoteItem;

const ITEM_DOCUMENT: &str = "info.0.json";
const HIGH_RES_SUFFIX: &str = "_2x";

/// Why a single remote request produced nothing usable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },
    #[error("could not decode item from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{url} carried item #{got}, which does not match the requested slot")]
    Mismatch {
        url: String,
        expected: Option<u32>,
        got: u32,
    },
}

impl FetchError {
    /// A plain not-found answer, i.e. a documented hole rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Source of archive items and their assets.
///
/// Calls are independent; implementations must be safe to call from two
/// walks at once.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch item `number`, or the latest item when `None`.
    ///
    /// Returns `None` when the slot is missing or its payload is malformed.
    async fn fetch_item(&self, number: Option<u32>) -> Option<RemoteItem>;

    /// Fetch the bytes behind `url`, optionally preferring the
    /// high-resolution variant. `None` only after every attempt failed.
    async fn fetch_asset(&self, url: &str, prefer_high_resolution: bool) -> Option<Vec<u8>>;
}

/// Derive the high-resolution variant of an asset URL.
///
/// The path must end in `.png`; a query string or fragment is carried over
/// unchanged. `None` when the URL is already a high-resolution variant or is
/// not a PNG.
pub fn high_resolution_url(url: &str) -> Option<String> {
    let split = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split);
    let stem = path.strip_suffix(".png")?;
    if stem.ends_with(HIGH_RES_SUFFIX) {
        return None;
    }
    Some(format!("{}{}.png{}", stem, HIGH_RES_SUFFIX, suffix))
}

/// [`ItemSource`] over HTTP(S) using `reqwest`.
#[derive(Clone)]
pub struct HttpItemSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpItemSource {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        } else {
            builder = builder.user_agent(concat!("comic-mirror/", env!("CARGO_PKG_VERSION")));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the JSON document for `number` (latest when `None`).
    pub fn item_url(&self, number: Option<u32>) -> String {
        match number {
            Some(n) => format!("{}/{}/{}", self.base_url, n, ITEM_DOCUMENT),
            None => format!("{}/{}", self.base_url, ITEM_DOCUMENT),
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;

        if body.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(body.to_vec())
    }

    pub async fn try_fetch_item(&self, number: Option<u32>) -> Result<RemoteItem, FetchError> {
        let url = self.item_url(number);
        let body = self.get_bytes(&url).await?;
        let item = RemoteItem::from_json(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;

        // Slot numbers are positive and a numbered document must describe its own slot
        if item.number == 0 || number.is_some_and(|n| n != item.number) {
            return Err(FetchError::Mismatch {
                url,
                expected: number,
                got: item.number,
            });
        }
        Ok(item)
    }
}

#[async_trait]
impl ItemSource for HttpItemSource {
    async fn fetch_item(&self, number: Option<u32>) -> Option<RemoteItem> {
        match self.try_fetch_item(number).await {
            Ok(item) => Some(item),
            Err(e) if e.is_not_found() => {
                debug!(number = ?number, "item not found upstream");
                None
            }
            Err(e) => {
                warn!(number = ?number, error = %e, "treating unreadable item as absent");
                None
            }
        }
    }

    async fn fetch_asset(&self, url: &str, prefer_high_resolution: bool) -> Option<Vec<u8>> {
        if prefer_high_resolution {
            if let Some(high) = high_resolution_url(url) {
                match self.get_bytes(&high).await {
                    Ok(bytes) => return Some(bytes),
                    Err(e) => {
                        debug!(url = %high, error = %e, "high-resolution asset unavailable, falling back");
                    }
                }
            }
        }

        match self.get_bytes(url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(url = %url, error = %e, "asset unavailable");
                None
            }
        }
    }
}
