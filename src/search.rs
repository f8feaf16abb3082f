//! Normalized-field search over the local mirror.
//!
//! A raw query is turned into two predicates:
//!
//! - a `LIKE` pattern: the alphanumeric runs of the query, folded and joined
//!   with `%` (`"Café, time"` → `%cafe%time%`), matched against the folded
//!   title, alt text, transcript and link;
//! - an exact number: every decimal digit in the query concatenated
//!   (`"#2050"` → `2050`).
//!
//! Results are ordered newest first.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::LocalItem;
use crate::sqlite_store::SqliteStore;
use crate::store::ItemStore;

pub const DEFAULT_SEARCH_LIMIT: i64 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Folded alphanumeric runs, in query order.
    pub terms: Vec<String>,
    pub number: Option<u32>,
}

impl SearchQuery {
    pub fn parse(raw: &str) -> Self {
        let terms = raw
            .split(|c: char| !c.is_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(crate::normalize::fold)
            .collect();

        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let number = if digits.is_empty() {
            None
        } else {
            digits.parse::<u32>().ok()
        };

        Self { terms, number }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.number.is_none()
    }

    /// SQL `LIKE` pattern for the folded columns, or `None` if the query had
    /// no alphanumeric content.
    pub fn like_pattern(&self) -> Option<String> {
        if self.terms.is_empty() {
            None
        } else {
            Some(format!("%{}%", self.terms.join("%")))
        }
    }

    /// In-process equivalent of the SQL predicate, for stores without SQL.
    pub fn matches(&self, item: &LocalItem) -> bool {
        if self.number == Some(item.number) {
            return true;
        }
        if self.terms.is_empty() {
            return false;
        }

        [
            Some(item.safe_title_normalized.as_str()),
            item.alt_text_normalized.as_deref(),
            item.transcript_normalized.as_deref(),
            item.link_normalized.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| self.terms_in_order(field))
    }

    fn terms_in_order(&self, haystack: &str) -> bool {
        let mut rest = haystack;
        for term in &self.terms {
            match rest.find(term.as_str()) {
                Some(pos) => rest = &rest[pos + term.len()..],
                None => return false,
            }
        }
        true
    }
}

/// CLI entry point for `comic-mirror search`.
pub async fn run_search(config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let parsed = SearchQuery::parse(query);
    if parsed.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let results = store
        .search(&parsed, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;

    if results.is_empty() {
        println!("No results.");
    } else {
        for item in &results {
            println!(
                "#{:<5} {}  {}",
                item.number,
                crate::get::format_date(item.date),
                item.safe_title
            );
        }
        println!();
        println!("{} result(s)", results.len());
    }

    pool.close().await;
    Ok(())
}
