//! # Comic Mirror
//!
//! Keeps a local, durable and searchable copy of a numbered comic archive.
//!
//! Each sync run compares what is stored against what the remote archive
//! publishes and fetches only the missing numbers: everything below the
//! lowest stored number, and everything between the highest stored number
//! and the remote's latest. Items are folded into search-ready form and
//! written in transactional batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────┐   ┌──────────┐
//! │ ItemSource   │──▶│ SyncOrchestr.  │──▶│ BatchAccum.  │──▶│ Gateway  │
//! │ (HTTP JSON)  │   │ older + newer  │   │ eager→batched│   │ tx upsert│
//! └──────────────┘   └───────┬────────┘   └──────────────┘   └────┬─────┘
//!                            │ extremes                           ▼
//!                     ┌──────┴──────┐                       ┌──────────┐
//!                     │ GapResolver │◀──────────────────────│  SQLite  │
//!                     └─────────────┘                       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! comic-mirror init
//! comic-mirror sync
//! comic-mirror search "velociraptor"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire and stored item types |
//! | [`normalize`] | Diacritic and case folding for search |
//! | [`remote`] | Remote item source over HTTP |
//! | [`gaps`] | Missing-range computation |
//! | [`batch`] | Flush policy and batch accumulation |
//! | [`gateway`] | Transactional persistence and change events |
//! | [`sync`] | Sync orchestration |
//! | [`store`] | Storage trait |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`memory_store`] | In-memory storage backend |
//! | [`search`] | Normalized-field search |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod config;
pub mod db;
pub mod gaps;
pub mod gateway;
pub mod get;
pub mod memory_store;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod remote;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod sync;
