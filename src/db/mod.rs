//! Persistence adapter.
//!
//! `Store` wraps a single `SqlitePool` and owns the on-disk schema: a
//! `journal` table recording accepted tasks (the append-only log the
//! dispatcher and duplicate-check consult), a `users` table holding
//! per-user settings, `rss_feeds`/`rss_filters` for feed monitoring, and a
//! generic `kv` table for the process-wide config document and any per-bot
//! subdocuments and credential blobs.
//!
//! Submodules are organized by domain — journal, users, rss, kv — the
//! same per-entity split a larger articles/downloads/history schema would
//! use, just over this crate's entity set.

mod journal;
mod kv;
mod migrations;
mod rss;
mod users;

use sqlx::SqlitePool;

pub use journal::JournalRow;
pub use rss::{RssFeedRow, RssFilterRow};
pub use users::UserRow;

/// Owns the database connection pool and exposes domain-specific CRUD
/// through the `impl Store` blocks in each submodule.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Pool accessor for call sites (tests, migrations) that need it raw.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
