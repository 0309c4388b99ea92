//! RSS feed and filter CRUD (spec §3 `RssFeed`, §4.10 ambient feed monitor).

use chrono::Utc;
use sqlx::FromRow;

use crate::Result;

use super::Store;

/// One monitored feed.
#[derive(Debug, Clone, FromRow)]
pub struct RssFeedRow {
    pub id: i64,
    pub owner_id: i64,
    pub chat_id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub last_check: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// An include/exclude/size filter attached to a feed.
#[derive(Debug, Clone, FromRow)]
pub struct RssFilterRow {
    pub id: i64,
    pub feed_id: i64,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
}

impl Store {
    /// All feeds, enabled or not, for the scheduler to iterate.
    pub async fn rss_feeds_all(&self) -> Result<Vec<RssFeedRow>> {
        let rows = sqlx::query_as::<_, RssFeedRow>(
            "SELECT id, owner_id, chat_id, name, url, enabled, last_check, last_error, created_at \
             FROM rss_feeds ORDER BY id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Feeds visible to a chat.
    pub async fn rss_feeds_for_chat(&self, chat_id: i64) -> Result<Vec<RssFeedRow>> {
        let rows = sqlx::query_as::<_, RssFeedRow>(
            "SELECT id, owner_id, chat_id, name, url, enabled, last_check, last_error, created_at \
             FROM rss_feeds WHERE chat_id = ? ORDER BY id ASC",
        )
        .bind(chat_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Register a new feed.
    pub async fn rss_feed_insert(
        &self,
        owner_id: i64,
        chat_id: i64,
        name: &str,
        url: &str,
    ) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO rss_feeds (owner_id, chat_id, name, url, enabled, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(owner_id)
        .bind(chat_id)
        .bind(name)
        .bind(url)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Remove a feed (cascades to its filters and seen-item rows).
    pub async fn rss_feed_delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rss_feeds WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable a feed without losing its filters.
    pub async fn rss_feed_set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE rss_feeds SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record the outcome of the most recent poll.
    pub async fn rss_feed_set_check_status(&self, id: i64, error: Option<&str>) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query("UPDATE rss_feeds SET last_check = ?, last_error = ? WHERE id = ?")
            .bind(now)
            .bind(error)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Filters attached to a feed.
    pub async fn rss_filters_for_feed(&self, feed_id: i64) -> Result<Vec<RssFilterRow>> {
        let rows = sqlx::query_as::<_, RssFilterRow>(
            "SELECT id, feed_id, include_pattern, exclude_pattern, min_size, max_size \
             FROM rss_filters WHERE feed_id = ? ORDER BY id ASC",
        )
        .bind(feed_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Add a filter to a feed.
    #[allow(clippy::too_many_arguments)]
    pub async fn rss_filter_insert(
        &self,
        feed_id: i64,
        include_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        min_size: Option<i64>,
        max_size: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO rss_filters (feed_id, include_pattern, exclude_pattern, min_size, max_size)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(feed_id)
        .bind(include_pattern)
        .bind(exclude_pattern)
        .bind(min_size)
        .bind(max_size)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Whether this GUID has already been delivered for this feed.
    pub async fn rss_seen_contains(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rss_seen WHERE feed_id = ? AND guid = ?")
                .bind(feed_id)
                .bind(guid)
                .fetch_one(self.pool())
                .await?;
        Ok(count > 0)
    }

    /// Record a GUID as delivered.
    pub async fn rss_seen_insert(&self, feed_id: i64, guid: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO rss_seen (feed_id, guid, seen_at) VALUES (?, ?, ?)",
        )
        .bind(feed_id)
        .bind(guid)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
