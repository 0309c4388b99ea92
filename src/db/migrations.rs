//! Database lifecycle and schema migrations.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, SqliteConnection, SqlitePool};
use tracing::info;

use crate::Result;

use super::Store;

impl Store {
    /// Open (creating if needed) the database at `database_url` and bring
    /// its schema up to date.
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Construct directly from an existing pool, e.g. an in-memory database
    /// set up by a test.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Store { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await?;
        let mut current = current.unwrap_or(0);

        if current < 1 {
            migrate_v1(&mut conn).await?;
            current = 1;
            info!(version = current, "applied migration");
        }

        Ok(())
    }
}

async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Base schema: journal, users, rss feeds/filters, and the generic kv store.
async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN").execute(&mut *conn).await?;

    let result: Result<()> = async {
        conn.execute(
            r#"
            CREATE TABLE journal (
                task_id     TEXT PRIMARY KEY,
                chat_id     INTEGER NOT NULL,
                owner_id    INTEGER NOT NULL,
                link        TEXT NOT NULL,
                tag         TEXT,
                name        TEXT,
                state       TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            )
            "#,
        )
        .await?;
        conn.execute("CREATE INDEX idx_journal_chat ON journal(chat_id)")
            .await?;
        conn.execute("CREATE INDEX idx_journal_link ON journal(link)")
            .await?;

        conn.execute(
            r#"
            CREATE TABLE users (
                user_id     INTEGER PRIMARY KEY,
                settings    TEXT NOT NULL,
                updated_at  INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE rss_feeds (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id       INTEGER NOT NULL,
                chat_id        INTEGER NOT NULL,
                name           TEXT NOT NULL,
                url            TEXT NOT NULL,
                enabled        INTEGER NOT NULL DEFAULT 1,
                last_check     INTEGER,
                last_error     TEXT,
                created_at     INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE rss_filters (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id           INTEGER NOT NULL REFERENCES rss_feeds(id) ON DELETE CASCADE,
                include_pattern   TEXT,
                exclude_pattern   TEXT,
                min_size          INTEGER,
                max_size          INTEGER
            )
            "#,
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE rss_seen (
                feed_id    INTEGER NOT NULL REFERENCES rss_feeds(id) ON DELETE CASCADE,
                guid       TEXT NOT NULL,
                seen_at    INTEGER NOT NULL,
                PRIMARY KEY (feed_id, guid)
            )
            "#,
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE kv (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        conn.execute(
            r#"
            CREATE TABLE files (
                owner_token  TEXT NOT NULL,
                path         TEXT NOT NULL,
                blob         BLOB NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (owner_token, path)
            )
            "#,
        )
        .await?;

        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            record_migration(conn, 1).await?;
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(())
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}
