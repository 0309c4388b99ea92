//! Generic JSON-document store, used for the process-wide config document
//! and any per-bot subdocuments, plus an opaque blob store for credential
//! files (rclone configs, OAuth tokens) keyed by owning bot token and path.

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

use super::Store;

impl Store {
    /// Fetch and decode a JSON document by key.
    pub async fn kv_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON document under `key`, replacing any prior value.
    pub async fn kv_put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remove a document.
    pub async fn kv_delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch an opaque credential blob.
    pub async fn file_blob_get(&self, owner_token: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT blob FROM files WHERE owner_token = ? AND path = ?",
        )
        .bind(owner_token)
        .bind(path)
        .fetch_optional(self.pool())
        .await?;
        Ok(blob)
    }

    /// Store (or replace) an opaque credential blob.
    pub async fn file_blob_put(&self, owner_token: &str, path: &str, blob: &[u8]) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO files (owner_token, path, blob, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(owner_token, path) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_token)
        .bind(path)
        .bind(blob)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn config_document_round_trips() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let config = Config::default();
        store.kv_put("config", &config).await.unwrap();
        let loaded: Config = store.kv_get("config").await.unwrap().unwrap();
        assert_eq!(
            loaded.persistence.database_url,
            config.persistence.database_url
        );
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let loaded: Option<Config> = store.kv_get("nope").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn file_blob_round_trips() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        store
            .file_blob_put("bot-token-1", "rclone.conf", b"secret")
            .await
            .unwrap();
        let blob = store
            .file_blob_get("bot-token-1", "rclone.conf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob, b"secret");
    }
}
