//! Per-user settings storage.
//!
//! Settings are stored as a single JSON blob per user rather than a typed
//! column per field, matching the rest of the document-over-SQLite layout;
//! this keeps adding a new `UserSettings` field a pure `config.rs` change.

use chrono::Utc;
use sqlx::FromRow;

use crate::Result;
use crate::config::{UserSettings, UserSettingsUpdate};

use super::Store;

/// Raw row as stored; `settings` is the JSON-encoded `UserSettings`.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: i64,
    pub settings: String,
    pub updated_at: i64,
}

impl Store {
    /// Fetch a user's settings, if they have ever set anything.
    pub async fn user_settings_get(&self, user_id: i64) -> Result<Option<UserSettings>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT user_id, settings, updated_at FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.settings)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update, creating a default settings row if the user
    /// has none yet.
    pub async fn user_settings_apply(
        &self,
        user_id: i64,
        update: UserSettingsUpdate,
    ) -> Result<UserSettings> {
        let mut settings = self
            .user_settings_get(user_id)
            .await?
            .unwrap_or_default();
        update.apply(&mut settings);
        self.user_settings_put(user_id, &settings).await?;
        Ok(settings)
    }

    /// Overwrite a user's settings wholesale.
    pub async fn user_settings_put(&self, user_id: i64, settings: &UserSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO users (user_id, settings, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET settings = excluded.settings, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(json)
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

    #[tokio::test]
    async fn missing_user_returns_none() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        assert!(store.user_settings_get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_update_creates_then_merges() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let update = UserSettingsUpdate {
            prefix: Some(Some("pre-".into())),
            ..Default::default()
        };
        let settings = store.user_settings_apply(7, update).await.unwrap();
        assert_eq!(settings.prefix.as_deref(), Some("pre-"));

        let clear = UserSettingsUpdate {
            prefix: Some(None),
            ..Default::default()
        };
        let settings = store.user_settings_apply(7, clear).await.unwrap();
        assert!(settings.prefix.is_none());
    }
}
