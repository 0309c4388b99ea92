//! Journal: the append-only log of accepted tasks, keyed by task id.
//!
//! This is the persisted form of the external journal format and backs
//! duplicate-check (`link` lookups) and the dispatcher's `status`/`list`
//! verbs (`chat_id` lookups).

use chrono::Utc;
use sqlx::FromRow;

use crate::Result;
use crate::types::{TaskId, TaskState};

use super::Store;

/// One row of the journal table.
#[derive(Debug, Clone, FromRow)]
pub struct JournalRow {
    pub task_id: String,
    pub chat_id: i64,
    pub owner_id: i64,
    pub link: String,
    pub tag: Option<String>,
    pub name: Option<String>,
    pub state: String,
    pub created_at: i64,
}

impl Store {
    /// Record a newly admitted task.
    pub async fn journal_insert(
        &self,
        id: &TaskId,
        chat_id: i64,
        owner_id: i64,
        link: &str,
        tag: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO journal (task_id, chat_id, owner_id, link, tag, name, state, created_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(chat_id)
        .bind(owner_id)
        .bind(link)
        .bind(tag)
        .bind(task_state_label(TaskState::Created))
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update the recorded state and, once known, the display name.
    pub async fn journal_set_state(
        &self,
        id: &TaskId,
        state: TaskState,
        name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE journal
            SET state = ?, name = COALESCE(?, name)
            WHERE task_id = ?
            "#,
        )
        .bind(task_state_label(state))
        .bind(name)
        .bind(id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a single journal row by task id.
    pub async fn journal_get(&self, id: &TaskId) -> Result<Option<JournalRow>> {
        let row = sqlx::query_as::<_, JournalRow>("SELECT * FROM journal WHERE task_id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// All journal rows visible to a given chat, newest first.
    pub async fn journal_list_for_chat(&self, chat_id: i64) -> Result<Vec<JournalRow>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT * FROM journal WHERE chat_id = ? ORDER BY created_at DESC",
        )
        .bind(chat_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Look up an existing, non-failed journal entry by link, for the
    /// duplicate-check component (spec §4.8).
    pub async fn journal_find_active_by_link(&self, link: &str) -> Result<Option<JournalRow>> {
        let row = sqlx::query_as::<_, JournalRow>(
            r#"
            SELECT * FROM journal
            WHERE link = ? AND state NOT IN ('failed', 'cancelled')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(link)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Drop a journal row, e.g. after an explicit `delete` command.
    pub async fn journal_delete(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM journal WHERE task_id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn task_state_label(state: TaskState) -> &'static str {
    match state {
        TaskState::Created => "created",
        TaskState::AdmissionCheck => "admission_check",
        TaskState::WaitingDl => "waiting_dl",
        TaskState::Downloading => "downloading",
        TaskState::PipelineProcessing => "pipeline_processing",
        TaskState::WaitingUp => "waiting_up",
        TaskState::Uploading => "uploading",
        TaskState::Finalized => "finalized",
        TaskState::Failed => "failed",
        TaskState::Cancelled => "cancelled",
    }
}
