//! Core types for mirror-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{WatermarkPosition, WebhookEvent};

/// Unique identifier for a task (mirror/leech/clone/merge)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random 10-character task id
    pub fn generate() -> Self {
        use rand::Rng;
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let s: String = (0..10)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(s)
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task lifecycle state (spec §4.5)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Just constructed from the dispatcher, not yet admitted
    Created,
    /// Running `before_start()`: working dir creation + duplicate check
    AdmissionCheck,
    /// Waiting on the download gate
    WaitingDl,
    /// Backend driver is retrieving bytes
    Downloading,
    /// Media pipeline stages are running
    PipelineProcessing,
    /// Waiting on the upload gate
    WaitingUp,
    /// Sink driver is sending bytes
    Uploading,
    /// Terminal: upload completed and journal/registry entries removed
    Finalized,
    /// Terminal: an unrecoverable error occurred at some stage
    Failed,
    /// Terminal: user or `stop_all` cancelled the task
    Cancelled,
}

impl TaskState {
    /// Terminal states end the task's lifetime in the Status Registry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finalized | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Convert integer state code to `TaskState` (for journal persistence).
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => TaskState::Created,
            1 => TaskState::AdmissionCheck,
            2 => TaskState::WaitingDl,
            3 => TaskState::Downloading,
            4 => TaskState::PipelineProcessing,
            5 => TaskState::WaitingUp,
            6 => TaskState::Uploading,
            7 => TaskState::Finalized,
            8 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    /// Convert `TaskState` to its integer state code.
    pub fn to_i32(self) -> i32 {
        match self {
            TaskState::Created => 0,
            TaskState::AdmissionCheck => 1,
            TaskState::WaitingDl => 2,
            TaskState::Downloading => 3,
            TaskState::PipelineProcessing => 4,
            TaskState::WaitingUp => 5,
            TaskState::Uploading => 6,
            TaskState::Finalized => 7,
            TaskState::Cancelled => 8,
            TaskState::Failed => 9,
        }
    }
}

/// Scheduling priority for gate admission (doesn't reorder an already-FIFO gate,
/// reserved for a future batch-slot distinction per spec §4.3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority
    Low = -1,
    /// Normal priority
    #[default]
    Normal = 0,
    /// High priority
    High = 1,
    /// Force-start, jumps any queue
    Force = 2,
}

/// Which gate a task is currently admitted to or waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// The download admission gate
    Download,
    /// The upload admission gate
    Upload,
}

/// Backend driver family (spec §4.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Multi-connection HTTP(S) retrieval
    HttpMulti,
    /// BitTorrent (magnet or .torrent)
    BitTorrent,
    /// Usenet (NZB)
    Usenet,
    /// A generic link-resolver daemon (e.g. a jdownloader-style service)
    LinkResolver,
    /// A chat-protocol media reference
    ChatMedia,
    /// A cloud-drive native API
    DriveApi,
    /// A generic sync daemon fronting a remote path (rclone-style)
    GenericSyncDaemon,
}

/// Upload sink family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// The chat protocol itself (a "leech")
    Chat,
    /// A cloud drive via native API (a "mirror")
    DriveApi,
    /// A cloud drive via a sync daemon (rclone path)
    SyncDaemon,
    /// A file-host HTTP API
    FileHost,
}

/// Live state reported by a backend driver's `poll`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// Fetching metadata (torrent/nzb parsing, link resolution)
    Metadata,
    /// Actively transferring bytes
    Active,
    /// Torrent-only: finished downloading, seeding per `-d`
    Seeding,
    /// Paused (select-mode pre-start, or user pause)
    Paused,
    /// Terminal failure
    Failed,
    /// Terminal success
    Done,
}

/// A point-in-time read of a backend or pipeline operation's progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Current driver/pipeline state
    pub state: DriverState,
    /// Bytes processed so far
    pub processed: u64,
    /// Total bytes, if known up front
    pub total: Option<u64>,
    /// Instantaneous speed in bytes/second
    pub speed_bps: u64,
    /// Estimated seconds to completion
    pub eta_seconds: Option<u64>,
    /// Error message, set only when `state == Failed`
    pub error: Option<String>,
}

/// Phase shown in the Status Registry (spec §4.2 / §3 `StatusEntry`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusPhase {
    /// Queued, waiting for the download gate
    QueuedDl,
    /// Download in progress
    Downloading,
    /// Queued, waiting for the upload gate
    QueuedUp,
    /// Upload in progress
    Uploading,
    /// Media pipeline stage running
    Processing,
}

/// A single entry in the process-wide Status Registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusEntry {
    /// The task this entry describes
    pub id: TaskId,
    /// Current lifecycle phase
    pub phase: StatusPhase,
    /// The backend or sink driver currently active, if any
    pub driver: Option<BackendKind>,
    /// Progress percentage, 0.0-100.0
    pub percent: f32,
    /// Bytes processed so far
    pub processed_bytes: u64,
    /// Current throughput in bytes/second
    pub speed_bps: u64,
    /// Estimated seconds to completion
    pub eta_seconds: Option<u64>,
    /// Display name, once known
    pub name: String,
    /// Total size in bytes, once known
    pub size_bytes: Option<u64>,
    /// Monotonically increasing insertion sequence, used to break snapshot ties
    pub sequence: u64,
}

/// Event emitted during a task's lifecycle, broadcast to all subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task admitted and queued for download
    Queued {
        /// Task id
        id: TaskId,
        /// Display name at time of queuing
        name: String,
        /// Which gate the task is queued on
        gate: GateKind,
    },
    /// Task began downloading (driver called `on_download_start`)
    DownloadStarted {
        /// Task id
        id: TaskId,
        /// Backend used
        backend: BackendKind,
    },
    /// Download progress update
    Downloading {
        /// Task id
        id: TaskId,
        /// Progress snapshot from the backend driver
        progress: ProgressSnapshot,
    },
    /// Download completed, pipeline about to run
    DownloadComplete {
        /// Task id
        id: TaskId,
    },
    /// Download failed terminally
    DownloadFailed {
        /// Task id
        id: TaskId,
        /// Driver-supplied reason
        error: String,
    },
    /// A pipeline stage started
    StageStarted {
        /// Task id
        id: TaskId,
        /// Stage name (e.g. "extract", "compress")
        stage: &'static str,
    },
    /// A pipeline stage finished successfully
    StageComplete {
        /// Task id
        id: TaskId,
        /// Stage name
        stage: &'static str,
    },
    /// Pipeline stage failed, aborting the pipeline
    PipelineFailed {
        /// Task id
        id: TaskId,
        /// Stage name that failed
        stage: &'static str,
        /// Failure reason
        error: String,
    },
    /// Upload started
    UploadStarted {
        /// Task id
        id: TaskId,
        /// Sink used
        sink: SinkKind,
    },
    /// Upload progress update
    Uploading {
        /// Task id
        id: TaskId,
        /// Progress snapshot from the sink driver
        progress: ProgressSnapshot,
    },
    /// Upload completed, task finalized
    Finalized {
        /// Task id
        id: TaskId,
        /// Resulting link(s), if the sink produces one
        links: Vec<String>,
        /// Number of files uploaded
        files: u32,
        /// Number of folders uploaded
        folders: u32,
    },
    /// Upload failed, possibly with partial success
    UploadFailed {
        /// Task id
        id: TaskId,
        /// Failure reason
        error: String,
        /// Items that landed before the failure, per the partial-upload journaling rule
        landed: Vec<String>,
    },
    /// Task cancelled by user action or `stop_all`
    Cancelled {
        /// Task id
        id: TaskId,
    },
    /// Duplicate detected at a drive sink before admission
    DuplicateDetected {
        /// Name that matched
        name: String,
        /// Existing link at the destination
        existing_link: String,
    },
    /// Webhook delivery failed
    WebhookFailed {
        /// Webhook URL
        url: String,
        /// Error message
        error: String,
    },
    /// Notification script execution failed
    ScriptFailed {
        /// Script path
        script: PathBuf,
        /// Exit code, if the process ran to completion
        exit_code: Option<i32>,
    },
    /// A merge session transitioned state
    MergeSessionUpdated {
        /// Owner id the session belongs to
        owner: i64,
        /// Number of inputs currently accumulated
        input_count: usize,
    },
    /// Graceful shutdown initiated
    Shutdown,
}

/// Snapshot of a task suitable for the `status` command's rendering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task id
    pub id: TaskId,
    /// Display name
    pub name: String,
    /// Current lifecycle state
    pub state: TaskState,
    /// Progress percentage, 0.0-100.0
    pub percent: f32,
    /// Current throughput in bytes/second
    pub speed_bps: u64,
    /// Total size in bytes, once known
    pub size_bytes: Option<u64>,
    /// When the task was admitted
    pub created_at: DateTime<Utc>,
}

/// Outcome of the media-pipeline variable-substitution / watermark edge, per
/// the Open Question decision: only the dict form is canonical.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatermarkOptions {
    /// Text to overlay (mutually exclusive with an image path, enforced by the dispatcher)
    pub text: Option<String>,
    /// Image path to overlay
    pub image: Option<PathBuf>,
    /// Corner or center placement
    pub position: WatermarkPosition,
    /// Relative size, 0.0-1.0 of the frame's shorter dimension
    pub size: f32,
}

/// Payload POSTed to webhooks and exposed as env vars to notification scripts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Which terminal event fired this notification
    pub event: WebhookEvent,
    /// Task id
    pub task_id: TaskId,
    /// Display name
    pub name: String,
    /// Tag (category-equivalent) if any
    pub tag: Option<String>,
    /// Final state as a string
    pub status: String,
    /// Destination description (sink + resolved path/link)
    pub destination: Option<String>,
    /// Error message, set for failure events
    pub error: Option<String>,
    /// Unix timestamp the event fired
    pub timestamp: i64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrips_through_display_and_fromstr() {
        let id = TaskId::generate();
        let s = id.to_string();
        let parsed: TaskId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn task_id_generate_is_ten_chars() {
        let id = TaskId::generate();
        assert_eq!(id.0.len(), 10);
    }

    #[test]
    fn task_state_i32_roundtrip() {
        for state in [
            TaskState::Created,
            TaskState::AdmissionCheck,
            TaskState::WaitingDl,
            TaskState::Downloading,
            TaskState::PipelineProcessing,
            TaskState::WaitingUp,
            TaskState::Uploading,
            TaskState::Finalized,
            TaskState::Cancelled,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::from_i32(state.to_i32()), state);
        }
    }

    #[test]
    fn unknown_state_code_defaults_to_failed() {
        assert_eq!(TaskState::from_i32(99), TaskState::Failed);
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        let all = [
            TaskState::Created,
            TaskState::AdmissionCheck,
            TaskState::WaitingDl,
            TaskState::Downloading,
            TaskState::PipelineProcessing,
            TaskState::WaitingUp,
            TaskState::Uploading,
            TaskState::Finalized,
            TaskState::Cancelled,
            TaskState::Failed,
        ];
        let terminal_count = all.iter().filter(|s| s.is_terminal()).count();
        assert_eq!(terminal_count, 3);
    }

    #[test]
    fn event_serializes_with_tagged_type() {
        let event = Event::Shutdown;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "shutdown");
    }
}
