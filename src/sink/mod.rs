//! Upload Sink Interface (spec §4.4 stage 12 / §4.8 / Glossary "Sink").
//!
//! `SinkDriver` is the upload-side mirror of [`crate::backend::BackendDriver`]:
//! a trait-object seam between the Task Lifecycle and each upload
//! destination, async methods behind a trait object, a capability query
//! (`supports_duplicate_check`) instead of downcasting.

mod chat;
mod drive;
mod stubs;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

pub use chat::{ChatFileTransport, ChatSinkDriver};
pub use drive::DriveSinkDriver;
pub use stubs::{FileHostSinkDriver, SyncDaemonSinkDriver};

use crate::Result;
use crate::types::{ProgressSnapshot, SinkKind};

/// Per-task options a sink driver needs to upload a finished payload.
#[derive(Clone, Debug)]
pub struct SinkBeginOptions {
    /// Files ready for upload, in the order the pipeline produced them.
    pub paths: Vec<PathBuf>,
    /// Upload destination string from `-up` (chat/drive-id/rclone path/host alias).
    pub dest: Option<String>,
    /// Chat to deliver to; only the chat sink uses this.
    pub chat_id: i64,
    /// Optional caption/title applied to the upload.
    pub caption: Option<String>,
}

/// One pluggable upload destination. Implementors own their connection
/// state and are polled for progress rather than pushing events directly,
/// the same poll cadence contract as `BackendDriver`.
#[async_trait]
pub trait SinkDriver: Send + Sync {
    /// Which sink family this driver speaks.
    fn kind(&self) -> SinkKind;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Whether this sink can answer the duplicate-check query (spec §4.8).
    /// Only the drive-API sink does in the canonical implementation.
    fn supports_duplicate_check(&self) -> bool {
        false
    }

    /// Look up an existing destination entry named `name`, called by
    /// `before_start()` ahead of admission for non-leech tasks. The default
    /// implementation reports no match, matching sinks that can't answer
    /// this query at all.
    async fn find_existing(&self, _name: &str, _dest: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }

    /// Start uploading `opts.paths`. Must be idempotent with respect to
    /// `poll`/`cancel` being called concurrently.
    async fn begin(&self, opts: SinkBeginOptions) -> Result<()>;

    /// Current progress. Called on the status-interval cadence, not pushed.
    async fn poll(&self) -> Result<ProgressSnapshot>;

    /// Stop the upload and release any driver-held resources.
    async fn cancel(&self) -> Result<()>;

    /// Links/refs landed so far, consumed by `on_upload_complete`'s
    /// `Finalized` notice. Empty until at least one item has landed.
    async fn result_links(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Construct the sink driver matching a sink kind, with fresh per-task state.
pub fn sink_for(
    kind: SinkKind,
    client: reqwest::Client,
    chat_transport: Arc<dyn ChatFileTransport>,
) -> Box<dyn SinkDriver> {
    match kind {
        SinkKind::Chat => Box::new(ChatSinkDriver::new(chat_transport)),
        SinkKind::DriveApi => Box::new(DriveSinkDriver::new(client)),
        SinkKind::SyncDaemon => Box::new(SyncDaemonSinkDriver::new()),
        SinkKind::FileHost => Box::new(FileHostSinkDriver::new()),
    }
}
