//! Error types for mirror-dl
//!
//! This module provides the full error taxonomy named in the error-handling
//! design: each variant carries the context needed both to log and to render
//! a chat-facing notice, via the [`ToUserNotice`] trait.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mirror-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type, one variant per taxonomy member in the error design.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad flag or config value; no side effects, reported to the user.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected before admission: duplicate, stopped, bad link, disabled feature.
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// Backend driver terminal failure.
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Media pipeline stage failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Sink failure, or partial success during upload.
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Merge-session state-machine violation.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Command-surface parse failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// User-initiated or `stop_all` cancellation. Not a failure: the dispatcher
    /// renders a stopped notice, never an error notice.
    #[error("cancelled")]
    Cancelled,

    /// Registry invariant violated. Logged with full context; the process
    /// aborts after releasing gates.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (backend driver, webhook, RSS fetch).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A command flag's value failed to parse.
    #[error("invalid value for {flag}: {reason}")]
    InvalidFlagValue {
        /// The offending flag, e.g. "-sp"
        flag: String,
        /// Why it was rejected
        reason: String,
    },
    /// A required environment key is missing or malformed.
    #[error("configuration error: {message}")]
    Invalid {
        /// Human-readable description
        message: String,
        /// The config key at fault, if identifiable
        key: Option<String>,
    },
}

/// Errors that reject a task before it is admitted.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Link does not parse as any known backend's address form.
    #[error("invalid link: {0}")]
    InvalidLink(String),
    /// Backend reported an auth failure during `begin`.
    #[error("authentication failed for {backend:?}: {reason}")]
    Auth {
        /// The backend that rejected credentials
        backend: crate::types::BackendKind,
        /// Driver-supplied reason
        reason: String,
    },
    /// Backend is unreachable.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// A name-equal item already exists at the drive destination (spec §4.8).
    #[error("duplicate at destination: {existing_link}")]
    Duplicate {
        /// Link to the existing item
        existing_link: String,
    },
    /// `select=true` requested against a driver that doesn't support it.
    #[error("{backend:?} does not support file selection")]
    SelectUnsupported {
        /// The backend that was asked to select files
        backend: crate::types::BackendKind,
    },
    /// Gates are in `stop_all` mode.
    #[error("stopped")]
    Stopped,
}

/// Backend driver terminal failures.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Driver's terminal failure, opaque reason text from the driver.
    #[error("download failed: {0}")]
    DriverFailed(String),
    /// Task id looked up but not present in an expected collection.
    #[error("task {0} not found")]
    NotFound(crate::types::TaskId),
    /// Requested operation is invalid in the task's current state.
    #[error("cannot {operation} task {id} in state {current_state:?}")]
    InvalidState {
        /// Task id
        id: crate::types::TaskId,
        /// Attempted operation, e.g. "pause"
        operation: String,
        /// Current state blocking the operation
        current_state: crate::types::TaskState,
    },
}

/// Media pipeline stage failures (spec §4.4).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A named stage's subprocess or logic failed.
    #[error("stage {stage} failed: {reason}")]
    StageFailed {
        /// Stage name, e.g. "extract", "compress"
        stage: &'static str,
        /// Failure reason
        reason: String,
    },
    /// Archive extraction needs a password that wasn't supplied or didn't work.
    #[error("wrong or missing password for archive {archive}")]
    WrongPassword {
        /// The archive path
        archive: PathBuf,
    },
    /// The external tool (ffmpeg, 7z, etc.) binary could not be located.
    #[error("required external tool not found: {0}")]
    ToolNotFound(String),
    /// Destination path already exists and the collision action is `Skip`,
    /// or no unique renamed path could be found.
    #[error("file collision at {path:?}: {reason}")]
    FileCollision {
        /// The path that collided
        path: PathBuf,
        /// Why the collision could not be resolved
        reason: String,
    },
    /// A path could not be decomposed into stem/parent for renaming.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

/// Upload sink failures.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Sink reported a terminal failure with no items landed.
    #[error("upload failed: {0}")]
    SinkFailed(String),
    /// Sink reported partial success; per the partial-upload journaling
    /// decision this is terminal for journaling, but the notice only
    /// enumerates the landed items.
    #[error("upload partially failed: {reason} ({landed} of {total} items landed)")]
    Partial {
        /// Failure reason for the remainder
        reason: String,
        /// Count of items that landed successfully
        landed: usize,
        /// Total items attempted
        total: usize,
    },
}

/// Merge-session state-machine errors (spec §4.6).
#[derive(Debug, Error)]
pub enum MergeError {
    /// `add`/`commit`/`cancel` called with no Open session for the owner.
    #[error("no active merge session")]
    NoActiveSession,
    /// `add` called while the session already holds the 20-input cap.
    #[error("merge session is full (20 inputs)")]
    SessionFull,
    /// `add` would exceed the estimated 8 GiB cumulative-size cap.
    #[error("merge session would exceed the 8 GiB size cap")]
    SizeCapExceeded,
    /// Input already present (duplicate message id or normalized URL).
    #[error("input already added to this merge session")]
    DuplicateInput,
    /// `commit` called with fewer than 2 inputs.
    #[error("merge session needs at least 2 inputs to commit, has {0}")]
    TooFewInputs(usize),
}

/// Command-surface parse errors (spec §4.7).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No link found in the message and it isn't a reply to media.
    #[error("no link or media reference found")]
    MissingLink,
    /// An unrecognized flag token.
    #[error("unrecognized flag: {0}")]
    UnknownFlag(String),
    /// A flag that requires an argument didn't get one.
    #[error("flag {0} requires an argument")]
    MissingFlagArgument(String),
    /// An unrecognized command verb.
    #[error("unrecognized command: {0}")]
    UnknownVerb(String),
}

/// Renders an error into the exact chat-facing text the dispatcher sends,
/// the same error-to-surface indirection as an HTTP-status mapping, but
/// targeting a chat notice instead of an HTTP status.
pub trait ToUserNotice {
    /// Human-readable notice text suitable for sending back to the chat.
    fn user_notice(&self) -> String;

    /// Machine-readable category, used for logging and for dispatcher-side
    /// branching (e.g. deciding whether to re-offer retry).
    fn category(&self) -> &'static str;
}

impl ToUserNotice for Error {
    fn user_notice(&self) -> String {
        match self {
            Error::Config(e) => format!("Configuration error: {e}"),
            Error::Admission(e) => format!("Rejected: {e}"),
            Error::Download(e) => format!("Download failed: {e}"),
            Error::Pipeline(e) => format!("Processing failed: {e}"),
            Error::Upload(UploadError::Partial {
                reason, landed, ..
            }) => format!("Upload partially completed ({landed} landed): {reason}"),
            Error::Upload(e) => format!("Upload failed: {e}"),
            Error::Merge(e) => format!("Merge: {e}"),
            Error::Dispatch(e) => format!("Command error: {e}"),
            Error::Cancelled => "Stopped by user.".to_string(),
            Error::Fatal(msg) => format!("Internal error: {msg}"),
            Error::Database(_) => "Internal storage error, please retry.".to_string(),
            Error::Io(_) => "Internal I/O error, please retry.".to_string(),
            Error::Network(_) => "Network error, please retry.".to_string(),
            Error::Serialization(_) => "Internal serialization error.".to_string(),
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Admission(_) => "admission_reject",
            Error::Download(_) => "download_error",
            Error::Pipeline(_) => "pipeline_error",
            Error::Upload(_) => "upload_error",
            Error::Merge(_) => "merge_error",
            Error::Dispatch(_) => "dispatch_error",
            Error::Cancelled => "cancelled",
            Error::Fatal(_) => "fatal",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendKind, TaskId, TaskState};

    fn all_error_variants() -> Vec<Error> {
        vec![
            Error::Config(ConfigError::Invalid {
                message: "bad".into(),
                key: None,
            }),
            Error::Admission(AdmissionError::Stopped),
            Error::Admission(AdmissionError::SelectUnsupported {
                backend: BackendKind::HttpMulti,
            }),
            Error::Download(DownloadError::InvalidState {
                id: TaskId("abc".into()),
                operation: "pause".into(),
                current_state: TaskState::Finalized,
            }),
            Error::Pipeline(PipelineError::ToolNotFound("ffmpeg".into())),
            Error::Upload(UploadError::Partial {
                reason: "timeout".into(),
                landed: 2,
                total: 5,
            }),
            Error::Merge(MergeError::SessionFull),
            Error::Dispatch(DispatchError::MissingLink),
            Error::Cancelled,
            Error::Fatal("registry corrupted".into()),
        ]
    }

    #[test]
    fn every_variant_has_a_nonempty_notice_and_category() {
        for err in all_error_variants() {
            assert!(!err.user_notice().is_empty());
            assert!(!err.category().is_empty());
        }
    }

    #[test]
    fn cancelled_notice_has_no_error_framing() {
        assert_eq!(Error::Cancelled.user_notice(), "Stopped by user.");
        assert_eq!(Error::Cancelled.category(), "cancelled");
    }

    #[test]
    fn partial_upload_notice_mentions_landed_count() {
        let err = Error::Upload(UploadError::Partial {
            reason: "sink timeout".into(),
            landed: 3,
            total: 7,
        });
        assert!(err.user_notice().contains("3 landed"));
    }
}
