//! Backend Driver Interface (spec §4.1).
//!
//! `BackendDriver` is the trait-object seam between the Task Lifecycle and
//! each source protocol: async methods behind a trait object, a capability
//! query instead of downcasting, and a `name()` for logging.

mod http_multi;
mod stubs;

use std::path::Path;

use async_trait::async_trait;

pub use http_multi::HttpMultiDriver;
pub use stubs::{
    BitTorrentDriver, ChatMediaDriver, DriveApiDriver, LinkResolverDriver, SyncDaemonDriver,
    UsenetDriver,
};

use crate::Result;
use crate::types::{BackendKind, ProgressSnapshot};

/// Per-task options a driver needs to start a transfer.
#[derive(Clone, Debug)]
pub struct BeginOptions {
    /// The source link/magnet/reference as admitted by the dispatcher.
    pub link: String,
    /// Working directory the driver should materialize files under.
    pub dest_dir: std::path::PathBuf,
    /// Torrent-style "seed after complete" flag (spec §4.7 `-d`).
    pub seed_after_complete: bool,
}

/// One pluggable source protocol. Implementors own their connection state
/// and are polled for progress rather than pushing events directly, so the
/// Task Lifecycle controls the poll cadence (spec §4.9).
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Which protocol this driver speaks.
    fn kind(&self) -> BackendKind;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Whether this driver supports `-s`/file selection (spec §4.7 `-s`,
    /// §4.1 `commit_selection`). Only BitTorrent does in the canonical
    /// implementation.
    fn supports_selection(&self) -> bool {
        false
    }

    /// Start (or resume) the transfer described by `opts`. Must be
    /// idempotent with respect to `poll`/`cancel` being called concurrently.
    async fn begin(&self, opts: BeginOptions) -> Result<()>;

    /// Commit a file-selection subset, for drivers where `supports_selection`
    /// is true. The default implementation rejects the call, matching
    /// `AdmissionError::SelectUnsupported`.
    async fn commit_selection(&self, _paths: &[String]) -> Result<()> {
        Err(crate::error::AdmissionError::SelectUnsupported {
            backend: self.kind(),
        }
        .into())
    }

    /// Current progress. Called on the status-interval cadence, not pushed.
    async fn poll(&self) -> Result<ProgressSnapshot>;

    /// Stop the transfer and release any driver-held resources.
    async fn cancel(&self) -> Result<()>;
}

/// Construct the driver matching a backend kind, with fresh per-task state.
pub fn driver_for(kind: BackendKind, client: reqwest::Client) -> Box<dyn BackendDriver> {
    match kind {
        BackendKind::HttpMulti => Box::new(HttpMultiDriver::new(client)),
        BackendKind::BitTorrent => Box::new(BitTorrentDriver::new()),
        BackendKind::Usenet => Box::new(UsenetDriver::new()),
        BackendKind::LinkResolver => Box::new(LinkResolverDriver::new(client)),
        BackendKind::ChatMedia => Box::new(ChatMediaDriver::new()),
        BackendKind::DriveApi => Box::new(DriveApiDriver::new()),
        BackendKind::GenericSyncDaemon => Box::new(SyncDaemonDriver::new()),
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToUserNotice;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// An in-memory driver for exercising the admission/poll/cancel contract
    /// without any real transfer.
    struct FakeDriver {
        state: Arc<Mutex<ProgressSnapshot>>,
        cancelled: Arc<AtomicBool>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(ProgressSnapshot {
                    state: crate::types::DriverState::Metadata,
                    processed: 0,
                    total: Some(100),
                    speed_bps: 0,
                    eta_seconds: None,
                    error: None,
                })),
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl BackendDriver for FakeDriver {
        fn kind(&self) -> BackendKind {
            BackendKind::HttpMulti
        }

        fn name(&self) -> &str {
            "fake"
        }

        async fn begin(&self, _opts: BeginOptions) -> Result<()> {
            let mut state = self.state.lock().await;
            state.state = crate::types::DriverState::Active;
            state.processed = 50;
            Ok(())
        }

        async fn poll(&self) -> Result<ProgressSnapshot> {
            Ok(self.state.lock().await.clone())
        }

        async fn cancel(&self) -> Result<()> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn begin_then_poll_reflects_progress() {
        let driver = FakeDriver::new();
        driver
            .begin(BeginOptions {
                link: "https://example.com/a".into(),
                dest_dir: std::env::temp_dir(),
                seed_after_complete: false,
            })
            .await
            .unwrap();
        let progress = driver.poll().await.unwrap();
        assert_eq!(progress.state, crate::types::DriverState::Active);
        assert_eq!(progress.processed, 50);
    }

    #[tokio::test]
    async fn cancel_marks_cancelled() {
        let driver = FakeDriver::new();
        driver.cancel().await.unwrap();
        assert!(driver.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn default_commit_selection_rejects() {
        let driver = FakeDriver::new();
        let err = driver.commit_selection(&[]).await.unwrap_err();
        assert_eq!(err.category(), "admission_reject");
    }

    #[test]
    fn driver_for_every_backend_kind_constructs() {
        let client = reqwest::Client::new();
        for kind in [
            BackendKind::HttpMulti,
            BackendKind::BitTorrent,
            BackendKind::Usenet,
            BackendKind::LinkResolver,
            BackendKind::ChatMedia,
            BackendKind::DriveApi,
            BackendKind::GenericSyncDaemon,
        ] {
            let driver = driver_for(kind, client.clone());
            assert_eq!(driver.kind(), kind);
        }
    }
}
