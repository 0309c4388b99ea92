//! Non-HTTP backend drivers.
//!
//! Their wire protocols (BitTorrent's DHT/piece exchange, NNTP, a chat
//! platform's media API, a drive vendor's upload API, a generic rclone-style
//! sync daemon's RPC) are out of scope; each stub fully satisfies
//! [`BackendDriver`] and reports a clear `DriverFailed` once `begin` is
//! called, so a task admitted against one fails cleanly instead of hanging.
//! `BitTorrentDriver` additionally advertises file selection, since that's
//! the one capability spec §4.7's `-s` flag depends on being distinguishable
//! per backend.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BackendDriver, BeginOptions};
use crate::Result;
use crate::error::DownloadError;
use crate::types::{BackendKind, DriverState, ProgressSnapshot};

macro_rules! stub_driver {
    ($name:ident, $kind:expr, $label:expr) => {
        #[doc = concat!("Stub driver for ", $label, ".")]
        pub struct $name {
            state: Mutex<DriverState>,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    state: Mutex::new(DriverState::Metadata),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        #[async_trait]
        impl BackendDriver for $name {
            fn kind(&self) -> BackendKind {
                $kind
            }

            fn name(&self) -> &str {
                $label
            }

            async fn begin(&self, _opts: BeginOptions) -> Result<()> {
                *self.state.lock().await = DriverState::Failed;
                Err(DownloadError::DriverFailed(format!(
                    "{} protocol not implemented",
                    $label
                ))
                .into())
            }

            async fn poll(&self) -> Result<ProgressSnapshot> {
                Ok(ProgressSnapshot {
                    state: *self.state.lock().await,
                    processed: 0,
                    total: None,
                    speed_bps: 0,
                    eta_seconds: None,
                    error: Some(format!("{} protocol not implemented", $label)),
                })
            }

            async fn cancel(&self) -> Result<()> {
                *self.state.lock().await = DriverState::Failed;
                Ok(())
            }
        }
    };
}

stub_driver!(UsenetDriver, BackendKind::Usenet, "usenet");
stub_driver!(ChatMediaDriver, BackendKind::ChatMedia, "chat-media");
stub_driver!(DriveApiDriver, BackendKind::DriveApi, "drive-api");
stub_driver!(
    SyncDaemonDriver,
    BackendKind::GenericSyncDaemon,
    "sync-daemon"
);

/// BitTorrent driver stub. Advertises selection support so the Admission
/// path can route `-s` requests correctly even before the wire protocol
/// exists.
pub struct BitTorrentDriver {
    state: Mutex<DriverState>,
}

impl BitTorrentDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState::Metadata),
        }
    }
}

impl Default for BitTorrentDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendDriver for BitTorrentDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::BitTorrent
    }

    fn name(&self) -> &str {
        "bittorrent"
    }

    fn supports_selection(&self) -> bool {
        true
    }

    async fn begin(&self, _opts: BeginOptions) -> Result<()> {
        *self.state.lock().await = DriverState::Failed;
        Err(DownloadError::DriverFailed("bittorrent protocol not implemented".into()).into())
    }

    async fn commit_selection(&self, _paths: &[String]) -> Result<()> {
        Err(DownloadError::DriverFailed("bittorrent protocol not implemented".into()).into())
    }

    async fn poll(&self) -> Result<ProgressSnapshot> {
        Ok(ProgressSnapshot {
            state: *self.state.lock().await,
            processed: 0,
            total: None,
            speed_bps: 0,
            eta_seconds: None,
            error: Some("bittorrent protocol not implemented".into()),
        })
    }

    async fn cancel(&self) -> Result<()> {
        *self.state.lock().await = DriverState::Failed;
        Ok(())
    }
}

/// Generic link-resolver daemon stub (e.g. a jdownloader-style service).
/// Takes a client handle since a real implementation would speak HTTP to
/// the resolver's local API, even though this stub doesn't call it yet.
pub struct LinkResolverDriver {
    _client: reqwest::Client,
    state: Mutex<DriverState>,
}

impl LinkResolverDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            _client: client,
            state: Mutex::new(DriverState::Metadata),
        }
    }
}

#[async_trait]
impl BackendDriver for LinkResolverDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::LinkResolver
    }

    fn name(&self) -> &str {
        "link-resolver"
    }

    async fn begin(&self, _opts: BeginOptions) -> Result<()> {
        *self.state.lock().await = DriverState::Failed;
        Err(DownloadError::DriverFailed("link-resolver protocol not implemented".into()).into())
    }

    async fn poll(&self) -> Result<ProgressSnapshot> {
        Ok(ProgressSnapshot {
            state: *self.state.lock().await,
            processed: 0,
            total: None,
            speed_bps: 0,
            eta_seconds: None,
            error: Some("link-resolver protocol not implemented".into()),
        })
    }

    async fn cancel(&self) -> Result<()> {
        *self.state.lock().await = DriverState::Failed;
        Ok(())
    }
}
