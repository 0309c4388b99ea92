//! Non-HTTP upload sinks.
//!
//! A generic rclone-style sync daemon's RPC and a file-hosting site's upload
//! API are out of scope; each stub fully satisfies [`SinkDriver`] and reports
//! a clear `SinkFailed` once `begin` is called, so a task routed to one fails
//! cleanly instead of hanging.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SinkBeginOptions, SinkDriver};
use crate::Result;
use crate::error::UploadError;
use crate::types::{DriverState, ProgressSnapshot, SinkKind};

macro_rules! stub_sink {
    ($name:ident, $kind:expr, $label:expr) => {
        #[doc = concat!("Stub sink for ", $label, ".")]
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
        impl SinkDriver for $name {
            fn kind(&self) -> SinkKind {
                $kind
            }

            fn name(&self) -> &str {
                $label
            }

            async fn begin(&self, _opts: SinkBeginOptions) -> Result<()> {
                *self.state.lock().await = DriverState::Failed;
                Err(UploadError::SinkFailed(format!("{} protocol not implemented", $label)).into())
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

stub_sink!(SyncDaemonSinkDriver, SinkKind::SyncDaemon, "sync-daemon");
stub_sink!(FileHostSinkDriver, SinkKind::FileHost, "file-host");

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_begin_fails_with_sink_failed() {
        let driver = SyncDaemonSinkDriver::new();
        let err = driver
            .begin(SinkBeginOptions {
                paths: vec![],
                dest: None,
                chat_id: 0,
                caption: None,
            })
            .await
            .unwrap_err();
        match err {
            crate::error::Error::Upload(UploadError::SinkFailed(_)) => {}
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
