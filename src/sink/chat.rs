//! Chat-protocol upload sink (a "leech" per spec terminology).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{SinkBeginOptions, SinkDriver};
use crate::Result;
use crate::error::UploadError;
use crate::types::{DriverState, ProgressSnapshot, SinkKind};

/// The chat-protocol file-send operation, a collaborator outside this
/// crate's scope (same boundary as [`crate::progress::ChatTransport`], but
/// for file delivery instead of status-message edits).
#[async_trait]
pub trait ChatFileTransport: Send + Sync {
    /// Send one file to `chat_id`, returning a link/message reference the
    /// completion notice can show.
    async fn send_file(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> Result<String>;
}

struct Counters {
    landed: AtomicU64,
    total: Mutex<u64>,
    state: Mutex<DriverState>,
    error: Mutex<Option<String>>,
    links: Mutex<Vec<String>>,
}

/// Uploads each pipeline output to a chat, one at a time and in order, the
/// same begin-then-background-task shape as `backend::HttpMultiDriver`.
pub struct ChatSinkDriver {
    transport: Arc<dyn ChatFileTransport>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl ChatSinkDriver {
    pub fn new(transport: Arc<dyn ChatFileTransport>) -> Self {
        Self {
            transport,
            counters: Arc::new(Counters {
                landed: AtomicU64::new(0),
                total: Mutex::new(0),
                state: Mutex::new(DriverState::Metadata),
                error: Mutex::new(None),
                links: Mutex::new(Vec::new()),
            }),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl SinkDriver for ChatSinkDriver {
    fn kind(&self) -> SinkKind {
        SinkKind::Chat
    }

    fn name(&self) -> &str {
        "chat"
    }

    async fn begin(&self, opts: SinkBeginOptions) -> Result<()> {
        *self.counters.total.lock().await = opts.paths.len() as u64;
        *self.counters.state.lock().await = DriverState::Active;

        let transport = self.transport.clone();
        let counters = self.counters.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for path in &opts.paths {
                if cancel.is_cancelled() {
                    *counters.state.lock().await = DriverState::Failed;
                    return;
                }
                match transport
                    .send_file(opts.chat_id, path, opts.caption.as_deref())
                    .await
                {
                    Ok(link) => {
                        counters.links.lock().await.push(link);
                        counters.landed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let landed = counters.landed.load(Ordering::Relaxed) as usize;
                        *counters.error.lock().await = Some(
                            UploadError::Partial {
                                reason: e.to_string(),
                                landed,
                                total: opts.paths.len(),
                            }
                            .to_string(),
                        );
                        *counters.state.lock().await = DriverState::Failed;
                        return;
                    }
                }
            }
            *counters.state.lock().await = DriverState::Done;
        });

        Ok(())
    }

    async fn poll(&self) -> Result<ProgressSnapshot> {
        let processed = self.counters.landed.load(Ordering::Relaxed);
        let total = *self.counters.total.lock().await;
        Ok(ProgressSnapshot {
            state: *self.counters.state.lock().await,
            processed,
            total: Some(total),
            speed_bps: 0,
            eta_seconds: None,
            error: self.counters.error.lock().await.clone(),
        })
    }

    async fn cancel(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    async fn result_links(&self) -> Vec<String> {
        self.counters.links.lock().await.clone()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as TokioMutex;

    struct FakeTransport {
        calls: AtomicU32,
        fail_after: Option<u32>,
    }

    #[async_trait]
    impl ChatFileTransport for FakeTransport {
        async fn send_file(
            &self,
            _chat_id: i64,
            path: &Path,
            _caption: Option<&str>,
        ) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after == Some(n) {
                return Err(UploadError::SinkFailed("boom".into()).into());
            }
            Ok(format!("msg://{}", path.display()))
        }
    }

    async fn wait_until_done(driver: &ChatSinkDriver) -> ProgressSnapshot {
        for _ in 0..100 {
            let snapshot = driver.poll().await.unwrap();
            if matches!(snapshot.state, DriverState::Done | DriverState::Failed) {
                return snapshot;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("chat sink never reached a terminal state");
    }

    #[tokio::test]
    async fn begin_uploads_every_path_in_order() {
        let transport = Arc::new(FakeTransport {
            calls: AtomicU32::new(0),
            fail_after: None,
        });
        let driver = ChatSinkDriver::new(transport);
        driver
            .begin(SinkBeginOptions {
                paths: vec!["a.mkv".into(), "b.mkv".into()],
                dest: None,
                chat_id: 1,
                caption: None,
            })
            .await
            .unwrap();

        let snapshot = wait_until_done(&driver).await;
        assert_eq!(snapshot.state, DriverState::Done);
        assert_eq!(driver.result_links().await.len(), 2);
    }

    #[tokio::test]
    async fn a_failed_send_reports_partial_landed_count() {
        let _lock = TokioMutex::new(());
        let transport = Arc::new(FakeTransport {
            calls: AtomicU32::new(0),
            fail_after: Some(2),
        });
        let driver = ChatSinkDriver::new(transport);
        driver
            .begin(SinkBeginOptions {
                paths: vec!["a.mkv".into(), "b.mkv".into(), "c.mkv".into()],
                dest: None,
                chat_id: 1,
                caption: None,
            })
            .await
            .unwrap();

        let snapshot = wait_until_done(&driver).await;
        assert_eq!(snapshot.state, DriverState::Failed);
        assert!(snapshot.error.unwrap().contains("1 of 3"));
        assert_eq!(driver.result_links().await.len(), 1);
    }
}
