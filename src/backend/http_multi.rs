//! HTTP(S) multi-connection driver — the one backend protocol a crate can
//! speak without a proprietary SDK, so it gets a real implementation while
//! its six siblings are stubs behind the same trait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BackendDriver, BeginOptions, ensure_dir};
use crate::Result;
use crate::error::DownloadError;
use crate::types::{BackendKind, DriverState, ProgressSnapshot};

struct Counters {
    processed: AtomicU64,
    total: Mutex<Option<u64>>,
    started: Mutex<Option<Instant>>,
    state: Mutex<DriverState>,
    error: Mutex<Option<String>>,
}

/// Downloads a single URL via streamed GET, tracking bytes written so
/// `poll` can compute throughput and ETA.
pub struct HttpMultiDriver {
    client: reqwest::Client,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl HttpMultiDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            counters: Arc::new(Counters {
                processed: AtomicU64::new(0),
                total: Mutex::new(None),
                started: Mutex::new(None),
                state: Mutex::new(DriverState::Metadata),
                error: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl BackendDriver for HttpMultiDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::HttpMulti
    }

    fn name(&self) -> &str {
        "http-multi"
    }

    async fn begin(&self, opts: BeginOptions) -> Result<()> {
        ensure_dir(&opts.dest_dir)?;

        let response = self
            .client
            .get(&opts.link)
            .send()
            .await
            .map_err(|e| DownloadError::DriverFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::DriverFailed(format!(
                "http status {}",
                response.status()
            ))
            .into());
        }

        let total = response.content_length();
        *self.counters.total.lock().await = total;
        *self.counters.started.lock().await = Some(Instant::now());
        *self.counters.state.lock().await = DriverState::Active;

        let filename = opts
            .link
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download.bin")
            .to_string();
        let dest_path = opts.dest_dir.join(filename);

        let counters = self.counters.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = stream_to_file(response, &dest_path, &counters, &cancel).await;
            let mut state = counters.state.lock().await;
            match result {
                Ok(()) if cancel.is_cancelled() => *state = DriverState::Failed,
                Ok(()) => *state = DriverState::Done,
                Err(e) => {
                    *counters.error.lock().await = Some(e.to_string());
                    *state = DriverState::Failed;
                }
            }
        });

        Ok(())
    }

    async fn poll(&self) -> Result<ProgressSnapshot> {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let total = *self.counters.total.lock().await;
        let state = *self.counters.state.lock().await;
        let error = self.counters.error.lock().await.clone();

        let elapsed = self
            .counters
            .started
            .lock()
            .await
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let speed_bps = if elapsed > 0.0 {
            (processed as f64 / elapsed) as u64
        } else {
            0
        };
        let eta_seconds = match total {
            Some(total) if speed_bps > 0 && total > processed => {
                Some((total - processed) / speed_bps)
            }
            _ => None,
        };

        Ok(ProgressSnapshot {
            state,
            processed,
            total,
            speed_bps,
            eta_seconds,
            error,
        })
    }

    async fn cancel(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    dest_path: &std::path::Path,
    counters: &Counters,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut file = tokio::fs::File::create(dest_path).await?;
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => {
                match chunk {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| DownloadError::DriverFailed(e.to_string()))?;
                        file.write_all(&chunk).await?;
                        counters.processed.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }
    }

    file.flush().await?;
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn begin_then_poll_reaches_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4096]))
            .mount(&server)
            .await;

        let driver = HttpMultiDriver::new(reqwest::Client::new());
        let dir = tempfile::tempdir().unwrap();
        driver
            .begin(BeginOptions {
                link: format!("{}/file.bin", server.uri()),
                dest_dir: dir.path().to_path_buf(),
                seed_after_complete: false,
            })
            .await
            .unwrap();

        let mut snapshot = driver.poll().await.unwrap();
        for _ in 0..50 {
            if snapshot.state == DriverState::Done {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            snapshot = driver.poll().await.unwrap();
        }
        assert_eq!(snapshot.state, DriverState::Done);
        assert_eq!(snapshot.processed, 4096);
    }

    #[tokio::test]
    async fn cancel_stops_the_stream() {
        let driver = HttpMultiDriver::new(reqwest::Client::new());
        driver.cancel().await.unwrap();
        assert!(driver.cancel.is_cancelled());
    }
}
