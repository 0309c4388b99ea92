//! Cloud-drive upload sink via a native vendor API.
//!
//! No vendor SDK is vendored — implementing a specific drive vendor's wire
//! protocol is out of scope, the same non-goal that keeps
//! `backend::DriveApiDriver` a stub on the download side. This sink speaks
//! a generic HTTP POST/GET against the destination endpoint named by `-up`,
//! the same "one protocol we can actually speak without an SDK" choice
//! `backend::http_multi` makes for downloads. A production deployment
//! swaps the body of `begin`/`find_existing` for the vendor SDK call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{SinkBeginOptions, SinkDriver};
use crate::Result;
use crate::error::UploadError;
use crate::types::{DriverState, ProgressSnapshot, SinkKind};

struct Counters {
    landed: AtomicU64,
    total: Mutex<u64>,
    state: Mutex<DriverState>,
    error: Mutex<Option<String>>,
    links: Mutex<Vec<String>>,
}

pub struct DriveSinkDriver {
    client: reqwest::Client,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl DriveSinkDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
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
impl SinkDriver for DriveSinkDriver {
    fn kind(&self) -> SinkKind {
        SinkKind::DriveApi
    }

    fn name(&self) -> &str {
        "drive-api"
    }

    fn supports_duplicate_check(&self) -> bool {
        true
    }

    async fn find_existing(&self, name: &str, dest: Option<&str>) -> Result<Option<String>> {
        let Some(dest) = dest else {
            return Ok(None);
        };
        let url = format!("{dest}?name={}", urlencoding::encode(name));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UploadError::SinkFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(UploadError::SinkFailed(format!(
                "duplicate-check query returned status {}",
                response.status()
            ))
            .into());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UploadError::SinkFailed(e.to_string()))?;
        Ok(body
            .get("link")
            .and_then(|l| l.as_str())
            .map(str::to_string))
    }

    async fn begin(&self, opts: SinkBeginOptions) -> Result<()> {
        let dest = opts
            .dest
            .clone()
            .ok_or_else(|| UploadError::SinkFailed("no drive destination configured".into()))?;

        *self.counters.total.lock().await = opts.paths.len() as u64;
        *self.counters.state.lock().await = DriverState::Active;

        let client = self.client.clone();
        let counters = self.counters.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for path in &opts.paths {
                if cancel.is_cancelled() {
                    *counters.state.lock().await = DriverState::Failed;
                    return;
                }
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("upload.bin");
                let bytes = match tokio::fs::read(path).await {
                    Ok(b) => b,
                    Err(e) => {
                        *counters.error.lock().await = Some(e.to_string());
                        *counters.state.lock().await = DriverState::Failed;
                        return;
                    }
                };
                let url = format!("{dest}?name={}", urlencoding::encode(name));
                match client.post(&url).body(bytes).send().await {
                    Ok(response) if response.status().is_success() => {
                        let link = response
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| {
                                v.get("link").and_then(|l| l.as_str().map(str::to_string))
                            })
                            .unwrap_or_else(|| url.clone());
                        counters.links.lock().await.push(link);
                        counters.landed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(response) => {
                        *counters.error.lock().await =
                            Some(format!("drive upload returned status {}", response.status()));
                        *counters.state.lock().await = DriverState::Failed;
                        return;
                    }
                    Err(e) => {
                        *counters.error.lock().await = Some(e.to_string());
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
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn find_existing_reports_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("name", "movie.mkv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let driver = DriveSinkDriver::new(reqwest::Client::new());
        let result = driver
            .find_existing("movie.mkv", Some(&server.uri()))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn find_existing_returns_the_link_on_a_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("name", "movie.mkv"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"link": "https://drive.example/x"})),
            )
            .mount(&server)
            .await;

        let driver = DriveSinkDriver::new(reqwest::Client::new());
        let result = driver
            .find_existing("movie.mkv", Some(&server.uri()))
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("https://drive.example/x"));
    }

    #[tokio::test]
    async fn begin_without_a_destination_fails_fast() {
        let driver = DriveSinkDriver::new(reqwest::Client::new());
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
