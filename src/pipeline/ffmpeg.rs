//! ffmpeg subprocess orchestration.
//!
//! Ported from the original bot's `FFMpeg` class: spawn with
//! `-progress pipe:1`, parse `out_time_ms=`/`total_size=` lines from stdout
//! into a shared progress handle instead of scraping stderr.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::PipelineError;

/// Live progress of a running ffmpeg invocation.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    pub processed_bytes: u64,
    pub percent: f32,
    pub eta_seconds: Option<u64>,
}

/// Locates and invokes the ffmpeg binary.
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    /// Find `ffmpeg` on `PATH`.
    pub fn discover() -> Result<Self> {
        let binary = which::which("ffmpeg")
            .map_err(|_| PipelineError::ToolNotFound("ffmpeg".to_string()))?;
        Ok(Self { binary })
    }

    #[cfg(test)]
    pub(crate) fn at(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Run ffmpeg with `args` (the caller includes `-progress pipe:1`),
    /// updating `progress` as stdout lines arrive, and returning an error
    /// tagged with `stage` if the process exits non-zero or is cancelled.
    pub async fn run_with_progress(
        &self,
        stage: &'static str,
        args: &[String],
        expected_size: u64,
        progress: Arc<Mutex<FfmpegProgress>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();
        let started = Instant::now();
        let mut last_size = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    return Err(PipelineError::StageFailed {
                        stage,
                        reason: "cancelled".into(),
                    }
                    .into());
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if let Some(size) = line.strip_prefix("total_size=") {
                                if let Ok(size) = size.trim().parse::<u64>() {
                                    last_size = size;
                                }
                            }
                            if line.starts_with("out_time_ms=") && !line.contains("N/A") {
                                let mut guard = progress.lock().await;
                                guard.processed_bytes = last_size;
                                if expected_size > 0 {
                                    guard.percent = (last_size as f32 / expected_size as f32) * 100.0;
                                    let elapsed = started.elapsed().as_secs_f64();
                                    if elapsed > 0.0 && last_size > 0 {
                                        let speed = last_size as f64 / elapsed;
                                        guard.eta_seconds = Some(
                                            ((expected_size.saturating_sub(last_size)) as f64 / speed) as u64,
                                        );
                                    }
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(PipelineError::StageFailed {
                stage,
                reason: format!("ffmpeg exited with {status}"),
            }
            .into());
        }
        Ok(())
    }
}

/// Probe a media file's duration in seconds via `ffprobe`, used by
/// `split_for_upload` to seek the next part from the previous part's actual
/// output rather than an estimate.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let ffprobe =
        which::which("ffprobe").map_err(|_| PipelineError::ToolNotFound("ffprobe".to_string()))?;
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::StageFailed {
            stage: "split_for_upload",
            reason: format!("ffprobe exited with {}", output.status),
        }
        .into());
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|e| {
            PipelineError::StageFailed {
                stage: "split_for_upload",
                reason: format!("could not parse ffprobe duration: {e}"),
            }
            .into()
        })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_reports_tool_not_found_when_absent() {
        let original = std::env::var_os("PATH");
        unsafe { std::env::set_var("PATH", "") };
        let result = FfmpegRunner::discover();
        if let Some(path) = original {
            unsafe { std::env::set_var("PATH", path) };
        }
        assert!(result.is_err());
    }
}
