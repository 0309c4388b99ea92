//! Media Pipeline (spec §4.4): thirteen ordered, individually-skippable
//! stages run over a task's downloaded output before it is handed to the
//! upload sink.

mod ffmpeg;
mod stages;

use std::collections::HashMap;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use ffmpeg::FfmpegRunner;

use crate::Result;
use crate::config::{FileCollisionAction, WatermarkPosition};
use crate::types::TaskId;

/// Per-task stage toggles, assembled by the dispatcher from flag values and
/// by the Task Lifecycle from the resolved `TaskConfig`.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    pub extract_password: Option<String>,
    pub ffmpeg_template: Option<Vec<String>>,
    pub screenshot_count: Option<u32>,
    pub convert_video_ext: Option<String>,
    pub convert_audio_ext: Option<String>,
    pub sample_video: Option<(u64, u64)>,
    pub metadata_tags: HashMap<String, String>,
    pub embed_thumbnail: Option<PathBuf>,
    pub compress: bool,
    pub watermark_text: Option<String>,
    pub watermark_position: WatermarkPosition,
    pub excluded_extensions: Vec<String>,
    pub included_extensions: Vec<String>,
    pub thumb_dir_exempt: String,
    pub split_size: u64,
    pub rename_prefix: Option<String>,
    pub rename_suffix: Option<String>,
    pub rename_template: Option<String>,
    pub file_collision: FileCollisionAction,
    /// Known or estimated video duration in seconds, needed by the sample
    /// and split stages. Zero means unknown/not a video.
    pub video_duration_secs: u64,
}

/// Run every enabled stage over `working_dir`, in spec order, returning the
/// set of output paths ready for upload.
pub async fn run_pipeline(
    task_id: &TaskId,
    working_dir: &std::path::Path,
    opts: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    check_cancelled(cancel)?;
    stages::join(working_dir).await?;
    check_cancelled(cancel)?;

    if let Some(password) = opts.extract_password.as_deref() {
        let mut entries = tokio::fs::read_dir(working_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            check_cancelled(cancel)?;
            let path = entry.path();
            let is_archive = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("zip") | Some("rar") | Some("7z")
            );
            if is_archive {
                info!(%task_id, stage = "extract", path = %path.display(), "running pipeline stage");
                stages::extract(&path, Some(password)).await?;
            }
        }
        check_cancelled(cancel)?;
    }

    let mut outputs = collect_files(working_dir).await?;
    check_cancelled(cancel)?;

    if let Some(template) = &opts.ffmpeg_template {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "ffmpeg_cmds", "running pipeline stage");
            *path = stages::ffmpeg_cmds(&runner, template, path, cancel).await?;
        }
    }
    check_cancelled(cancel)?;

    if let Some(count) = opts.screenshot_count {
        if opts.video_duration_secs > 0 {
            let runner = FfmpegRunner::discover()?;
            for path in &outputs {
                info!(%task_id, stage = "screenshots", "running pipeline stage");
                stages::screenshots(&runner, path, count, opts.video_duration_secs, cancel)
                    .await?;
            }
        }
    }
    check_cancelled(cancel)?;

    if let Some(ext) = &opts.convert_video_ext {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "convert_video", "running pipeline stage");
            *path = stages::convert(&runner, path, ext, 0, cancel).await?;
        }
    }
    check_cancelled(cancel)?;
    if let Some(ext) = &opts.convert_audio_ext {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "convert_audio", "running pipeline stage");
            *path = stages::convert(&runner, path, ext, 0, cancel).await?;
        }
    }
    check_cancelled(cancel)?;

    if let Some((sample_total, segment)) = opts.sample_video {
        if opts.video_duration_secs > 0 {
            let runner = FfmpegRunner::discover()?;
            for path in &outputs {
                info!(%task_id, stage = "sample_video", "running pipeline stage");
                stages::sample_video(
                    &runner,
                    path,
                    opts.video_duration_secs,
                    sample_total,
                    segment,
                    cancel,
                )
                .await?;
            }
        }
    }
    check_cancelled(cancel)?;

    if !opts.metadata_tags.is_empty() {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "metadata", "running pipeline stage");
            *path = stages::metadata(&runner, path, &opts.metadata_tags, cancel).await?;
        }
    }
    check_cancelled(cancel)?;

    if let Some(thumb) = &opts.embed_thumbnail {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "embed_thumbnail", "running pipeline stage");
            *path = stages::embed_thumbnail(&runner, path, thumb, cancel).await?;
        }
    }
    check_cancelled(cancel)?;

    if opts.compress {
        info!(%task_id, stage = "compress", "running pipeline stage");
        let archive = stages::compress(working_dir).await?;
        outputs = vec![archive];
    }
    check_cancelled(cancel)?;

    if let Some(text) = &opts.watermark_text {
        let runner = FfmpegRunner::discover()?;
        for path in outputs.iter_mut() {
            info!(%task_id, stage = "watermark", "running pipeline stage");
            *path = stages::watermark(&runner, path, text, opts.watermark_position, cancel)
                .await?;
        }
    }
    check_cancelled(cancel)?;

    let removed = stages::extension_filter(
        working_dir,
        &opts.excluded_extensions,
        &opts.included_extensions,
        &opts.thumb_dir_exempt,
    )
    .await?;
    outputs.retain(|p| !removed.contains(p));
    check_cancelled(cancel)?;

    if opts.split_size > 0 {
        let runner = FfmpegRunner::discover()?;
        let mut split_outputs = Vec::new();
        for path in &outputs {
            info!(%task_id, stage = "split_for_upload", "running pipeline stage");
            let parts = stages::split_for_upload(
                &runner,
                path,
                opts.video_duration_secs,
                opts.split_size,
                cancel,
            )
            .await?;
            split_outputs.extend(parts);
        }
        outputs = split_outputs;
    }
    check_cancelled(cancel)?;

    for path in outputs.iter_mut() {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            let renamed = stages::rename_substitute(
                name,
                opts.rename_prefix.as_deref(),
                opts.rename_suffix.as_deref(),
                opts.rename_template.as_deref(),
            );
            if renamed != name {
                let new_path = path.with_file_name(renamed);
                tokio::fs::rename(&path, &new_path).await?;
                *path = new_path;
            }
        }
    }

    Ok(outputs)
}

/// Cancellation is checked between every stage (not just inside the
/// ffmpeg-backed ones): a cancelled task must not start the next stage.
fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(crate::Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Walk `dir` recursively, returning every file path found. Exposed beyond
/// this module so the Task Lifecycle can re-collect a same-directory
/// group's shared output without re-running the pipeline for every member.
pub(crate) async fn collect_files(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}
