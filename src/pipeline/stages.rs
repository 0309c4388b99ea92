//! The thirteen media-pipeline stages (spec §4.4), each a free function
//! operating on a working directory. `mod.rs` sequences them according to
//! the per-task `PipelineOptions`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::WatermarkPosition;
use crate::error::PipelineError;

use super::ffmpeg::{FfmpegProgress, FfmpegRunner, probe_duration};

/// 1. Join numbered split parts (`name.part001`, `name.part002`, ...) back
/// into one file, in numeric order, by byte concatenation.
pub async fn join(dir: &Path) -> Result<Vec<PathBuf>> {
    let groups = group_split_parts(dir).await?;
    let mut joined = Vec::new();
    for (base_name, mut parts) in groups {
        if parts.len() < 2 {
            continue;
        }
        parts.sort();
        let output_path = dir.join(&base_name);
        let mut output = tokio::fs::File::create(&output_path).await?;
        for part in &parts {
            let mut input = tokio::fs::File::open(part).await?;
            tokio::io::copy(&mut input, &mut output).await?;
        }
        for part in &parts {
            tokio::fs::remove_file(part).await?;
        }
        joined.push(output_path);
    }
    Ok(joined)
}

async fn group_split_parts(dir: &Path) -> Result<HashMap<String, Vec<PathBuf>>> {
    let part_re = Regex::new(r"^(.*)\.part\d{3,}$").expect("static pattern");
    let mut groups: HashMap<String, Vec<PathBuf>> = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(captures) = part_re.captures(name) {
                groups
                    .entry(captures[1].to_string())
                    .or_default()
                    .push(path);
            }
        }
    }
    Ok(groups)
}

/// 2. Extract an archive (zip/rar/7z), optionally password-protected, into
/// a sibling directory named after the archive's stem.
pub async fn extract(archive: &Path, password: Option<&str>) -> Result<PathBuf> {
    let dest = archive.with_extension("");
    tokio::fs::create_dir_all(&dest).await?;

    let ext = archive
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let archive = archive.to_path_buf();
    let dest_clone = dest.clone();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || -> Result<()> {
        match ext.as_str() {
            "zip" => extract_zip(&archive, &dest_clone, password.as_deref()),
            "rar" => extract_rar(&archive, &dest_clone, password.as_deref()),
            "7z" => extract_7z(&archive, &dest_clone, password.as_deref()),
            other => Err(PipelineError::StageFailed {
                stage: "extract",
                reason: format!("unsupported archive extension: {other}"),
            }
            .into()),
        }
    })
    .await
    .map_err(|e| PipelineError::StageFailed {
        stage: "extract",
        reason: e.to_string(),
    })??;

    Ok(dest)
}

fn extract_zip(archive: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| PipelineError::StageFailed {
        stage: "extract",
        reason: e.to_string(),
    })?;
    for i in 0..zip.len() {
        let mut entry = match password {
            Some(pw) => zip
                .by_index_decrypt(i, pw.as_bytes())
                .map_err(|e| PipelineError::StageFailed {
                    stage: "extract",
                    reason: e.to_string(),
                })?,
            None => zip.by_index(i).map_err(|e| PipelineError::StageFailed {
                stage: "extract",
                reason: e.to_string(),
            })?,
        };
        let out_path = dest.join(entry.mangled_name());
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out_file = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
        }
    }
    Ok(())
}

fn extract_rar(archive: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
    let mut rar = match password {
        Some(pw) => unrar::Archive::with_password(archive, pw),
        None => unrar::Archive::new(archive),
    }
    .open_for_processing()
    .map_err(|e| PipelineError::StageFailed {
        stage: "extract",
        reason: e.to_string(),
    })?;

    while let Some(header) = rar.read_header().map_err(|e| PipelineError::StageFailed {
        stage: "extract",
        reason: e.to_string(),
    })? {
        rar = if header.entry().is_file() {
            header
                .extract_with_base(dest)
                .map_err(|e| PipelineError::StageFailed {
                    stage: "extract",
                    reason: e.to_string(),
                })?
        } else {
            header.skip().map_err(|e| PipelineError::StageFailed {
                stage: "extract",
                reason: e.to_string(),
            })?
        };
    }
    Ok(())
}

fn extract_7z(archive: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
    let result = match password {
        Some(pw) => sevenz_rust::decompress_file_with_password(archive, dest, pw.into()),
        None => sevenz_rust::decompress_file(archive, dest),
    };
    result.map_err(|e| {
        PipelineError::StageFailed {
            stage: "extract",
            reason: e.to_string(),
        }
        .into()
    })
}

/// 3. Run a user-supplied, already-validated ffmpeg command template
/// against each input, per the `-md` flag (spec §4.7).
pub async fn ffmpeg_cmds(
    runner: &FfmpegRunner,
    template: &[String],
    input: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let mut args = template.to_vec();
    for arg in &mut args {
        *arg = arg.replace("{input}", &input.to_string_lossy());
    }
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("ffmpeg_cmds", &args, 0, progress, cancel)
        .await?;
    Ok(input.to_path_buf())
}

/// 4. Take evenly spaced screenshots of a video into a sibling `_ss` dir.
pub async fn screenshots(
    runner: &FfmpegRunner,
    video_file: &Path,
    count: u32,
    duration_secs: u64,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let dir_name = format!(
        "{}_ss",
        video_file.file_stem().unwrap_or_default().to_string_lossy()
    );
    let out_dir = video_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(dir_name);
    tokio::fs::create_dir_all(&out_dir).await?;

    let interval = duration_secs / (count as u64 + 1);
    for i in 0..count {
        let capture_at = interval * (i as u64 + 1);
        let output = out_dir.join(format!("SS.{i:02}.png"));
        let args = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            capture_at.to_string(),
            "-i".into(),
            video_file.to_string_lossy().into_owned(),
            "-vframes".into(),
            "1".into(),
            output.to_string_lossy().into_owned(),
        ];
        let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
        runner
            .run_with_progress("screenshots", &args, 0, progress, cancel)
            .await?;
    }
    Ok(out_dir)
}

/// 5. Re-encode or remux to a target container/codec (`-cv`/`-ca`). Tries a
/// cheap stream copy first; if that fails (incompatible codec for the target
/// container), retries once with an explicit codec set rather than
/// surfacing the first failure.
pub async fn convert(
    runner: &FfmpegRunner,
    input: &Path,
    target_ext: &str,
    expected_size: u64,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let output = input.with_extension(target_ext);

    let copy_args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ];
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    let copy_result = runner
        .run_with_progress("convert", &copy_args, expected_size, progress, cancel)
        .await;

    match copy_result {
        Ok(()) => return Ok(output),
        Err(_) if cancel.is_cancelled() => return copy_result.map(|()| output),
        Err(e) => {
            tracing::warn!(
                input = %input.display(),
                target_ext,
                error = %e,
                "stream-copy convert failed, retrying with explicit codecs"
            );
        }
    }

    let _ = tokio::fs::remove_file(&output).await;

    let args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-c:v".into(),
        "libx264".into(),
        "-c:a".into(),
        "aac".into(),
        "-c:s".into(),
        explicit_subtitle_codec(target_ext).into(),
        output.to_string_lossy().into_owned(),
    ];
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("convert", &args, expected_size, progress, cancel)
        .await?;
    Ok(output)
}

/// Subtitle codec for the explicit-codec convert retry: `mov_text` is the
/// only subtitle codec mp4 containers accept, `ass` is mkv's native text
/// format, everything else just stream-copies whatever subtitle track is
/// already present.
fn explicit_subtitle_codec(target_ext: &str) -> &'static str {
    match target_ext {
        "mp4" => "mov_text",
        "mkv" => "ass",
        _ => "copy",
    }
}

/// 6. Build a short preview by concatenating evenly spaced segments.
pub async fn sample_video(
    runner: &FfmpegRunner,
    video_file: &Path,
    total_duration_secs: u64,
    sample_total_secs: u64,
    segment_secs: u64,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let segment_count = (sample_total_secs / segment_secs.max(1)).max(1);
    let interval = total_duration_secs / (segment_count + 1);

    let mut filter = String::new();
    let mut refs = String::new();
    for i in 0..segment_count {
        let start = interval * (i + 1);
        filter.push_str(&format!(
            "[0:v]trim=start={start}:duration={segment_secs},setpts=PTS-STARTPTS[v{i}];",
        ));
        filter.push_str(&format!(
            "[0:a]atrim=start={start}:duration={segment_secs},asetpts=PTS-STARTPTS[a{i}];",
        ));
        refs.push_str(&format!("[v{i}][a{i}]"));
    }
    filter.push_str(&refs);
    filter.push_str(&format!("concat=n={segment_count}:v=1:a=1[vout][aout]"));

    let output = append_suffix(video_file, "_sample");
    let args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        video_file.to_string_lossy().into_owned(),
        "-filter_complex".into(),
        filter,
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "[aout]".into(),
        output.to_string_lossy().into_owned(),
    ];
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("sample_video", &args, 0, progress, cancel)
        .await?;
    Ok(output)
}

/// 7. Stamp container-level metadata tags (spec §4.7 `-md`-adjacent).
pub async fn metadata(
    runner: &FfmpegRunner,
    input: &Path,
    tags: &HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let output = append_suffix(input, "_meta");
    let mut args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
    ];
    for (key, value) in tags {
        args.push("-metadata".into());
        args.push(format!("{key}={value}"));
    }
    args.push(output.to_string_lossy().into_owned());

    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("metadata", &args, 0, progress, cancel)
        .await?;
    Ok(output)
}

/// 8. Embed a custom thumbnail as the attached picture stream.
pub async fn embed_thumbnail(
    runner: &FfmpegRunner,
    input: &Path,
    thumbnail: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let output = append_suffix(input, "_thumb");
    let args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-i".into(),
        thumbnail.to_string_lossy().into_owned(),
        "-map".into(),
        "0".into(),
        "-map".into(),
        "1".into(),
        "-c".into(),
        "copy".into(),
        "-disposition:v:1".into(),
        "attached_pic".into(),
        output.to_string_lossy().into_owned(),
    ];
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("embed_thumbnail", &args, 0, progress, cancel)
        .await?;
    Ok(output)
}

/// 9. Compress a directory (or file) into a 7z archive.
pub async fn compress(input: &Path) -> Result<PathBuf> {
    let output = input.with_extension("7z");
    let input = input.to_path_buf();
    let output_clone = output.clone();
    tokio::task::spawn_blocking(move || {
        sevenz_rust::compress_to_path(&input, &output_clone).map_err(|e| {
            PipelineError::StageFailed {
                stage: "compress",
                reason: e.to_string(),
            }
            .into()
        })
    })
    .await
    .map_err(|e| PipelineError::StageFailed {
        stage: "compress",
        reason: e.to_string(),
    })??;
    Ok(output)
}

/// 10. Burn a text or image watermark into the video at a fixed corner.
pub async fn watermark(
    runner: &FfmpegRunner,
    input: &Path,
    text: &str,
    position: WatermarkPosition,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let output = append_suffix(input, "_wm");
    let overlay = watermark_drawtext_position(position);
    let filter = format!("drawtext=text='{}':{}", escape_drawtext(text), overlay);
    let args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        filter,
        "-c:a".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ];
    let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
    runner
        .run_with_progress("watermark", &args, 0, progress, cancel)
        .await?;
    Ok(output)
}

fn watermark_drawtext_position(position: WatermarkPosition) -> &'static str {
    match position {
        WatermarkPosition::TopLeft => "x=10:y=10",
        WatermarkPosition::TopRight => "x=w-tw-10:y=10",
        WatermarkPosition::BottomLeft => "x=10:y=h-th-10",
        WatermarkPosition::BottomRight => "x=w-tw-10:y=h-th-10",
        WatermarkPosition::Center => "x=(w-tw)/2:y=(h-th)/2",
    }
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\").replace(':', "\\:").replace('\'', "\\'")
}

/// 11. Delete files whose extension is excluded (or not included, when an
/// include set is configured), skipping the configured thumbnail directory.
pub async fn extension_filter(
    dir: &Path,
    excluded: &[String],
    included: &[String],
    thumb_dir_exempt: &str,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        if current
            .file_name()
            .is_some_and(|n| n == thumb_dir_exempt)
        {
            continue;
        }
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            let should_remove = if !included.is_empty() {
                !included.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            } else {
                excluded.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            };
            if should_remove {
                tokio::fs::remove_file(&path).await?;
                removed.push(path);
            }
        }
    }
    Ok(removed)
}

/// Container extensions `split_for_upload` treats as video (stream-copy
/// split by duration); everything else goes through the archive volume path.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "ts", "m4v", "flv", "wmv",
];

const SPLIT_OVERLAP_SECS: u64 = 3;
const MAX_SPLIT_PARTS: u32 = 1000;

/// 12. Split a payload into parts no larger than `split_size`. Video files
/// are split by duration via ffmpeg stream-copy with `-fs`, seeking each
/// part `previous_duration - 3s` into the source to overlap the cut;
/// non-video files are compressed, then the resulting archive is split into
/// raw `*.7z.NNN` volumes.
pub async fn split_for_upload(
    runner: &FfmpegRunner,
    input: &Path,
    total_duration_secs: u64,
    split_size: u64,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    if split_size == 0 {
        return Ok(vec![input.to_path_buf()]);
    }

    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return split_archive_volumes(input, split_size).await;
    }

    if total_duration_secs == 0 {
        tracing::warn!(
            input = %input.display(),
            "split_for_upload: video duration unknown, skipping split"
        );
        return Ok(vec![input.to_path_buf()]);
    }

    let mut parts = Vec::new();
    let mut start_time = 0u64;
    let mut index = 1u32;
    let base = input.file_stem().unwrap_or_default().to_string_lossy();

    loop {
        if total_duration_secs.saturating_sub(start_time) <= SPLIT_OVERLAP_SECS {
            break;
        }

        let out_path = input.with_file_name(format!("{base}.part{index:03}.{ext}"));
        let args = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-ss".into(),
            start_time.to_string(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-fs".into(),
            split_size.to_string(),
            "-map".into(),
            "0".into(),
            "-c".into(),
            "copy".into(),
            out_path.to_string_lossy().into_owned(),
        ];
        let progress = Arc::new(Mutex::new(FfmpegProgress::default()));
        runner
            .run_with_progress("split_for_upload", &args, 0, progress, cancel)
            .await?;

        let part_duration = probe_duration(&out_path)
            .await
            .unwrap_or((total_duration_secs - start_time) as f64)
            .round() as u64;
        parts.push(out_path);

        // MKV stream-copy quirk: a part's reported duration equals the
        // source's total duration when the copy grabbed everything instead
        // of stopping at -fs. Log it and stop; this is a known truncation
        // condition, not a failure.
        if part_duration >= total_duration_secs {
            tracing::warn!(
                input = %input.display(),
                part = index,
                "split_for_upload: part duration equals source duration (stream-copy quirk), stopping"
            );
            break;
        }

        start_time += part_duration.saturating_sub(SPLIT_OVERLAP_SECS);
        index += 1;
        if index > MAX_SPLIT_PARTS {
            return Err(PipelineError::StageFailed {
                stage: "split_for_upload",
                reason: "exceeded maximum part count".into(),
            }
            .into());
        }
    }
    Ok(parts)
}

/// Non-video split path: compress to a single `{name}.7z`, then cut that
/// archive into fixed-size `*.7z.NNN` volumes by raw byte offset (the same
/// shape as a standard multi-volume 7z archive, without relying on a
/// volume-aware compression API).
async fn split_archive_volumes(input: &Path, split_size: u64) -> Result<Vec<PathBuf>> {
    let archive_path = compress(input).await?;
    let archive_len = tokio::fs::metadata(&archive_path).await?.len();
    if archive_len <= split_size {
        return Ok(vec![archive_path]);
    }

    let stem = archive_path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    let chunk_size = usize::try_from(split_size).unwrap_or(usize::MAX);

    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(&archive_path).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut parts = Vec::new();
    let mut index = 1u32;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let part_path = archive_path.with_file_name(format!("{stem}.7z.{index:03}"));
        tokio::fs::write(&part_path, &buf[..n]).await?;
        parts.push(part_path);
        index += 1;
    }

    tokio::fs::remove_file(&archive_path).await?;
    Ok(parts)
}

/// 13. Apply the user's rename template and prefix/suffix substitution.
pub fn rename_substitute(
    name: &str,
    prefix: Option<&str>,
    suffix: Option<&str>,
    template: Option<&str>,
) -> String {
    let mut result = if let Some(template) = template {
        apply_template(template, name)
    } else {
        name.to_string()
    };
    if let Some(prefix) = prefix {
        result = format!("{prefix}{result}");
    }
    if let Some(suffix) = suffix {
        let (stem, ext) = split_ext(&result);
        result = format!("{stem}{suffix}{ext}");
    }
    result
}

fn apply_template(template: &str, name: &str) -> String {
    let (stem, ext) = split_ext(name);
    template
        .replace("{name}", &stem)
        .replace("{ext}", ext.trim_start_matches('.'))
}

fn split_ext(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    path.with_file_name(format!("{stem}{suffix}.{ext}"))
}
