//! Task Lifecycle (spec §4.5), the driver that owns one task end to end.
//!
//! `transition` enforces the directed graph the lifecycle allows; `Listener`
//! is the per-task owner that calls `transition` before acting on a new
//! state so an invalid jump is rejected before any side effect runs, and
//! `run_task` sequences a task through
//! `admission → download → pipeline → upload → finalize`, wiring together
//! the admission gates, the Status Registry, the backend/sink driver
//! factories, and the media pipeline. The real `BackendDriver`/`SinkDriver`
//! traits are poll-based rather than callback-based (the same begin-then-poll
//! shape `backend::http_multi` already uses), so `Listener`'s
//! `on_download_start`/`on_download_complete`/`on_upload_complete`/
//! `on_download_error`/`on_upload_error` methods are invoked by `run_task`'s
//! poll loops rather than by the drivers themselves.

mod same_dir;
mod spawn;

pub use same_dir::SameDirGroup;
pub use spawn::spawn_task;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::backend::{self, BeginOptions};
use crate::config::Config;
use crate::db::Store;
use crate::dispatcher::TaskConfig;
use crate::error::{AdmissionError, DownloadError, PipelineError};
use crate::pipeline::{self, PipelineOptions};
use crate::queue::Queue;
use crate::registry::StatusRegistry;
use crate::sink::{self, ChatFileTransport, SinkBeginOptions};
use crate::types::{
    BackendKind, DriverState, Event, GateKind, SinkKind, StatusEntry, StatusPhase, TaskId,
    TaskState,
};

/// Validate a requested state transition, returning the rejected-as error
/// form the registry and dispatcher both report on an invalid jump.
pub fn transition(id: &TaskId, from: TaskState, to: TaskState) -> Result<()> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(DownloadError::InvalidState {
            id: id.clone(),
            operation: format!("transition to {to:?}"),
            current_state: from,
        }
        .into())
    }
}

fn allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;

    if from.is_terminal() {
        return false;
    }
    // Any non-terminal state can be cancelled or can fail.
    if matches!(to, Cancelled | Failed) {
        return true;
    }

    matches!(
        (from, to),
        (Created, AdmissionCheck)
            | (AdmissionCheck, WaitingDl)
            | (AdmissionCheck, Downloading)
            | (WaitingDl, Downloading)
            | (Downloading, PipelineProcessing)
            | (PipelineProcessing, WaitingUp)
            | (PipelineProcessing, Uploading)
            | (WaitingUp, Uploading)
            | (Uploading, Finalized)
    )
}

/// Classify a link by shape into the backend it should be admitted against
/// (spec §4.1's "the dispatcher resolves a link to a backend kind").
pub fn resolve_backend_kind(link: &str) -> BackendKind {
    if link.starts_with("magnet:") || link.ends_with(".torrent") {
        BackendKind::BitTorrent
    } else if link.starts_with("nzb://") || link.ends_with(".nzb") {
        BackendKind::Usenet
    } else if link.starts_with("reply:") {
        BackendKind::ChatMedia
    } else if link.starts_with("http://") || link.starts_with("https://") {
        BackendKind::HttpMulti
    } else {
        BackendKind::LinkResolver
    }
}

/// Classify an `-up` destination string into the sink it should upload to.
/// `None` (no `-up` given) always means the chat sink: the task is a leech.
pub fn resolve_sink_kind(up_dest: Option<&str>) -> SinkKind {
    let Some(dest) = up_dest else {
        return SinkKind::Chat;
    };
    let lower = dest.to_ascii_lowercase();
    if lower == "gd" || lower.starts_with("gdrive") || lower.starts_with("drive:") {
        SinkKind::DriveApi
    } else if lower.starts_with("rc:") || lower.starts_with("rclone:") {
        SinkKind::SyncDaemon
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        SinkKind::FileHost
    } else {
        SinkKind::Chat
    }
}

fn derive_name_hint(config: &TaskConfig) -> String {
    config.name_override.clone().unwrap_or_else(|| {
        config
            .link
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(config.id.as_str())
            .to_string()
    })
}

/// Collaborators every `Listener` needs, assembled once by `MirrorEngine`
/// and shared (cheaply cloned) across every task it runs.
#[derive(Clone)]
pub struct ListenerDeps {
    pub store: Store,
    pub queue: Queue,
    pub registry: StatusRegistry,
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    pub http_client: reqwest::Client,
    pub chat_transport: Arc<dyn ChatFileTransport>,
    pub base_dir: PathBuf,
    pub config: Arc<Config>,
}

struct ListenerState {
    name: String,
    working_dir: PathBuf,
    task_state: TaskState,
}

/// Owns one task's mutable state across its whole lifecycle: its immutable
/// [`TaskConfig`], its working directory, its cancellation token, and (for
/// `-m` tasks) the [`SameDirGroup`] it shares a destination with.
pub struct Listener {
    config: TaskConfig,
    deps: ListenerDeps,
    cancel: CancellationToken,
    same_dir: Option<SameDirGroup>,
    state: Mutex<ListenerState>,
}

impl Listener {
    /// Build a listener for a freshly dispatched task. `same_dir` is
    /// `Some` only when `config.same_dir_key` matched an existing or newly
    /// formed group.
    pub fn new(config: TaskConfig, deps: ListenerDeps, same_dir: Option<SameDirGroup>) -> Self {
        let name = derive_name_hint(&config);
        let working_dir = deps.base_dir.join(config.id.as_str());
        Self {
            config,
            deps,
            cancel: CancellationToken::new(),
            same_dir,
            state: Mutex::new(ListenerState {
                name,
                working_dir,
                task_state: TaskState::Created,
            }),
        }
    }

    /// The task this listener drives.
    pub fn id(&self) -> &TaskId {
        &self.config.id
    }

    /// A handle to cancel this task from outside `run_task`.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn backend_kind(&self) -> BackendKind {
        resolve_backend_kind(&self.config.link)
    }

    fn sink_kind(&self) -> SinkKind {
        resolve_sink_kind(self.config.up_dest.as_deref())
    }

    async fn name(&self) -> String {
        self.state.lock().await.name.clone()
    }

    async fn working_dir(&self) -> PathBuf {
        self.state.lock().await.working_dir.clone()
    }

    async fn transition_to(&self, to: TaskState) -> Result<()> {
        let mut state = self.state.lock().await;
        transition(&self.config.id, state.task_state, to)?;
        state.task_state = to;
        Ok(())
    }

    /// Admission: create the working directory (shared for `-m` tasks, a
    /// per-task one otherwise) and, for non-leech tasks destined for a sink
    /// that supports it, reject up front if the destination already holds
    /// an entry with this task's name (spec §4.8). On a duplicate hit the
    /// working directory is removed and the task is cancelled before any
    /// bytes move.
    pub async fn before_start(&self) -> Result<()> {
        self.transition_to(TaskState::AdmissionCheck).await?;

        let working_dir = match &self.config.same_dir_key {
            Some(key) => self.deps.base_dir.join(key),
            None => self.deps.base_dir.join(self.config.id.as_str()),
        };
        backend::ensure_dir(&working_dir)?;
        self.state.lock().await.working_dir = working_dir;

        let sink_kind = self.sink_kind();
        if !matches!(sink_kind, SinkKind::Chat) {
            let driver = sink::sink_for(
                sink_kind,
                self.deps.http_client.clone(),
                self.deps.chat_transport.clone(),
            );
            if driver.supports_duplicate_check() {
                let name_hint = derive_name_hint(&self.config);
                if let Some(existing_link) = driver
                    .find_existing(&name_hint, self.config.up_dest.as_deref())
                    .await?
                {
                    let _ = self.deps.event_tx.send(Event::DuplicateDetected {
                        name: name_hint,
                        existing_link: existing_link.clone(),
                    });
                    self.clean().await;
                    self.transition_to(TaskState::Cancelled).await.ok();
                    return Err(AdmissionError::Duplicate { existing_link }.into());
                }
            }
        }

        Ok(())
    }

    /// Remove the working directory on any exit path (invariant 5 / testable
    /// property 2). For a shared `-m` directory, membership is dropped first
    /// and only the member that wins `try_claim_cleanup` actually removes
    /// the directory, so survivors keep their files until every member is
    /// done.
    pub async fn clean(&self) {
        let working_dir = self.working_dir().await;
        if let Some(group) = &self.same_dir {
            group.drop_member(&self.config.id).await;
            if !group.is_empty().await || !group.try_claim_cleanup() {
                return;
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&working_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(id = %self.config.id, error = %e, path = %working_dir.display(), "failed to remove working directory");
            }
        }
    }

    /// Called once the backend driver's `begin` succeeds: appends the
    /// journal row (per the journal format's "appended on download-start"
    /// rule) and emits [`Event::DownloadStarted`].
    pub async fn on_download_start(&self) -> Result<()> {
        self.deps
            .store
            .journal_insert(
                &self.config.id,
                self.config.chat_id,
                self.config.owner_id,
                &self.config.link,
                self.config.tag.as_deref(),
            )
            .await?;
        let _ = self.deps.event_tx.send(Event::DownloadStarted {
            id: self.config.id.clone(),
            backend: self.backend_kind(),
        });
        Ok(())
    }

    async fn on_download_complete(&self) {
        let _ = self
            .deps
            .event_tx
            .send(Event::DownloadComplete { id: self.config.id.clone() });
    }

    async fn finish_terminal(&self, state: TaskState, event: Event) {
        self.transition_to(state).await.ok();
        let _ = self.deps.event_tx.send(event);
        self.clean().await;
        self.deps.registry.remove(&self.config.id).await;
        self.deps.store.journal_delete(&self.config.id).await.ok();
    }

    /// Terminal failure during download: cleans up the working directory
    /// and removes the registry/journal entries before reporting.
    pub async fn on_download_error(&self, reason: &str) {
        self.finish_terminal(
            TaskState::Failed,
            Event::DownloadFailed {
                id: self.config.id.clone(),
                error: reason.to_string(),
            },
        )
        .await;
    }

    async fn fail_pipeline(&self, error: &crate::Error) {
        let stage = match error {
            crate::Error::Pipeline(PipelineError::StageFailed { stage, .. }) => *stage,
            _ => "pipeline",
        };
        self.finish_terminal(
            TaskState::Failed,
            Event::PipelineFailed {
                id: self.config.id.clone(),
                stage,
                error: error.to_string(),
            },
        )
        .await;
    }

    /// Terminal failure during upload, reporting whatever landed before the
    /// failure per the partial-upload journaling rule.
    pub async fn on_upload_error(&self, reason: &str, landed: Vec<String>) {
        self.finish_terminal(
            TaskState::Failed,
            Event::UploadFailed {
                id: self.config.id.clone(),
                error: reason.to_string(),
                landed,
            },
        )
        .await;
    }

    /// Terminal success: finalize, emit the links the sink produced, and
    /// remove the working directory / registry / journal entries.
    pub async fn on_upload_complete(&self, links: Vec<String>) {
        self.transition_to(TaskState::Finalized).await.ok();
        let files = links.len() as u32;
        let _ = self.deps.event_tx.send(Event::Finalized {
            id: self.config.id.clone(),
            links,
            files,
            folders: 0,
        });
        self.clean().await;
        self.deps.registry.remove(&self.config.id).await;
        self.deps.store.journal_delete(&self.config.id).await.ok();
    }

    async fn cancel_task(&self) {
        self.finish_terminal(
            TaskState::Cancelled,
            Event::Cancelled { id: self.config.id.clone() },
        )
        .await;
    }

    async fn queued_status_entry(&self, gate: GateKind) -> StatusEntry {
        StatusEntry {
            id: self.config.id.clone(),
            phase: match gate {
                GateKind::Download => StatusPhase::QueuedDl,
                GateKind::Upload => StatusPhase::QueuedUp,
            },
            driver: None,
            percent: 0.0,
            processed_bytes: 0,
            speed_bps: 0,
            eta_seconds: None,
            name: self.name().await,
            size_bytes: None,
            sequence: 0,
        }
    }

    fn pipeline_options(&self) -> PipelineOptions {
        let cfg = &self.config;
        let defaults = &self.deps.config.pipeline;
        let mut metadata_tags = HashMap::new();
        if let Some(title) = &cfg.metadata_title {
            metadata_tags.insert("title".to_string(), title.clone());
        }
        PipelineOptions {
            extract_password: cfg.extract.then(|| cfg.extract_password.clone()).flatten(),
            ffmpeg_template: None,
            screenshot_count: cfg.screenshots.then_some(defaults.screenshot_count),
            convert_video_ext: cfg.convert_video_ext.clone(),
            convert_audio_ext: cfg.convert_audio_ext.clone(),
            sample_video: cfg.sample_video.then_some((
                defaults.sample_segments as u64,
                defaults.sample_segment_duration.as_secs(),
            )),
            metadata_tags,
            embed_thumbnail: cfg.thumbnail_source.clone().map(PathBuf::from),
            compress: cfg.compress,
            watermark_text: None,
            watermark_position: cfg.watermark_position,
            excluded_extensions: cfg.excluded_extensions.clone(),
            included_extensions: cfg.included_extensions.clone(),
            thumb_dir_exempt: defaults.thumb_dir_exempt.clone(),
            split_size: if matches!(self.sink_kind(), SinkKind::Chat) {
                cfg.split_size_override
                    .unwrap_or(self.deps.config.upload.leech_split_size)
            } else {
                0
            },
            rename_prefix: None,
            rename_suffix: None,
            rename_template: cfg.name_substitution.clone(),
            file_collision: cfg.file_collision,
            video_duration_secs: 0,
        }
    }

    /// Run the media pipeline over the working directory. For a shared
    /// `-m` directory only the first member to claim ownership actually
    /// runs the pipeline; the rest wait for its result and re-collect the
    /// (now shared) output files instead of processing them twice.
    async fn run_pipeline_stage(&self) -> Result<Vec<PathBuf>> {
        let working_dir = self.working_dir().await;
        let opts = self.pipeline_options();

        let Some(group) = &self.same_dir else {
            return pipeline::run_pipeline(&self.config.id, &working_dir, &opts, &self.cancel)
                .await;
        };

        if group.try_claim_pipeline_owner() {
            let result =
                pipeline::run_pipeline(&self.config.id, &working_dir, &opts, &self.cancel).await;
            let signal = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
            group.signal_pipeline_done(signal);
            result
        } else {
            group
                .wait_for_pipeline()
                .await
                .map_err(crate::Error::Fatal)?;
            pipeline::collect_files(&working_dir).await
        }
    }
}

/// Spawn-entry driver: sequences one task through
/// `admission → download → pipeline → upload → finalize`, wiring the
/// admission gates, the Status Registry, the backend/sink driver factories,
/// and the media pipeline together.
pub async fn run_task(config: TaskConfig, deps: ListenerDeps, same_dir: Option<SameDirGroup>) {
    let id = config.id.clone();
    let listener = Listener::new(config, deps, same_dir);
    if let Err(e) = run_task_inner(&listener).await {
        tracing::warn!(%id, error = %e, "task ended without finalizing");
    }
}

async fn run_task_inner(listener: &Listener) -> Result<()> {
    listener.before_start().await?;

    listener.transition_to(TaskState::WaitingDl).await?;
    listener
        .deps
        .registry
        .put(listener.queued_status_entry(GateKind::Download).await)
        .await;
    let _ = listener.deps.event_tx.send(Event::Queued {
        id: listener.config.id.clone(),
        name: listener.name().await,
        gate: GateKind::Download,
    });

    let dl_ticket = tokio::select! {
        ticket = listener.deps.queue.download().admit() => ticket,
        _ = listener.cancel.cancelled() => Err(crate::Error::Cancelled),
    };
    let dl_ticket = match dl_ticket {
        Ok(ticket) => ticket,
        Err(e) => {
            listener.cancel_task().await;
            return Err(e);
        }
    };

    listener.transition_to(TaskState::Downloading).await?;
    let working_dir = listener.working_dir().await;
    let backend_driver = backend::driver_for(listener.backend_kind(), listener.deps.http_client.clone());
    if let Err(e) = backend_driver
        .begin(BeginOptions {
            link: listener.config.link.clone(),
            dest_dir: working_dir,
            seed_after_complete: listener.config.seed,
        })
        .await
    {
        listener.deps.queue.download().release(dl_ticket).await;
        listener.on_download_error(&e.to_string()).await;
        return Err(e);
    }
    if let Err(e) = listener.on_download_start().await {
        listener.deps.queue.download().release(dl_ticket).await;
        listener.on_download_error(&e.to_string()).await;
        return Err(e);
    }

    loop {
        if listener.cancel.is_cancelled() {
            let _ = backend_driver.cancel().await;
            listener.deps.queue.download().release(dl_ticket).await;
            listener.cancel_task().await;
            return Err(crate::Error::Cancelled);
        }
        let snapshot = match backend_driver.poll().await {
            Ok(s) => s,
            Err(e) => {
                listener.deps.queue.download().release(dl_ticket).await;
                listener.on_download_error(&e.to_string()).await;
                return Err(e);
            }
        };
        let _ = listener.deps.event_tx.send(Event::Downloading {
            id: listener.config.id.clone(),
            progress: snapshot.clone(),
        });
        match snapshot.state {
            DriverState::Done => break,
            DriverState::Failed => {
                listener.deps.queue.download().release(dl_ticket).await;
                let reason = snapshot.error.unwrap_or_else(|| "download failed".to_string());
                listener.on_download_error(&reason).await;
                return Err(DownloadError::DriverFailed(reason).into());
            }
            _ => tokio::time::sleep(Duration::from_millis(500)).await,
        }
    }
    listener.deps.queue.download().release(dl_ticket).await;
    listener.on_download_complete().await;

    listener.transition_to(TaskState::PipelineProcessing).await?;
    let outputs = match listener.run_pipeline_stage().await {
        Ok(outputs) => outputs,
        Err(e) => {
            listener.fail_pipeline(&e).await;
            return Err(e);
        }
    };

    listener.transition_to(TaskState::WaitingUp).await?;
    listener
        .deps
        .registry
        .put(listener.queued_status_entry(GateKind::Upload).await)
        .await;
    let _ = listener.deps.event_tx.send(Event::Queued {
        id: listener.config.id.clone(),
        name: listener.name().await,
        gate: GateKind::Upload,
    });

    let up_ticket = tokio::select! {
        ticket = listener.deps.queue.upload().admit() => ticket,
        _ = listener.cancel.cancelled() => Err(crate::Error::Cancelled),
    };
    let up_ticket = match up_ticket {
        Ok(ticket) => ticket,
        Err(e) => {
            listener.cancel_task().await;
            return Err(e);
        }
    };

    listener.transition_to(TaskState::Uploading).await?;
    let sink_kind = listener.sink_kind();
    let sink_driver = sink::sink_for(
        sink_kind,
        listener.deps.http_client.clone(),
        listener.deps.chat_transport.clone(),
    );
    if let Err(e) = sink_driver
        .begin(SinkBeginOptions {
            paths: outputs,
            dest: listener.config.up_dest.clone(),
            chat_id: listener.config.chat_id,
            caption: listener.config.metadata_title.clone(),
        })
        .await
    {
        listener.deps.queue.upload().release(up_ticket).await;
        listener.on_upload_error(&e.to_string(), Vec::new()).await;
        return Err(e);
    }
    let _ = listener.deps.event_tx.send(Event::UploadStarted {
        id: listener.config.id.clone(),
        sink: sink_kind,
    });

    loop {
        if listener.cancel.is_cancelled() {
            let _ = sink_driver.cancel().await;
            listener.deps.queue.upload().release(up_ticket).await;
            listener.cancel_task().await;
            return Err(crate::Error::Cancelled);
        }
        let snapshot = match sink_driver.poll().await {
            Ok(s) => s,
            Err(e) => {
                listener.deps.queue.upload().release(up_ticket).await;
                let landed = sink_driver.result_links().await;
                listener.on_upload_error(&e.to_string(), landed).await;
                return Err(e);
            }
        };
        let _ = listener.deps.event_tx.send(Event::Uploading {
            id: listener.config.id.clone(),
            progress: snapshot.clone(),
        });
        match snapshot.state {
            DriverState::Done => break,
            DriverState::Failed => {
                listener.deps.queue.upload().release(up_ticket).await;
                let landed = sink_driver.result_links().await;
                let reason = snapshot.error.unwrap_or_else(|| "upload failed".to_string());
                listener.on_upload_error(&reason, landed).await;
                return Err(crate::error::UploadError::SinkFailed(reason).into());
            }
            _ => tokio::time::sleep(Duration::from_millis(500)).await,
        }
    }
    listener.deps.queue.upload().release(up_ticket).await;
    let links = sink_driver.result_links().await;
    listener.on_upload_complete(links).await;

    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_fully_allowed() {
        use TaskState::*;
        let id = TaskId("t".into());
        let path = [
            Created,
            AdmissionCheck,
            Downloading,
            PipelineProcessing,
            Uploading,
            Finalized,
        ];
        for pair in path.windows(2) {
            transition(&id, pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn cancel_is_allowed_from_any_nonterminal_state() {
        use TaskState::*;
        let id = TaskId("t".into());
        for state in [Created, AdmissionCheck, Downloading, PipelineProcessing, Uploading] {
            transition(&id, state, Cancelled).unwrap();
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        use TaskState::*;
        let id = TaskId("t".into());
        for terminal in [Finalized, Failed, Cancelled] {
            assert!(transition(&id, terminal, Downloading).is_err());
        }
    }

    #[test]
    fn skipping_pipeline_processing_is_rejected() {
        use TaskState::*;
        let id = TaskId("t".into());
        assert!(transition(&id, Downloading, Uploading).is_err());
    }

    #[test]
    fn waiting_gates_lead_into_their_active_state() {
        use TaskState::*;
        let id = TaskId("t".into());
        transition(&id, WaitingDl, Downloading).unwrap();
        transition(&id, WaitingUp, Uploading).unwrap();
    }

    #[test]
    fn resolve_backend_kind_classifies_by_link_shape() {
        assert_eq!(
            resolve_backend_kind("magnet:?xt=urn:btih:abc"),
            BackendKind::BitTorrent
        );
        assert_eq!(resolve_backend_kind("a.torrent"), BackendKind::BitTorrent);
        assert_eq!(resolve_backend_kind("nzb://x"), BackendKind::Usenet);
        assert_eq!(resolve_backend_kind("a.nzb"), BackendKind::Usenet);
        assert_eq!(resolve_backend_kind("reply:42"), BackendKind::ChatMedia);
        assert_eq!(
            resolve_backend_kind("https://example.com/a.zip"),
            BackendKind::HttpMulti
        );
        assert_eq!(resolve_backend_kind("ed2k://x"), BackendKind::LinkResolver);
    }

    #[test]
    fn resolve_sink_kind_classifies_by_destination() {
        assert_eq!(resolve_sink_kind(None), SinkKind::Chat);
        assert_eq!(resolve_sink_kind(Some("gd")), SinkKind::DriveApi);
        assert_eq!(resolve_sink_kind(Some("gdrive:movies")), SinkKind::DriveApi);
        assert_eq!(resolve_sink_kind(Some("rc:remote/path")), SinkKind::SyncDaemon);
        assert_eq!(
            resolve_sink_kind(Some("https://filehost.example/api")),
            SinkKind::FileHost
        );
        assert_eq!(resolve_sink_kind(Some("some-alias")), SinkKind::Chat);
    }

    fn test_config(link: &str, up_dest: Option<&str>, same_dir_key: Option<&str>) -> TaskConfig {
        use crate::config::{FileCollisionAction, WatermarkPosition};
        use crate::dispatcher::TaskKind;
        TaskConfig {
            id: TaskId::generate(),
            kind: TaskKind::Mirror,
            owner_id: 1,
            chat_id: 100,
            reply_id: None,
            link: link.to_string(),
            tag: None,
            name_override: None,
            up_dest: up_dest.map(str::to_string),
            rclone_flags: None,
            consume_next: 0,
            bulk_range: None,
            same_dir_key: same_dir_key.map(str::to_string),
            seed: false,
            seed_ratio_time: None,
            select: false,
            compress: false,
            extract: false,
            extract_password: None,
            sample_video: false,
            screenshots: false,
            convert_audio_ext: None,
            convert_video_ext: None,
            metadata_title: None,
            hybrid_leech: false,
            force_user_transmission: false,
            force_bot_transmission: false,
            force_document: false,
            force_media: false,
            thumbnail_layout: None,
            split_size_override: None,
            thumbnail_source: None,
            name_substitution: None,
            http_auth: None,
            http_headers: None,
            included_extensions: Vec::new(),
            excluded_extensions: Vec::new(),
            file_collision: FileCollisionAction::default(),
            watermark_position: WatermarkPosition::BottomRight,
        }
    }

    struct NullChatTransport;

    #[async_trait::async_trait]
    impl ChatFileTransport for NullChatTransport {
        async fn send_file(
            &self,
            _chat_id: i64,
            _path: &std::path::Path,
            _caption: Option<&str>,
        ) -> Result<String> {
            Ok("noop".into())
        }
    }

    async fn test_deps(base_dir: PathBuf) -> ListenerDeps {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let (event_tx, _) = tokio::sync::broadcast::channel(16);
        ListenerDeps {
            store,
            queue: Queue::new(&crate::config::QueueConfig::default()),
            registry: StatusRegistry::new(),
            event_tx,
            http_client: reqwest::Client::new(),
            chat_transport: Arc::new(NullChatTransport),
            base_dir,
            config: Arc::new(Config::default()),
        }
    }

    #[tokio::test]
    async fn before_start_creates_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config("https://example.com/a.zip", None, None);
        let id = config.id.clone();
        let deps = test_deps(dir.path().to_path_buf()).await;
        let listener = Listener::new(config, deps, None);

        listener.before_start().await.unwrap();
        assert!(dir.path().join(id.as_str()).is_dir());
    }

    #[tokio::test]
    async fn before_start_rejects_a_duplicate_at_a_drive_destination() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"link": "https://drive.example/existing"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config("https://example.com/a.zip", Some(&server.uri()), None);
        let deps = test_deps(dir.path().to_path_buf()).await;
        let listener = Listener::new(config, deps, None);

        let err = listener.before_start().await.unwrap_err();
        match err {
            crate::Error::Admission(AdmissionError::Duplicate { existing_link }) => {
                assert_eq!(existing_link, "https://drive.example/existing");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_removes_a_solo_tasks_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config("https://example.com/a.zip", None, None);
        let id = config.id.clone();
        let deps = test_deps(dir.path().to_path_buf()).await;
        let listener = Listener::new(config, deps, None);

        listener.before_start().await.unwrap();
        listener.clean().await;
        assert!(!dir.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn clean_only_removes_a_shared_directory_once_every_member_has_left() {
        let dir = tempfile::tempdir().unwrap();
        let config_a = test_config("https://example.com/a.zip", None, Some("shared"));
        let config_b = test_config("https://example.com/b.zip", None, Some("shared"));
        let group = SameDirGroup::new([config_a.id.clone(), config_b.id.clone()]);

        let deps_a = test_deps(dir.path().to_path_buf()).await;
        let deps_b = test_deps(dir.path().to_path_buf()).await;
        let listener_a = Listener::new(config_a, deps_a, Some(group.clone()));
        let listener_b = Listener::new(config_b, deps_b, Some(group.clone()));

        listener_a.before_start().await.unwrap();
        listener_b.before_start().await.unwrap();

        listener_a.clean().await;
        assert!(dir.path().join("shared").is_dir());

        listener_b.clean().await;
        assert!(!dir.path().join("shared").exists());
    }

    #[tokio::test]
    async fn run_task_fails_cleanly_when_the_backend_stub_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config("nzb://example/a", None, None);
        let id = config.id.clone();
        let deps = test_deps(dir.path().to_path_buf()).await;
        let registry = deps.registry.clone();

        run_task(config, deps, None).await;

        assert!(registry.get(&id).await.is_none());
        assert!(!dir.path().join(id.as_str()).exists());
    }
}
