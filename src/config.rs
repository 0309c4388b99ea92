//! Configuration types for mirror-dl

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Root configuration tree, grouped into sub-configs by concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Persistence adapter configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Upload / sink behavior
    #[serde(default)]
    pub upload: UploadConfig,
    /// Auth allowlists
    #[serde(default)]
    pub auth: AuthConfig,
    /// Download/upload gate capacities
    #[serde(default)]
    pub queue: QueueConfig,
    /// Media pipeline defaults
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// RSS feed monitor defaults
    #[serde(default)]
    pub rss: RssConfig,
    /// Backend driver configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Status Registry / progress aggregation configuration
    #[serde(default)]
    pub status: StatusConfig,
    /// Extension include/exclude filter sets
    #[serde(default)]
    pub filter: FilterConfig,
    /// Webhook and script notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Working-filesystem base directory
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            upload: UploadConfig::default(),
            auth: AuthConfig::default(),
            queue: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            rss: RssConfig::default(),
            backend: BackendConfig::default(),
            status: StatusConfig::default(),
            filter: FilterConfig::default(),
            notifications: NotificationConfig::default(),
            base_dir: default_base_dir(),
        }
    }
}

/// `DATABASE_URL`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

/// `DEFAULT_UPLOAD`, `LEECH_SPLIT_SIZE`, `INCOMPLETE_TASK_NOTIFIER`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Default upload destination when `-up` is not supplied
    #[serde(default)]
    pub default_upload: Option<String>,
    /// Split size for the chat sink (spec §4.4 stage 12)
    #[serde(default = "default_leech_split_size")]
    pub leech_split_size: u64,
    /// Whether to journal and re-notify incomplete tasks for non-owner users
    #[serde(default)]
    pub incomplete_task_notifier: bool,
    /// Exponential-backoff policy for HTTP sink uploads on transient status
    /// (spec §7: "HTTP sinks retry with exponential backoff on transient
    /// status, up to a configured cap")
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_upload: None,
            leech_split_size: default_leech_split_size(),
            incomplete_task_notifier: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential-backoff retry policy for the HTTP sink (spec §7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_retry_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,
    /// Upper bound on any single retry delay
    #[serde(default = "default_retry_max_delay", with = "duration_serde")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    #[serde(default = "default_retry_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to randomize delays to avoid thundering-herd retries
    #[serde(default = "default_retry_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay: default_retry_initial_delay(),
            max_delay: default_retry_max_delay(),
            backoff_multiplier: default_retry_backoff_multiplier(),
            jitter: default_retry_jitter(),
        }
    }
}

/// `AUTH_CHATS`, `SUDO_USERS`, `OWNER_ID`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Chat ids allowed to submit commands
    #[serde(default)]
    pub auth_chats: Vec<i64>,
    /// User ids granted elevated (sudo) commands
    #[serde(default)]
    pub sudo_users: Vec<i64>,
    /// Owner user id, always authorized
    #[serde(default)]
    pub owner_id: Option<i64>,
}

/// `QUEUE_ALL`, `DOWNLOAD_LIMIT`, `UPLOAD_LIMIT`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// When true, download and upload gates share one logical capacity counter
    #[serde(default)]
    pub queue_all: bool,
    /// Download gate capacity (0 = unbounded)
    #[serde(default)]
    pub download_limit: usize,
    /// Upload gate capacity (0 = unbounded)
    #[serde(default)]
    pub upload_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_all: false,
            download_limit: 0,
            upload_limit: 0,
        }
    }
}

/// Media pipeline defaults not overridden per-task by dispatcher flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// File collision handling during move/rename stages
    #[serde(default)]
    pub file_collision: FileCollisionAction,
    /// Number of screenshots for the `-ss` stage when the user doesn't specify a count
    #[serde(default = "default_screenshot_count")]
    pub screenshot_count: u32,
    /// Number of segments for the `-sv` sample-video stage
    #[serde(default = "default_sample_segments")]
    pub sample_segments: u32,
    /// Duration of each sample-video segment
    #[serde(default = "default_sample_duration", with = "duration_serde")]
    pub sample_segment_duration: Duration,
    /// Directory name exempted from extension filtering (spec §4.4 stage 11)
    #[serde(default = "default_thumb_dir_name")]
    pub thumb_dir_exempt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file_collision: FileCollisionAction::default(),
            screenshot_count: default_screenshot_count(),
            sample_segments: default_sample_segments(),
            sample_segment_duration: default_sample_duration(),
            thumb_dir_exempt: default_thumb_dir_name(),
        }
    }
}

/// `RSS_DELAY`, `RSS_SIZE_LIMIT`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RssConfig {
    /// Poll interval between feed checks
    #[serde(default = "default_rss_delay", with = "duration_serde")]
    pub rss_delay: Duration,
    /// Maximum item size to auto-download, in bytes (0 = unbounded)
    #[serde(default)]
    pub rss_size_limit: u64,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            rss_delay: default_rss_delay(),
            rss_size_limit: 0,
        }
    }
}

/// `TORRENT_TIMEOUT`, `INDEX_URL`, `GDRIVE_ID`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Timeout for torrent metadata fetch before giving up
    #[serde(default = "default_torrent_timeout", with = "duration_serde")]
    pub torrent_timeout: Duration,
    /// Base URL for an index mirror (file-host backend convenience)
    #[serde(default)]
    pub index_url: Option<String>,
    /// Default Google-Drive-style destination id
    #[serde(default)]
    pub gdrive_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            torrent_timeout: default_torrent_timeout(),
            index_url: None,
            gdrive_id: None,
        }
    }
}

/// `STATUS_LIMIT`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Max number of task rows rendered per status message
    #[serde(default = "default_status_limit")]
    pub status_limit: usize,
    /// Interval between progress-aggregator renders, per chat
    #[serde(default = "default_status_interval", with = "duration_serde")]
    pub status_interval: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            status_limit: default_status_limit(),
            status_interval: default_status_interval(),
        }
    }
}

/// `EXCLUDED_EXTENSIONS`, `INCLUDED_EXTENSIONS`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Extensions to delete after pipeline stages run, unless `included` is non-empty
    #[serde(default)]
    pub excluded_extensions: Vec<String>,
    /// If non-empty, only these extensions survive extension filtering
    #[serde(default)]
    pub included_extensions: Vec<String>,
}

/// Webhook and script notification configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook targets
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// Script targets
    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

/// One HTTP webhook target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL
    pub url: String,
    /// Events this webhook fires on
    pub events: Vec<WebhookEvent>,
    /// Request timeout
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
    /// Optional `Authorization` header value
    #[serde(default)]
    pub auth_header: Option<String>,
}

/// One notification script target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Path to the executable
    pub path: PathBuf,
    /// Events this script fires on
    pub events: Vec<WebhookEvent>,
    /// Execution timeout
    #[serde(default = "default_script_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Terminal events that can trigger a webhook or script (spec §4.10 ambient addition).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    /// Task reached `Finalized`
    OnFinalized,
    /// Task reached `Failed`
    OnFailed,
    /// Task was admitted and queued
    OnQueued,
}

/// How to resolve a filename collision during move/rename pipeline stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCollisionAction {
    /// Append `(1)`, `(2)`, ... until a free name is found
    #[default]
    Rename,
    /// Refuse and return an error
    Skip,
    /// Replace the existing file
    Overwrite,
}

/// Corner/placement for the `-watermark` text overlay stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    /// Top-left corner
    TopLeft,
    /// Top-right corner
    TopRight,
    /// Bottom-left corner
    BottomLeft,
    /// Bottom-right corner
    BottomRight,
    /// Centered
    Center,
}

/// Recognized keys in `UserSettings` (spec §3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserSettings {
    /// Custom thumbnail path
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// Preferred split size override
    #[serde(default)]
    pub split_size: Option<u64>,
    /// Name prefix applied during the rename stage
    #[serde(default)]
    pub prefix: Option<String>,
    /// Name suffix applied during the rename stage
    #[serde(default)]
    pub suffix: Option<String>,
    /// Upload caption template
    #[serde(default)]
    pub caption: Option<String>,
    /// Path to a per-user sync-daemon config
    #[serde(default)]
    pub rclone_config_path: Option<PathBuf>,
    /// Path to a per-user drive-API token
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    /// Default drive destination id
    #[serde(default)]
    pub gdrive_id: Option<String>,
    /// File-host upload token
    #[serde(default)]
    pub filehost_token: Option<String>,
    /// Auto-apply the user's default rename pattern
    #[serde(default)]
    pub auto_rename: bool,
    /// Filename template used when auto-rename is on
    #[serde(default)]
    pub rename_template: Option<String>,
    /// Saved ffmpeg command-template presets, keyed by name
    #[serde(default)]
    pub ffmpeg_presets: HashMap<String, Vec<String>>,
}

/// A request to update a subset of `UserSettings`, with `Option<Option<T>>`
/// so callers can distinguish "leave unset" from "clear to null" from "set".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserSettingsUpdate {
    /// Unset = leave unchanged, Some(None) = clear, Some(Some(v)) = set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<Option<PathBuf>>,
    /// See [`UserSettingsUpdate::thumbnail_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_size: Option<Option<u64>>,
    /// See [`UserSettingsUpdate::thumbnail_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Option<String>>,
    /// See [`UserSettingsUpdate::thumbnail_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<Option<String>>,
    /// See [`UserSettingsUpdate::thumbnail_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Option<String>>,
}

impl UserSettingsUpdate {
    /// Apply this update onto an existing `UserSettings`, leaving fields not
    /// present in the update untouched.
    pub fn apply(self, target: &mut UserSettings) {
        if let Some(v) = self.thumbnail_path {
            target.thumbnail_path = v;
        }
        if let Some(v) = self.split_size {
            target.split_size = v;
        }
        if let Some(v) = self.prefix {
            target.prefix = v;
        }
        if let Some(v) = self.suffix {
            target.suffix = v;
        }
        if let Some(v) = self.caption {
            target.caption = v;
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./mirror-dl")
}

fn default_database_url() -> String {
    "sqlite://mirror-dl.db".to_string()
}

fn default_leech_split_size() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

fn default_screenshot_count() -> u32 {
    4
}

fn default_sample_segments() -> u32 {
    4
}

fn default_sample_duration() -> Duration {
    Duration::from_secs(4)
}

fn default_thumb_dir_name() -> String {
    "yt-dlp-thumb".to_string()
}

fn default_rss_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_torrent_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_status_limit() -> usize {
    15
}

fn default_status_interval() -> Duration {
    Duration::from_secs(4)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.persistence.database_url,
            config.persistence.database_url
        );
    }

    #[test]
    fn duration_fields_serialize_as_integer_seconds() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["rss"]["rss_delay"].is_u64());
    }

    #[test]
    fn queue_config_defaults_to_unbounded() {
        let queue = QueueConfig::default();
        assert_eq!(queue.download_limit, 0);
        assert_eq!(queue.upload_limit, 0);
        assert!(!queue.queue_all);
    }

    #[test]
    fn user_settings_update_only_touches_present_fields() {
        let mut settings = UserSettings {
            prefix: Some("old".to_string()),
            suffix: Some("keep-me".to_string()),
            ..Default::default()
        };
        let update = UserSettingsUpdate {
            prefix: Some(Some("new".to_string())),
            ..Default::default()
        };
        update.apply(&mut settings);
        assert_eq!(settings.prefix.as_deref(), Some("new"));
        assert_eq!(settings.suffix.as_deref(), Some("keep-me"));
    }

    #[test]
    fn user_settings_update_can_clear_a_field() {
        let mut settings = UserSettings {
            caption: Some("hello".to_string()),
            ..Default::default()
        };
        let update = UserSettingsUpdate {
            caption: Some(None),
            ..Default::default()
        };
        update.apply(&mut settings);
        assert_eq!(settings.caption, None);
    }

    #[test]
    fn invalid_json_reports_a_useful_error() {
        let result: Result<Config, _> = serde_json::from_str("{\"queue\": {\"download_limit\": \"not-a-number\"}}");
        assert!(result.is_err());
    }
}
