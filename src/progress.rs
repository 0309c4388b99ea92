//! Progress Aggregation (spec §4.9).
//!
//! An aggregator task wakes every `status_interval`, snapshots the Status
//! Registry, renders one message per destination chat, and edits the
//! previous one. Per-chat edit timestamps are tracked the way a token
//! bucket tracks its balance: a cheap atomic/mutex-guarded
//! counter checked before every external call, here gating edits instead of
//! bytes so a burst of registry updates within one interval collapses into
//! a single chat edit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::Result;
use crate::registry::StatusRegistry;
use crate::types::{StatusEntry, TaskId};

/// The chat-protocol send/edit operation, a collaborator outside this
/// crate's scope (spec §1 Non-goals: "the chat-protocol client").
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new status message or edit the aggregator's previous one for
    /// this chat, returning the message id to remember for the next edit.
    async fn send_or_edit(&self, chat_id: i64, previous: Option<i64>, text: String) -> Result<i64>;
}

struct ChatState {
    last_edit: Instant,
    message_id: Option<i64>,
}

/// Renders the Status Registry into per-chat messages on a fixed cadence.
pub struct ProgressAggregator<T: ChatTransport> {
    registry: StatusRegistry,
    transport: Arc<T>,
    interval: Duration,
    task_chat: Mutex<HashMap<TaskId, i64>>,
    chat_state: Mutex<HashMap<i64, ChatState>>,
}

impl<T: ChatTransport> ProgressAggregator<T> {
    pub fn new(registry: StatusRegistry, transport: Arc<T>, interval: Duration) -> Self {
        Self {
            registry,
            transport,
            interval,
            task_chat: Mutex::new(HashMap::new()),
            chat_state: Mutex::new(HashMap::new()),
        }
    }

    /// Associate a task with the chat its status updates should render to.
    pub async fn register(&self, task_id: TaskId, chat_id: i64) {
        self.task_chat.lock().await.insert(task_id, chat_id);
    }

    /// Drop a finalized task's chat association; its last rendered message
    /// is left as-is (the caller typically sends a separate completion
    /// notice over the same chat).
    pub async fn unregister(&self, task_id: &TaskId) {
        self.task_chat.lock().await.remove(task_id);
    }

    /// Run the aggregator loop until `cancel` is signalled.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// One aggregation pass: group the registry snapshot by chat, render,
    /// and edit every chat whose rate gate currently allows it.
    pub async fn tick(&self) {
        let snapshot = self.registry.snapshot().await;
        let task_chat = self.task_chat.lock().await.clone();

        let mut by_chat: HashMap<i64, Vec<StatusEntry>> = HashMap::new();
        for entry in snapshot {
            if let Some(chat_id) = task_chat.get(&entry.id) {
                by_chat.entry(*chat_id).or_default().push(entry);
            }
        }

        for (chat_id, entries) in by_chat {
            if !self.allow_edit(chat_id).await {
                continue;
            }
            let text = render_chat_message(&entries);
            let mut states = self.chat_state.lock().await;
            let previous = states.get(&chat_id).and_then(|s| s.message_id);
            drop(states);

            match self.transport.send_or_edit(chat_id, previous, text).await {
                Ok(message_id) => {
                    self.chat_state.lock().await.insert(
                        chat_id,
                        ChatState {
                            last_edit: Instant::now(),
                            message_id: Some(message_id),
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(chat_id, error = %e, "status edit failed");
                }
            }
        }
    }

    async fn allow_edit(&self, chat_id: i64) -> bool {
        let states = self.chat_state.lock().await;
        match states.get(&chat_id) {
            Some(state) => state.last_edit.elapsed() >= self.interval,
            None => true,
        }
    }
}

/// Render one chat's active tasks into a single message body.
pub fn render_chat_message(entries: &[StatusEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        lines.push(format!(
            "{name} {bar} {percent:.0}% {speed}/s{eta}",
            name = entry.name,
            bar = progress_bar(entry.percent),
            percent = entry.percent,
            speed = readable_size(entry.speed_bps),
            eta = entry
                .eta_seconds
                .map(|s| format!(" ETA {}", readable_duration(s)))
                .unwrap_or_default(),
        ));
    }
    if lines.is_empty() {
        "No active tasks.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Ten-segment filled/empty progress bar, ported from the original bot's
/// `get_progress_bar_string`.
pub fn progress_bar(percent: f32) -> String {
    let p = percent.clamp(0.0, 100.0).round() as u32;
    let filled = (p / 10) as usize;
    format!("[{}{}]", "■".repeat(filled), "□".repeat(10 - filled))
}

/// Human-readable byte count, matching the original's `get_readable_file_size`.
pub fn readable_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut index = 0;
    while value >= 1024.0 && index < UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    format!("{:.2}{}", value, UNITS[index])
}

/// Human-readable duration, matching the original's `get_readable_time`.
pub fn readable_duration(total_seconds: u64) -> String {
    let days = total_seconds / 86400;
    let hours = (total_seconds % 86400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut result = String::new();
    if days > 0 {
        result.push_str(&format!("{days}d "));
    }
    if hours > 0 {
        result.push_str(&format!("{hours}h "));
    }
    if minutes > 0 {
        result.push_str(&format!("{minutes}m "));
    }
    result.push_str(&format!("{seconds}s"));
    result
}
