//! # mirror-dl
//!
//! Backend library for a chat-driven multi-source mirror/leech/clone bot.
//!
//! ## Design Philosophy
//!
//! - **Highly configurable** - almost every behavior can be customized
//! - **Sensible defaults** - works out of the box with zero configuration
//! - **Library-first** - no chat-protocol client, purely a Rust crate for
//!   embedding behind whatever bot framework the caller already uses
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirror_dl::{Config, MirrorEngine, run_with_shutdown};
//! use mirror_dl::sink::ChatFileTransport;
//!
//! struct MyBotTransport;
//!
//! #[async_trait::async_trait]
//! impl ChatFileTransport for MyBotTransport {
//!     async fn send_file(
//!         &self,
//!         chat_id: i64,
//!         path: &std::path::Path,
//!         caption: Option<&str>,
//!     ) -> mirror_dl::Result<String> {
//!         Ok(format!("msg://{chat_id}/{}", path.display()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let engine = MirrorEngine::new(config, Arc::new(MyBotTransport)).await?;
//!
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backend Driver Interface (spec §4.1)
pub mod backend;
/// Configuration types
pub mod config;
/// Persistence adapter
pub mod db;
/// Dispatcher / Command Surface
pub mod dispatcher;
/// Error types
pub mod error;
/// Merge Session
pub mod merge;
/// Media Pipeline
pub mod pipeline;
/// Progress Aggregation
pub mod progress;
/// Queue Controller
pub mod queue;
/// Status Registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// RSS feed monitor
pub mod rss;
/// Upload Sink Interface
pub mod sink;
/// Task Lifecycle state machine
pub mod task;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Webhook and script notifications
pub mod webhooks;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

pub use config::Config;
pub use db::Store;
pub use dispatcher::TaskConfig;
pub use error::{Error, Result, ToUserNotice};
pub use merge::MergeSessionTable;
pub use queue::Queue;
pub use registry::StatusRegistry;
pub use rss::RssMonitor;
pub use sink::ChatFileTransport;
pub use task::SameDirGroup;
pub use types::{Event, TaskId, TaskState};

/// Capacity of the process-wide event broadcast channel. Slow subscribers
/// drop the oldest events rather than backing up the senders (spec §4.9's
/// progress aggregator is one subscriber among possibly several).
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owns the shared collaborators every task touches: the persistence
/// adapter, the admission gates, the Status Registry, the open merge
/// sessions, the RSS monitor, and the event broadcast sender webhooks and
/// the progress aggregator both subscribe to. Cloning shares all of it —
/// every field is already `Clone`-cheap (an `Arc` or an `Arc`-backed
/// handle).
#[derive(Clone)]
pub struct MirrorEngine {
    /// Persistence adapter.
    pub store: Store,
    /// Process-wide event broadcast sender.
    pub event_tx: broadcast::Sender<Event>,
    /// Static configuration.
    pub config: Arc<Config>,
    /// Download/upload admission gates.
    pub queue: Queue,
    /// Live task status map.
    pub registry: StatusRegistry,
    /// Open merge sessions, keyed by owner id.
    pub merge_sessions: Arc<MergeSessionTable>,
    /// RSS feed monitor.
    pub rss: Arc<RssMonitor>,
    /// Shared HTTP client for backend/sink drivers that speak HTTP.
    pub http_client: reqwest::Client,
    /// Caller-supplied chat-protocol file-send operation.
    pub chat_transport: Arc<dyn ChatFileTransport>,
    /// Live `-m` same-directory groups, keyed by their `same_dir_key`.
    same_dir_groups: Arc<Mutex<HashMap<String, SameDirGroup>>>,
}

impl MirrorEngine {
    /// Open the configured database, run migrations, and wire up the
    /// admission gates, registry, merge sessions, and RSS monitor.
    /// `chat_transport` is the embedding application's chat-protocol
    /// file-send operation (spec §1 Non-goals: "the chat-protocol client").
    pub async fn new(config: Config, chat_transport: Arc<dyn ChatFileTransport>) -> Result<Self> {
        let store = Store::new(&config.persistence.database_url).await?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = Queue::new(&config.queue);
        let registry = StatusRegistry::new();
        let rss = Arc::new(RssMonitor::new(store.clone()));

        Ok(Self {
            store,
            event_tx,
            config: Arc::new(config),
            queue,
            registry,
            merge_sessions: Arc::new(MergeSessionTable::new()),
            rss,
            http_client: reqwest::Client::new(),
            chat_transport,
            same_dir_groups: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Admit a freshly dispatched task and spawn its lifecycle driver
    /// (spec §4.5's `admission → download → pipeline → upload → finalize`
    /// sequence), resolving or joining a [`SameDirGroup`] when the task
    /// carries a `-m` key.
    pub async fn submit(&self, config: TaskConfig) -> Result<TaskId> {
        let id = config.id.clone();

        let same_dir = match &config.same_dir_key {
            Some(key) => {
                let mut groups = self.same_dir_groups.lock().await;
                match groups.get(key) {
                    Some(group) => {
                        group.add_member(config.id.clone()).await;
                        Some(group.clone())
                    }
                    None => {
                        let group = SameDirGroup::new([config.id.clone()]);
                        groups.insert(key.clone(), group.clone());
                        Some(group)
                    }
                }
            }
            None => None,
        };

        let deps = task::ListenerDeps {
            store: self.store.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            http_client: self.http_client.clone(),
            chat_transport: self.chat_transport.clone(),
            base_dir: self.config.base_dir.clone(),
            config: self.config.clone(),
        };

        task::spawn_task(move || task::run_task(config, deps, same_dir));
        Ok(id)
    }

    /// Gracefully shut down: stop admitting new tasks on both gates, give
    /// in-flight tasks a chance to reach a terminal state, and emit a
    /// [`Event::Shutdown`] so subscribers (progress aggregator, webhooks)
    /// can flush before the process exits.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");

        self.queue.stop_all().await;
        tracing::info!("stopped admitting new tasks");

        let drain_timeout = std::time::Duration::from_secs(30);
        let wait_result = tokio::time::timeout(drain_timeout, self.wait_for_idle()).await;
        match wait_result {
            Ok(()) => tracing::info!("all tasks reached a terminal state"),
            Err(_) => tracing::warn!("timed out waiting for tasks to drain, shutting down anyway"),
        }

        let _ = self.event_tx.send(Event::Shutdown);
        tracing::info!("graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_idle(&self) {
        loop {
            if self.registry.is_empty().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Run until a termination signal arrives, then call `engine.shutdown()`.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(engine: MirrorEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT (Ctrl+C)");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
