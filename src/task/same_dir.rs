//! `SameDirGroup` (spec §3): tasks submitted with `-m` share one destination
//! directory and are uploaded together once every member finishes
//! downloading. Per the Open Question decision recorded in DESIGN.md, a
//! member that fails or is cancelled dissolves only its own membership —
//! survivors proceed independently — and whichever member finalizes first
//! claims ownership of the shared directory's cleanup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::types::TaskId;

/// Shared handle; clone freely, all clones see the same membership.
#[derive(Clone)]
pub struct SameDirGroup {
    members: Arc<Mutex<HashSet<TaskId>>>,
    cleanup_claimed: Arc<AtomicBool>,
    pipeline_owner_claimed: Arc<AtomicBool>,
    pipeline_result: Arc<watch::Sender<Option<Result<(), String>>>>,
}

impl SameDirGroup {
    /// Start a new group with its initial members.
    pub fn new(initial: impl IntoIterator<Item = TaskId>) -> Self {
        let (pipeline_result, _) = watch::channel(None);
        Self {
            members: Arc::new(Mutex::new(initial.into_iter().collect())),
            cleanup_claimed: Arc::new(AtomicBool::new(false)),
            pipeline_owner_claimed: Arc::new(AtomicBool::new(false)),
            pipeline_result: Arc::new(pipeline_result),
        }
    }

    /// Current member count.
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether the group has no members left.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Remove a failed or cancelled task from the group; the rest continue.
    pub async fn drop_member(&self, id: &TaskId) {
        self.members.lock().await.remove(id);
    }

    /// Join an already-running group, e.g. a later `-m` task dispatched
    /// against the same key after the group was first formed.
    pub async fn add_member(&self, id: TaskId) {
        self.members.lock().await.insert(id);
    }

    /// Whether every remaining member has finished downloading and the
    /// group is ready to move into the shared upload step.
    pub async fn all_remaining_are(&self, ready: &HashSet<TaskId>) -> bool {
        let members = self.members.lock().await;
        members.iter().all(|id| ready.contains(id))
    }

    /// Attempt to claim ownership of the shared directory's cleanup. Only
    /// the first caller across the group's lifetime succeeds.
    pub fn try_claim_cleanup(&self) -> bool {
        self.cleanup_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Attempt to claim ownership of the shared directory's single pipeline
    /// run. Only the first caller across the group's lifetime succeeds; the
    /// rest should call [`SameDirGroup::wait_for_pipeline`] instead of
    /// running the pipeline stage themselves.
    pub fn try_claim_pipeline_owner(&self) -> bool {
        self.pipeline_owner_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Called by the pipeline owner once its run finishes, waking every
    /// member parked in `wait_for_pipeline`.
    pub fn signal_pipeline_done(&self, result: Result<(), String>) {
        let _ = self.pipeline_result.send(Some(result));
    }

    /// Block until the pipeline owner signals completion, returning its
    /// result. Callers that lost `try_claim_pipeline_owner` use this instead
    /// of re-running the pipeline over the same shared directory.
    pub async fn wait_for_pipeline(&self) -> Result<(), String> {
        let mut rx = self.pipeline_result.subscribe();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err("pipeline owner dropped before signaling".to_string());
            }
        }
    }
}
