//! Queue Controller (spec §4.3).
//!
//! Two independent gates — download and upload — admit tasks up to a
//! configured capacity and release them in FIFO order as slots free up.
//! `tokio::sync::Semaphore` doesn't expose strong enough ordering
//! guarantees for the FIFO invariant, so a gate keeps its own waiter queue
//! of oneshot senders instead and hands permits out in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::config::QueueConfig;
use crate::error::AdmissionError;
use crate::types::GateKind;
use crate::Result;

struct GateState {
    /// 0 means unbounded.
    capacity: usize,
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<bool>>,
    stopped: bool,
}

/// A single admission gate. Cloning shares the underlying state.
#[derive(Clone)]
pub struct Gate {
    kind: GateKind,
    inner: Arc<Mutex<GateState>>,
}

/// Proof of admission. Dropping it without calling [`Gate::release`]
/// releases the slot anyway, via a background task, so a task that panics
/// mid-flight never wedges the gate.
pub struct Ticket {
    gate: Gate,
    released: bool,
}

impl Gate {
    fn with_capacity(kind: GateKind, capacity: usize) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(GateState {
                capacity,
                in_use: 0,
                waiters: VecDeque::new(),
                stopped: false,
            })),
        }
    }

    /// Which gate this is (spec §3 `QueueGate`).
    pub fn kind(&self) -> GateKind {
        self.kind
    }

    /// Wait for a free slot. Resolves immediately if one is available, or
    /// once an earlier waiter releases, whichever comes first, in arrival
    /// order (FIFO).
    pub async fn admit(&self) -> Result<Ticket> {
        let rx = {
            let mut state = self.inner.lock().await;
            if state.stopped {
                return Err(AdmissionError::Stopped.into());
            }
            if state.capacity == 0 || state.in_use < state.capacity {
                state.in_use += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            match rx.await {
                Ok(true) => {}
                Ok(false) | Err(_) => return Err(AdmissionError::Stopped.into()),
            }
        }

        Ok(Ticket {
            gate: self.clone(),
            released: false,
        })
    }

    /// Release a slot, waking the longest-waiting queued task if any.
    pub async fn release(&self, mut ticket: Ticket) {
        ticket.released = true;
        self.release_slot().await;
    }

    async fn release_slot(&self) {
        let mut state = self.inner.lock().await;
        if let Some(tx) = state.waiters.pop_front() {
            // Slot transfers directly to the next waiter; in_use unchanged.
            let _ = tx.send(true);
        } else {
            state.in_use = state.in_use.saturating_sub(1);
        }
    }

    /// Reject all future admits and wake every current waiter with a
    /// stopped error, per spec §4.3's `stop_all`.
    pub async fn stop_all(&self) {
        let mut state = self.inner.lock().await;
        state.stopped = true;
        for tx in state.waiters.drain(..) {
            let _ = tx.send(false);
        }
    }

    /// Resume accepting admits after a `stop_all`.
    pub async fn resume(&self) {
        self.inner.lock().await.stopped = false;
    }

    /// Current in-flight count, for status rendering.
    pub async fn in_use(&self) -> usize {
        self.inner.lock().await.in_use
    }

    /// Current queue depth.
    pub async fn queued(&self) -> usize {
        self.inner.lock().await.waiters.len()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let gate = self.gate.clone();
        tokio::spawn(async move {
            gate.release_slot().await;
        });
    }
}

/// Owns the download and upload gates. When `queue_all` is set, both kinds
/// share one logical capacity counter (the pool is sized to the sum of the
/// two configured limits, or left unbounded if either is unbounded).
#[derive(Clone)]
pub struct Queue {
    download: Gate,
    upload: Gate,
}

impl Queue {
    /// Build gates from configuration (spec §5 concurrency model).
    pub fn new(config: &QueueConfig) -> Self {
        if config.queue_all {
            let capacity = if config.download_limit == 0 || config.upload_limit == 0 {
                0
            } else {
                config.download_limit + config.upload_limit
            };
            let shared = Arc::new(Mutex::new(GateState {
                capacity,
                in_use: 0,
                waiters: VecDeque::new(),
                stopped: false,
            }));
            return Self {
                download: Gate {
                    kind: GateKind::Download,
                    inner: shared.clone(),
                },
                upload: Gate {
                    kind: GateKind::Upload,
                    inner: shared,
                },
            };
        }

        Self {
            download: Gate::with_capacity(GateKind::Download, config.download_limit),
            upload: Gate::with_capacity(GateKind::Upload, config.upload_limit),
        }
    }

    /// The download admission gate.
    pub fn download(&self) -> &Gate {
        &self.download
    }

    /// The upload admission gate.
    pub fn upload(&self) -> &Gate {
        &self.upload
    }

    /// Stop both gates, e.g. on a global `stop` command.
    pub async fn stop_all(&self) {
        self.download.stop_all().await;
        // Sharing queue_all state means this is a no-op double stop, which
        // is harmless.
        self.upload.stop_all().await;
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unbounded_gate_never_blocks() {
        let gate = Gate::with_capacity(GateKind::Download, 0);
        let t1 = gate.admit().await.unwrap();
        let t2 = gate.admit().await.unwrap();
        gate.release(t1).await;
        gate.release(t2).await;
    }

    #[tokio::test]
    async fn capacity_one_serializes_admits_fifo() {
        let gate = Gate::with_capacity(GateKind::Download, 1);
        let t1 = gate.admit().await.unwrap();
        assert_eq!(gate.in_use().await, 1);

        let gate2 = gate.clone();
        let second = tokio::spawn(async move { gate2.admit().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.queued().await, 1);

        gate.release(t1).await;
        let t2 = second.await.unwrap().unwrap();
        assert_eq!(gate.in_use().await, 1);
        gate.release(t2).await;
        assert_eq!(gate.in_use().await, 0);
    }

    #[tokio::test]
    async fn stop_all_rejects_new_admits_and_wakes_waiters() {
        let gate = Gate::with_capacity(GateKind::Download, 1);
        let _t1 = gate.admit().await.unwrap();

        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move { gate2.admit().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.stop_all().await;
        assert!(waiter.await.unwrap().is_err());
        assert!(gate.admit().await.is_err());
    }

    #[tokio::test]
    async fn dropping_a_ticket_without_release_still_frees_the_slot() {
        let gate = Gate::with_capacity(GateKind::Download, 1);
        {
            let ticket = gate.admit().await.unwrap();
            drop(ticket);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.in_use().await, 0);
    }

    #[tokio::test]
    async fn queue_all_shares_capacity_across_gates() {
        let queue = Queue::new(&QueueConfig {
            queue_all: true,
            download_limit: 1,
            upload_limit: 1,
        });
        let t1 = queue.download().admit().await.unwrap();
        let t2 = queue.upload().admit().await.unwrap();
        assert_eq!(queue.download().in_use().await, 2);
        queue.download().release(t1).await;
        queue.upload().release(t2).await;
    }
}
