//! # Worker pool: one dedicated task per worker loop.
//!
//! Every `spawn` gets its own tokio task immediately; there is no queue. With
//! `max_workers = None` the pool grows without bound, one task per
//! subscription, and never shrinks. A bound caps the loops still running;
//! the spawn past it fails with [`SyncError::PoolExhausted`]. A loop that
//! ended frees its place at once, whether or not it was joined yet.
//!
//! Each loop receives a child of the pool's [`CancellationToken`], so
//! `shutdown()` stops them all; `join_next()` hands each finished loop's
//! outcome to the supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::worker::WorkerLoop;

/// How a worker loop ended.
#[derive(Debug)]
pub struct WorkerExit {
    pub id: Uuid,
    pub label: String,
    /// `Ok` after cancellation, `Err` on a fatal failure.
    pub outcome: Result<(), SyncError>,
}

/// Owns the running worker loops.
pub struct WorkerPool {
    token: CancellationToken,
    set: JoinSet<WorkerExit>,
    max_workers: Option<usize>,
    spawned: usize,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(max_workers: Option<usize>) -> Self {
        Self {
            token: CancellationToken::new(),
            set: JoinSet::new(),
            max_workers,
            spawned: 0,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts `worker` on a dedicated task. Must be called inside a tokio runtime.
    pub fn spawn(&mut self, worker: WorkerLoop) -> Result<Uuid, SyncError> {
        if let Some(max) = self.max_workers {
            if self.live() >= max {
                warn!(worker = worker.label(), max, "worker pool exhausted");
                return Err(SyncError::PoolExhausted { max });
            }
        }

        let id = worker.id();
        let label = worker.label().to_string();
        let cancel = self.token.child_token();
        let live = LiveGuard::enter(&self.live);
        self.set.spawn(async move {
            let _live = live;
            let outcome = worker.run(cancel).await;
            WorkerExit { id, label, outcome }
        });
        self.spawned += 1;
        info!(worker_id = %id, running = self.live(), "worker spawned");
        Ok(id)
    }

    /// Loops still running. Ended loops drop out before they are joined.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Loops still running or not yet joined.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Loops spawned over the pool's lifetime.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Waits for the next loop to end. `None` when no loop is left.
    pub async fn join_next(&mut self) -> Option<WorkerExit> {
        let joined = self.set.join_next().await?;
        Some(joined.unwrap_or_else(|join| WorkerExit {
            id: Uuid::nil(),
            label: String::from("<unknown>"),
            outcome: Err(SyncError::WorkerPanicked {
                worker: join.to_string(),
            }),
        }))
    }

    /// Cancels every loop and waits for all of them.
    pub async fn shutdown(mut self) -> Vec<WorkerExit> {
        self.token.cancel();
        let mut exits = Vec::with_capacity(self.set.len());
        while let Some(exit) = self.join_next().await {
            exits.push(exit);
        }
        info!(stopped = exits.len(), "worker pool shut down");
        exits
    }
}

/// Counts one running loop; released when the loop's task ends or is aborted.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
