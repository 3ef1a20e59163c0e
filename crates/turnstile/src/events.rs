//! Runtime events published by worker loops, the pool and the synchronizer.
//!
//! [`EventBus`] wraps [`tokio::sync::broadcast`]:
//! - `publish()` never blocks; events are dropped when nobody listens
//! - slow receivers observe `RecvError::Lagged(n)` and skip `n` events
//! - every event carries a global, monotonically increasing `seq`

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEventKind {
    /// The engine granted `permission` for `slot`.
    PermissionGranted { slot: usize, permission: String },
    /// `slot` has no permission configured; ran ungated.
    PermissionSkipped { slot: usize },
    /// The controller at `slot` returned.
    Executed { slot: usize },
    /// `guard` was pushed to the engine.
    GuardApplied { guard: String, value: bool },
    /// A follow-up transition fired.
    FollowUpFired { transition: String },
    /// An empty follow-up entry was skipped.
    FollowUpSkipped { position: usize },
    /// Every slot ran once.
    CycleCompleted { cycle: u64 },
    WorkerStarted,
    /// Cancelled; the only clean exit.
    WorkerStopped,
    WorkerFailed { error: String },
}

/// Event with origin, order and time.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// Worker label or `Type::callable` for happenings.
    pub source: String,
    pub kind: SyncEventKind,
}

impl SyncEvent {
    pub fn now(source: impl Into<String>, kind: SyncEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            source: source.into(),
            kind,
        }
    }

    /// True for the tolerated "nothing configured here" cases.
    pub fn is_warning(&self) -> bool {
        matches!(
            self.kind,
            SyncEventKind::PermissionSkipped { .. } | SyncEventKind::FollowUpSkipped { .. }
        )
    }
}

/// Broadcast channel for [`SyncEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Capacity is shared by all receivers and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit(&self, source: &str, kind: SyncEventKind) {
        self.publish(SyncEvent::now(source, kind));
    }

    /// Receiver for events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
