//! # Worker loop: permission → execute → guards → advance, forever.
//!
//! One loop per simple or complex sequential subscription.
//!
//! ```text
//! slot = 0
//! loop {
//!     AWAIT_PERMISSION  fire(permissions[slot], perennial = false)   (skipped if empty)
//!     EXECUTE           bindings[slot].execute()                     (loop's own thread)
//!     APPLY_GUARDS      set_guard(g, bindings[slot].guard_value(g))  for g in guard_groups[slot]
//!     slot = (slot + 1) % bindings.len()
//!     if slot == 0      fire(f, perennial = true)                    for f in follow_ups
//! }
//! ```
//!
//! ## Rules
//! - Every engine rejection and every controller failure is fatal: the loop
//!   returns the error and never retries.
//! - Empty permission and follow-up names are tolerated: a warning is logged
//!   and published, no engine call is made.
//! - Cancellation is observed while waiting for a permission and between
//!   steps; a cancelled loop returns `Ok(())`.
//! - The loop owns its slot index; nothing else mutates it.
//! - The loop owns one OS thread for its controller calls, so a blocked
//!   controller never delays another loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::binding::ControllerBinding;
use crate::engine::EngineRef;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEventKind};
use crate::subscription::SlotSequence;
use crate::thread::ControllerThread;
use crate::topic::Topic;

/// Outcome of waiting for a permission.
enum Gate {
    Passed,
    Cancelled,
}

/// Requests the permission gating `slot`.
pub(crate) async fn acquire_permission(
    engine: &EngineRef,
    bus: &EventBus,
    source: &str,
    topic: &Topic,
    slot: usize,
) -> Result<(), SyncError> {
    match topic.permission(slot) {
        Some(permission) => {
            debug!(source, permission, slot, "requesting permission");
            engine
                .fire_transition(permission, false)
                .await
                .map_err(|e| SyncError::Permission {
                    permission: permission.to_string(),
                    source: e,
                })?;
            bus.emit(
                source,
                SyncEventKind::PermissionGranted {
                    slot,
                    permission: permission.to_string(),
                },
            );
        }
        None => {
            warn!(source, topic = topic.name(), slot, "no permission configured; running ungated");
            bus.emit(source, SyncEventKind::PermissionSkipped { slot });
        }
    }
    Ok(())
}

/// Recomputes the guards of `slot` and pushes them to the engine.
pub(crate) async fn apply_guards(
    engine: &EngineRef,
    bus: &EventBus,
    source: &str,
    topic: &Topic,
    slot: usize,
    binding: &ControllerBinding,
) -> Result<(), SyncError> {
    for guard in topic.guards(slot) {
        let value = binding
            .guard_value(guard)
            .map_err(|e| SyncError::GuardValue {
                guard: guard.clone(),
                source: e,
            })?;
        engine
            .set_guard(guard, value)
            .await
            .map_err(|e| SyncError::GuardRejected {
                guard: guard.clone(),
                source: e,
            })?;
        debug!(source, guard = %guard, value, "guard applied");
        bus.emit(
            source,
            SyncEventKind::GuardApplied {
                guard: guard.clone(),
                value,
            },
        );
    }
    Ok(())
}

/// Fires every follow-up transition of `topic` perennially.
pub(crate) async fn fire_follow_ups(
    engine: &EngineRef,
    bus: &EventBus,
    source: &str,
    topic: &Topic,
) -> Result<(), SyncError> {
    for (position, transition) in topic.follow_ups().iter().enumerate() {
        if transition.is_empty() {
            warn!(source, topic = topic.name(), position, "empty follow-up transition skipped");
            bus.emit(source, SyncEventKind::FollowUpSkipped { position });
            continue;
        }
        engine
            .fire_transition(transition, true)
            .await
            .map_err(|e| SyncError::FollowUp {
                transition: transition.clone(),
                source: e,
            })?;
        debug!(source, transition = %transition, "follow-up fired");
        bus.emit(
            source,
            SyncEventKind::FollowUpFired {
                transition: transition.clone(),
            },
        );
    }
    Ok(())
}

/// Runs one subscription's bindings in slot order, gated by the engine.
pub struct WorkerLoop {
    id: Uuid,
    label: String,
    topic: Arc<Topic>,
    bindings: Arc<[ControllerBinding]>,
    engine: EngineRef,
    bus: EventBus,
}

impl WorkerLoop {
    pub fn new(subscription: &dyn SlotSequence, engine: EngineRef, bus: EventBus) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: subscription.label(),
            topic: subscription.topic().clone(),
            bindings: subscription.bindings().to_vec().into(),
            engine,
            bus,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs until cancelled (`Ok`) or until a step fails (`Err`).
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
        info!(worker = %self.label, id = %self.id, slots = self.bindings.len(), "worker started");
        self.bus.emit(&self.label, SyncEventKind::WorkerStarted);

        let outcome = self.cycle(&cancel).await;
        match &outcome {
            Ok(()) => {
                info!(worker = %self.label, "worker stopped");
                self.bus.emit(&self.label, SyncEventKind::WorkerStopped);
            }
            Err(e) => {
                error!(worker = %self.label, error = %e, label = e.as_label(), "worker failed");
                self.bus.emit(
                    &self.label,
                    SyncEventKind::WorkerFailed {
                        error: e.to_string(),
                    },
                );
            }
        }
        outcome
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let count = self.bindings.len();
        if count == 0 {
            warn!(worker = %self.label, "no bindings; nothing to run");
            return Ok(());
        }

        let thread = ControllerThread::spawn(&self.label).map_err(|source| {
            SyncError::ControllerThread {
                worker: self.label.clone(),
                source,
            }
        })?;

        let mut slot = 0;
        let mut cycles = 0u64;
        loop {
            if let Gate::Cancelled = self.await_permission(cancel, slot).await? {
                return Ok(());
            }
            self.execute(&thread, slot).await?;
            apply_guards(
                &self.engine,
                &self.bus,
                &self.label,
                &self.topic,
                slot,
                &self.bindings[slot],
            )
            .await?;

            slot = (slot + 1) % count;
            if slot == 0 {
                fire_follow_ups(&self.engine, &self.bus, &self.label, &self.topic).await?;
                cycles += 1;
                self.bus
                    .emit(&self.label, SyncEventKind::CycleCompleted { cycle: cycles });
            }

            if cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Drops the pending firing on cancellation; relies on the engine's
    /// cancel-safety contract (see [`CoordinationEngine::fire_transition`]).
    ///
    /// [`CoordinationEngine::fire_transition`]: crate::CoordinationEngine::fire_transition
    async fn await_permission(
        &self,
        cancel: &CancellationToken,
        slot: usize,
    ) -> Result<Gate, SyncError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(Gate::Cancelled),
            res = acquire_permission(&self.engine, &self.bus, &self.label, &self.topic, slot) => {
                res.map(|()| Gate::Passed)
            }
        }
    }

    async fn execute(&self, thread: &ControllerThread, slot: usize) -> Result<(), SyncError> {
        let binding = self.bindings[slot].clone();
        let method = binding.method().qualified_name();
        match thread.call(&method, move || binding.execute()).await {
            Ok(_) => {
                self.bus.emit(&self.label, SyncEventKind::Executed { slot });
                Ok(())
            }
            Err(e) => Err(SyncError::Execution { slot, source: e }),
        }
    }
}
