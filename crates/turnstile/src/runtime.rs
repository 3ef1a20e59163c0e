//! # Runtime: freezes a registry and starts its worker loops.
//!
//! ```text
//! Registry (built, validated)
//!     │
//!     ▼ Runtime::start(registry, engine, config)
//! Arc<Registry> ──┬─► SimpleSubscription[i]            ─► WorkerLoop ─► WorkerPool
//!                 ├─► ComplexSequentialSubscription[j] ─► WorkerLoop ─► WorkerPool
//!                 └─► HappeningSubscription[k]         ─► Synchronizer (on demand)
//! ```
//!
//! The returned [`RuntimeHandle`] owns the pool. Dropping it cancels every
//! loop; [`RuntimeHandle::shutdown`] also waits for them.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::engine::EngineRef;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::pool::{WorkerExit, WorkerPool};
use crate::registry::Registry;
use crate::subscription::SlotSequence;
use crate::synchronizer::Synchronizer;
use crate::worker::WorkerLoop;

/// Entry point.
pub struct Runtime;

impl Runtime {
    /// Spawns one worker loop per simple and per non-empty complex
    /// sequential subscription. Must be called inside a tokio runtime.
    pub fn start(
        registry: Registry,
        engine: EngineRef,
        config: RuntimeConfig,
    ) -> Result<RuntimeHandle, SyncError> {
        let registry = Arc::new(registry);
        let bus = EventBus::new(config.bus_capacity);
        let mut pool = WorkerPool::new(config.max_workers);

        let mut sequences: Vec<&dyn SlotSequence> = Vec::new();
        for simple in registry.simple_subscriptions() {
            sequences.push(simple);
        }
        for complex in registry.complex_sequentials() {
            if complex.is_empty() {
                warn!(subscription = complex.name(), "complex sequential has no bindings; not started");
                continue;
            }
            sequences.push(complex);
        }

        for sequence in sequences {
            pool.spawn(WorkerLoop::new(sequence, engine.clone(), bus.clone()))?;
        }
        info!(
            workers = pool.len(),
            happenings = registry.happening_count(),
            "runtime started"
        );

        let synchronizer = Synchronizer::new(registry.clone(), engine, bus.clone());
        Ok(RuntimeHandle {
            registry,
            pool,
            synchronizer,
            bus,
        })
    }
}

/// Running runtime.
pub struct RuntimeHandle {
    registry: Arc<Registry>,
    pool: WorkerPool,
    synchronizer: Synchronizer,
    bus: EventBus,
}

impl RuntimeHandle {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Number of worker loops not yet joined.
    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Next worker loop to end, with its outcome.
    pub async fn join_next(&mut self) -> Option<WorkerExit> {
        self.pool.join_next().await
    }

    /// Cancels every worker loop and waits for all of them.
    pub async fn shutdown(self) -> Vec<WorkerExit> {
        self.pool.shutdown().await
    }
}
