//! # Synchronizer for happenings: controllers invoked by outside code.
//!
//! Outside code brackets a happening callable with two notifications:
//!
//! ```text
//! on_before_execution(target, callable)  ─► fire(permission, perennial = false)
//!          target.callable(args)
//! on_after_execution(target, callable)   ─► set_guard(g, value) for g in guard_groups[0]
//!                                         ─► fire(f, perennial = true) for f in follow_ups
//! ```
//!
//! [`Synchronizer::invoke`] does all three in order. Failures follow the
//! worker loop rules: engine rejections and controller errors are fatal for
//! the call, empty names only warn. Notifications about a callable without a
//! happening subscription fail with [`SyncError::NotSubscribed`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::EngineRef;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEventKind};
use crate::method::{ArgShape, Owner};
use crate::registry::Registry;
use crate::subscription::HappeningSubscription;
use crate::thread::ControllerThread;
use crate::worker::{acquire_permission, apply_guards, fire_follow_ups};

/// Reacts to before/after notifications of happening callables.
#[derive(Clone)]
pub struct Synchronizer {
    registry: Arc<Registry>,
    engine: EngineRef,
    bus: EventBus,
}

impl Synchronizer {
    pub fn new(registry: Arc<Registry>, engine: EngineRef, bus: EventBus) -> Self {
        Self {
            registry,
            engine,
            bus,
        }
    }

    /// Acquires the happening's permission, if it has one.
    pub async fn on_before_execution(
        &self,
        target: &Owner,
        method: &str,
        args: &[Value],
    ) -> Result<(), SyncError> {
        let subscription = self.lookup(target, method, args)?;
        let source = subscription.binding().method().qualified_name();
        let topic = subscription.topic();
        if topic.slots() == 0 {
            warn!(source = %source, topic = topic.name(), "happening has no permission; running ungated");
            self.bus
                .emit(&source, SyncEventKind::PermissionSkipped { slot: 0 });
            return Ok(());
        }
        acquire_permission(&self.engine, &self.bus, &source, topic, 0).await
    }

    /// Pushes the happening's guards, then fires its follow-up transitions.
    pub async fn on_after_execution(
        &self,
        target: &Owner,
        method: &str,
        args: &[Value],
    ) -> Result<(), SyncError> {
        let subscription = self.lookup(target, method, args)?;
        let source = subscription.binding().method().qualified_name();
        let topic = subscription.topic();
        apply_guards(
            &self.engine,
            &self.bus,
            &source,
            topic,
            0,
            subscription.binding(),
        )
        .await?;
        fire_follow_ups(&self.engine, &self.bus, &source, topic).await
    }

    /// Runs `target.method(args)` between the before and after notifications.
    ///
    /// The callable runs on a thread of its own, released when it returns.
    /// When the callable fails, the after notification is not delivered.
    pub async fn invoke(
        &self,
        target: &Owner,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, SyncError> {
        self.on_before_execution(target, method, &args).await?;

        let binding = self.lookup(target, method, &args)?.binding().clone();
        let qualified = binding.method().qualified_name();
        let thread =
            ControllerThread::spawn(&qualified).map_err(|source| SyncError::ControllerThread {
                worker: qualified.clone(),
                source,
            })?;
        let call_args = args.clone();
        let value = thread
            .call(&qualified, move || binding.execute_with(&call_args))
            .await
            .map_err(|e| SyncError::Execution { slot: 0, source: e })?;
        debug!(source = %qualified, "happening executed");
        self.bus.emit(&qualified, SyncEventKind::Executed { slot: 0 });

        self.on_after_execution(target, method, &args).await?;
        Ok(value)
    }

    fn lookup(
        &self,
        target: &Owner,
        method: &str,
        args: &[Value],
    ) -> Result<&HappeningSubscription, SyncError> {
        let cache = self.registry.method_cache();
        let shapes = ArgShape::of_all(args);
        let resolved = if target.is_static() {
            cache.resolve_static(target, method, &shapes)?
        } else {
            cache.resolve(target, method, &shapes)?
        };
        self.registry
            .happening(target, &resolved)
            .ok_or_else(|| SyncError::NotSubscribed {
                type_name: target.type_name().to_string(),
                method: method.to_string(),
            })
    }
}
