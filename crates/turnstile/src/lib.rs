//! # Turnstile
//!
//! Permission-gated execution of independently written controllers against a
//! shared coordination engine (a Petri net).
//!
//! ## Core Concepts
//!
//! Turnstile separates **who may run** from **what runs**:
//! - The [`CoordinationEngine`] decides when a transition may fire
//! - A [`Controller`] does the work and reports boolean guards back
//!
//! A [`Topic`] names the permissions a controller waits for, the guards it
//! recomputes afterwards and the follow-up transitions fired once a cycle
//! completes. Subscriptions bind controllers to topics.
//!
//! ## Architecture
//!
//! ```text
//! Registry.add_topics()
//!     │
//!     ▼ subscribe() / create_complex_sequential() / append_to_complex_sequential()
//! Registry ──────────────────────────────────────────────┐
//!     │                                                  │
//!     ▼ Runtime::start()                                 │
//! WorkerPool                                             │
//!     │                                                  │
//!     ├─► WorkerLoop (Simple)                            │
//!     │      fire(permission) ─► execute ─► set_guard    │
//!     │                                                  │
//!     └─► WorkerLoop (ComplexSequential)                 │
//!            slot 0 ─► slot 1 ─► ... ─► follow-ups ─┐    │
//!              ▲                                    │    │
//!              └────────────────────────────────────┘    │
//!                                                        │
//! Outside code ─► Synchronizer ◄─────────────────────────┘
//!                   before: fire(permission)
//!                   after:  set_guard ─► follow-ups
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Permission before execution** - a slot's controller runs only after
//!    the engine granted its permission (or the slot has none)
//! 2. **Guards after execution** - guards are recomputed from the controller
//!    that just ran and pushed before the next slot is considered
//! 3. **Validated at subscribe time** - arity, guard coverage and guard
//!    provider shape are checked once; a failed subscribe changes nothing
//! 4. **One happening per (owner, callable)** - repeated task subscriptions
//!    are allowed, repeated happenings are not
//! 5. **Fatal means fatal** - an engine rejection or controller error stops
//!    the worker loop; nothing is retried
//!
//! ## Guarantees
//!
//! - Each worker loop's steps are strictly sequential
//! - Each worker loop runs its controllers on a dedicated OS thread
//! - No ordering between worker loops beyond what the engine enforces
//! - Nothing is persisted across restarts
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use turnstile_core::{args, Controller, Owner, Registry, Runtime, RuntimeConfig, TableBuilder, Topic};
//!
//! #[derive(Default)]
//! struct Oven {
//!     hot: AtomicBool,
//! }
//!
//! impl Controller for Oven {
//!     fn describe(m: &mut TableBuilder<Self>) {
//!         m.task("preheat", &[], |oven, _| {
//!             oven.hot.store(true, Ordering::SeqCst);
//!             Ok(())
//!         })
//!         .guard("hot", |oven| oven.hot.load(Ordering::SeqCst));
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.add_topics([Topic::new("bake")
//!     .with_permissions(["start_preheat"])
//!     .with_guard_groups([["hot"]])
//!     .with_follow_ups(["preheated"])]);
//! registry.subscribe("bake", Owner::instance(Arc::new(Oven::default())), "preheat", args![])?;
//!
//! let handle = Runtime::start(registry, engine, RuntimeConfig::default())?;
//! ```

mod binding;
mod cache;
mod config;
mod engine;
mod error;
mod events;
mod macros;
mod method;
mod pool;
mod registry;
mod runtime;
mod subscription;
mod synchronizer;
mod thread;
mod topic;
mod worker;

// Re-export controller description types
pub use method::{
    ArgShape, Controller, Method, MethodId, MethodKind, MethodSig, MethodTable, Owner, OwnerKey,
    ParamType, Receiver, ReturnType, TableBuilder,
};

// Re-export resolution
pub use cache::MethodCache;

// Re-export configuration records
pub use config::RuntimeConfig;
pub use topic::{GuardGroup, Topic};

// Re-export bindings and subscriptions
pub use binding::{BindingKind, ControllerBinding};
pub use subscription::{
    ComplexSequentialSubscription, HappeningSubscription, SimpleSubscription, SlotSequence,
};

// Re-export registry
pub use registry::Registry;

// Re-export engine contract
pub use engine::{CoordinationEngine, EngineRef, FireEvent};

// Re-export error types
pub use error::{EngineError, InvokeError, SubscribeError, SyncError};

// Re-export execution types
pub use events::{EventBus, SyncEvent, SyncEventKind};
pub use pool::{WorkerExit, WorkerPool};
pub use runtime::{Runtime, RuntimeHandle};
pub use synchronizer::Synchronizer;
pub use worker::WorkerLoop;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
