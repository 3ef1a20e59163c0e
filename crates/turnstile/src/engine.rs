//! Contract of the coordination engine (the Petri net).
//!
//! The engine decides when a transition may fire. Worker loops and the
//! synchronizer only ask it to fire transitions and feed it guard values;
//! which transition wins, timing and net topology stay on the engine's side.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::EngineError;

/// A transition fired by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub transition: String,
    pub perennial: bool,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait CoordinationEngine: Send + Sync {
    /// Fires `name`. May hold the caller until the transition is enabled.
    ///
    /// A perennial firing leaves the transition's permission in place for
    /// later firings.
    ///
    /// # Cancel safety
    ///
    /// Worker loops drop this future when they are cancelled while waiting.
    /// Implementations must be cancel-safe: a dropped call must either not
    /// have consumed the permission or commit it at its final `.await`, so
    /// a grant is never lost to cancellation.
    async fn fire_transition(&self, name: &str, perennial: bool) -> Result<(), EngineError>;

    /// Sets the value of the guard `name`.
    async fn set_guard(&self, name: &str, value: bool) -> Result<(), EngineError>;

    /// Stream of firings of `name`. Not used by worker loops.
    fn subscribe_to_transition_events(
        &self,
        name: &str,
    ) -> Result<broadcast::Receiver<FireEvent>, EngineError>;

    /// Token count per place. Diagnostic only.
    fn marking(&self) -> Vec<i64>;
}

pub type EngineRef = Arc<dyn CoordinationEngine>;
