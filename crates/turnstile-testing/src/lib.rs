//! Testing utilities for turnstile.
//!
//! - [`RecordingEngine`]: an in-memory [`CoordinationEngine`] that records
//!   every call in order and can be scripted to reject names, hold
//!   transitions, or grant permissions from a budget.
//! - [`Probe`]: a controller whose executions, guard value and failures are
//!   observable and adjustable from the test.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use turnstile_core::{
    Controller, CoordinationEngine, EngineError, FireEvent, ParamType, TableBuilder,
};

/// One call made against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Fire { transition: String, perennial: bool },
    SetGuard { guard: String, value: bool },
}

impl EngineCall {
    pub fn fire(transition: &str, perennial: bool) -> Self {
        EngineCall::Fire {
            transition: transition.to_string(),
            perennial,
        }
    }

    pub fn set_guard(guard: &str, value: bool) -> Self {
        EngineCall::SetGuard {
            guard: guard.to_string(),
            value,
        }
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<EngineCall>,
    rejections: HashMap<String, EngineError>,
    held: HashSet<String>,
    /// Non-perennial firings still granted; `None` = unlimited.
    budget: Option<usize>,
    listeners: HashMap<String, broadcast::Sender<FireEvent>>,
}

/// Scriptable in-memory engine.
#[derive(Default)]
pub struct RecordingEngine {
    script: Mutex<Script>,
    released: Notify,
    recorded: Notify,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every later firing or guard update of `name` fails with `error`.
    pub fn reject(&self, name: &str, error: EngineError) {
        self.lock().rejections.insert(name.to_string(), error);
    }

    /// Grants `n` more non-perennial firings; later callers wait for the next grant.
    pub fn limit_permissions(&self, n: usize) {
        self.lock().budget = Some(n);
        self.released.notify_waiters();
    }

    /// Holds firings of `name` until [`release`](Self::release).
    pub fn hold(&self, name: &str) {
        self.lock().held.insert(name.to_string());
    }

    pub fn release(&self, name: &str) {
        self.lock().held.remove(name);
        self.released.notify_waiters();
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Names of fired transitions, in order.
    pub fn fired(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::Fire { transition, .. } => Some(transition.clone()),
                EngineCall::SetGuard { .. } => None,
            })
            .collect()
    }

    /// Guard updates, in order.
    pub fn guard_updates(&self) -> Vec<(String, bool)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::SetGuard { guard, value } => Some((guard.clone(), *value)),
                EngineCall::Fire { .. } => None,
            })
            .collect()
    }

    pub fn count_fired(&self, transition: &str) -> usize {
        self.fired().iter().filter(|t| *t == transition).count()
    }

    /// Waits until at least `n` calls were recorded. Panics after `limit`.
    pub async fn wait_for_calls(&self, n: usize, limit: Duration) {
        let wait = async {
            loop {
                let recorded = self.recorded.notified();
                if self.lock().calls.len() >= n {
                    return;
                }
                recorded.await;
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            panic!(
                "expected {n} engine calls within {limit:?}, saw {:?}",
                self.calls()
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
        self.recorded.notify_waiters();
    }

    async fn wait_released(&self, name: &str) {
        loop {
            let released = self.released.notified();
            if !self.lock().held.contains(name) {
                return;
            }
            released.await;
        }
    }

    async fn wait_budget(&self) {
        loop {
            let granted = self.released.notified();
            if self.take_budget() {
                return;
            }
            granted.await;
        }
    }

    /// Takes one unit of permission budget; `false` when exhausted.
    fn take_budget(&self) -> bool {
        let mut script = self.lock();
        match script.budget.as_mut() {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }

    fn rejection(&self, name: &str) -> Option<EngineError> {
        self.lock().rejections.get(name).cloned()
    }
}

#[async_trait]
impl CoordinationEngine for RecordingEngine {
    async fn fire_transition(&self, name: &str, perennial: bool) -> Result<(), EngineError> {
        if let Some(err) = self.rejection(name) {
            return Err(err);
        }
        self.wait_released(name).await;
        if !perennial {
            self.wait_budget().await;
        }

        self.record(EngineCall::fire(name, perennial));
        if let Some(tx) = self.lock().listeners.get(name) {
            let _ = tx.send(FireEvent {
                transition: name.to_string(),
                perennial,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn set_guard(&self, name: &str, value: bool) -> Result<(), EngineError> {
        if let Some(err) = self.rejection(name) {
            return Err(err);
        }
        self.record(EngineCall::set_guard(name, value));
        Ok(())
    }

    fn subscribe_to_transition_events(
        &self,
        name: &str,
    ) -> Result<broadcast::Receiver<FireEvent>, EngineError> {
        let mut script = self.lock();
        let tx = script
            .listeners
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(64).0);
        Ok(tx.subscribe())
    }

    fn marking(&self) -> Vec<i64> {
        Vec::new()
    }
}

/// Controller with observable executions and an adjustable guard.
///
/// Callables: task `run()`, task `run_with(integer)`, happening `poke()`,
/// guard `ready`.
#[derive(Default)]
pub struct Probe {
    runs: AtomicUsize,
    total: AtomicUsize,
    ready: AtomicBool,
    fail: AtomicBool,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Sum of the integers passed to `run_with`.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Makes every later execution fail.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn step(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("probe told to fail");
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Controller for Probe {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("run", &[], |probe, _| probe.step())
            .task("run_with", &[ParamType::Integer], |probe, args| {
                probe.step()?;
                let by = args.first().and_then(Value::as_u64).unwrap_or(0) as usize;
                probe.total.fetch_add(by, Ordering::SeqCst);
                Ok(())
            })
            .happening("poke", &[], |probe, _| {
                probe.step()?;
                Ok(Value::from(probe.runs() as u64))
            })
            .guard("ready", |probe| probe.ready.load(Ordering::SeqCst));
    }
}
