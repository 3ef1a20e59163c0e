//! Dedicated OS thread for controller calls.
//!
//! Controllers may block for as long as they like, and may block on each
//! other. Tokio's blocking pool is capped, so loops beyond the cap would queue
//! behind it; every worker loop therefore owns one of these threads for its
//! whole life. The thread exits once its handle is dropped and the current
//! call returns.

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::InvokeError;

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct ControllerThread {
    jobs: mpsc::UnboundedSender<Job>,
}

impl ControllerThread {
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(format!("turnstile:{name}"))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
            })?;
        Ok(Self { jobs })
    }

    /// Runs `call` on the thread. A panic becomes [`InvokeError::Failed`].
    pub(crate) async fn call<F>(&self, method: &str, call: F) -> Result<Value, InvokeError>
    where
        F: FnOnce() -> Result<Value, InvokeError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let panicked = method.to_string();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
                Err(InvokeError::Failed {
                    method: panicked,
                    source: anyhow!("controller panicked: {}", panic_message(&*payload)),
                })
            });
            let _ = tx.send(result);
        });

        self.jobs.send(job).map_err(|_| stopped(method))?;
        rx.await.map_err(|_| stopped(method))?
    }
}

fn stopped(method: &str) -> InvokeError {
    InvokeError::Failed {
        method: method.to_string(),
        source: anyhow!("controller thread stopped"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
