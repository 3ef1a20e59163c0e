//! Runtime configuration.
//!
//! ```
//! use turnstile_core::RuntimeConfig;
//!
//! let mut cfg = RuntimeConfig::default();
//! cfg.max_workers = Some(16);
//! assert_eq!(cfg.bus_capacity, 1024);
//! ```

use serde::{Deserialize, Serialize};

/// Settings for [`Runtime::start`](crate::Runtime::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,
    /// Upper bound on concurrently running worker loops (`None` = unbounded).
    pub max_workers: Option<usize>,
}

impl Default for RuntimeConfig {
    /// - `bus_capacity = 1024`
    /// - `max_workers = None`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            max_workers: None,
        }
    }
}
