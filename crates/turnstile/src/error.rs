//! Error types for subscription construction and worker execution.
//!
//! - [`SubscribeError`]: construction and resolution failures. Raised
//!   synchronously by `subscribe`, `create_complex_sequential` and
//!   `append_to_complex_sequential`; never leave partial state behind.
//! - [`InvokeError`]: a controller callable (task, happening or guard) failed.
//! - [`EngineError`]: the coordination engine rejected a firing or guard update.
//! - [`SyncError`]: fatal runtime failures inside a worker loop or the
//!   synchronizer. There is no retry; the failure is handed to the supervisor.

use thiserror::Error;

/// Construction-time and resolution failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// Missing or malformed argument (empty name, instance callable without an instance, wrong kind).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The callable carries neither the task nor the happening kind.
    #[error("{type_name}::{method} is not subscribable")]
    NotSubscribable { type_name: String, method: String },

    /// No callable matched by name and argument shape, exactly or compatibly.
    #[error("no callable {type_name}::{method} accepting {shapes}")]
    NoSuchCallable {
        type_name: String,
        method: String,
        shapes: String,
    },

    /// Topic name absent from the registry.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    /// Topic exists but cannot back the requested subscription.
    #[error("topic '{topic}' is invalid: {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// Guard provider with a bad shape (parameters, return type, static mismatch, empty name).
    #[error("invalid guard provider {type_name}::{method}: {reason}")]
    InvalidGuardProvider {
        type_name: String,
        method: String,
        reason: String,
    },

    /// Two guard providers on one type share a guard name.
    #[error("duplicate guard provider '{guard}' on {type_name}")]
    DuplicateGuardProvider { type_name: String, guard: String },

    /// A guard named by the topic cannot be computed by the bound controller.
    #[error("topic '{topic}' slot {slot} needs guard '{guard}' which {type_name} does not provide")]
    MissingGuardProvider {
        topic: String,
        slot: usize,
        guard: String,
        type_name: String,
    },

    /// Append past the topic's permission count.
    #[error("topic '{topic}' has {slots} permission slot(s); cannot bind more")]
    TooManyBindings { topic: String, slots: usize },

    /// The (owner, callable) pair already backs a happening subscription.
    #[error("{type_name}::{method} is already subscribed as a happening")]
    AlreadySubscribed { type_name: String, method: String },

    /// No complex sequential subscription with this name.
    #[error("unknown complex sequential subscription '{0}'")]
    UnknownSubscription(String),

    /// A complex sequential subscription with this name already exists.
    #[error("complex sequential subscription '{0}' already exists")]
    DuplicateSubscription(String),
}

impl SubscribeError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubscribeError::InvalidArgument(_) => "invalid_argument",
            SubscribeError::NotSubscribable { .. } => "not_subscribable",
            SubscribeError::NoSuchCallable { .. } => "no_such_callable",
            SubscribeError::UnknownTopic(_) => "unknown_topic",
            SubscribeError::InvalidTopic { .. } => "invalid_topic",
            SubscribeError::InvalidGuardProvider { .. } => "invalid_guard_provider",
            SubscribeError::DuplicateGuardProvider { .. } => "duplicate_guard_provider",
            SubscribeError::MissingGuardProvider { .. } => "missing_guard_provider",
            SubscribeError::TooManyBindings { .. } => "too_many_bindings",
            SubscribeError::AlreadySubscribed { .. } => "already_subscribed",
            SubscribeError::UnknownSubscription(_) => "unknown_subscription",
            SubscribeError::DuplicateSubscription(_) => "duplicate_subscription",
        }
    }
}

/// Failure while invoking a controller callable.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InvokeError {
    /// The callable body returned an error.
    #[error("{method} failed: {source}")]
    Failed {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// The binding has no provider for this guard name.
    #[error("no guard provider for '{0}'")]
    UnknownGuard(String),

    /// A guard provider produced something other than a boolean.
    #[error("guard '{guard}' returned non-boolean {value}")]
    NotBoolean {
        guard: String,
        value: serde_json::Value,
    },

    /// The receiver handed to a callable is not of the type it was registered on.
    #[error("{method} called with a receiver of the wrong type")]
    ReceiverMismatch { method: String },
}

impl InvokeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            InvokeError::Failed { .. } => "invoke_failed",
            InvokeError::UnknownGuard(_) => "unknown_guard",
            InvokeError::NotBoolean { .. } => "guard_not_boolean",
            InvokeError::ReceiverMismatch { .. } => "receiver_mismatch",
        }
    }
}

/// Rejection reported by the coordination engine.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The transition is not enabled and the engine refuses to hold the caller.
    #[error("illegal firing of '{0}'")]
    IllegalFiring(String),

    /// The net has not been initialized.
    #[error("net not initialized")]
    NotInitialized,

    /// The engine knows no transition or guard with this name.
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

impl EngineError {
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::IllegalFiring(_) => "illegal_firing",
            EngineError::NotInitialized => "not_initialized",
            EngineError::InvalidName(_) => "invalid_name",
        }
    }
}

/// Fatal failure of a worker loop or synchronizer call.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SyncError {
    /// Engine refused to grant a permission.
    #[error("permission '{permission}' refused: {source}")]
    Permission {
        permission: String,
        #[source]
        source: EngineError,
    },

    /// Controller execution failed.
    #[error("execution of slot {slot} failed: {source}")]
    Execution {
        slot: usize,
        #[source]
        source: InvokeError,
    },

    /// Computing a guard value failed.
    #[error("guard '{guard}' could not be computed: {source}")]
    GuardValue {
        guard: String,
        #[source]
        source: InvokeError,
    },

    /// Engine refused a guard update.
    #[error("guard '{guard}' rejected: {source}")]
    GuardRejected {
        guard: String,
        #[source]
        source: EngineError,
    },

    /// Engine refused a follow-up transition.
    #[error("follow-up transition '{transition}' refused: {source}")]
    FollowUp {
        transition: String,
        #[source]
        source: EngineError,
    },

    /// Synchronizer notified about a callable without a happening subscription.
    #[error("{type_name}::{method} is not subscribed")]
    NotSubscribed { type_name: String, method: String },

    /// Resolution failure on the synchronizer path.
    #[error(transparent)]
    Resolve(#[from] SubscribeError),

    /// Worker task panicked or was aborted.
    #[error("worker '{worker}' panicked")]
    WorkerPanicked { worker: String },

    /// The pool is bounded and full.
    #[error("worker pool exhausted (max {max})")]
    PoolExhausted { max: usize },

    /// The OS refused a controller thread.
    #[error("could not start controller thread for '{worker}': {source}")]
    ControllerThread {
        worker: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SyncError::Permission { .. } => "permission_refused",
            SyncError::Execution { .. } => "execution_failed",
            SyncError::GuardValue { .. } => "guard_value_failed",
            SyncError::GuardRejected { .. } => "guard_rejected",
            SyncError::FollowUp { .. } => "follow_up_refused",
            SyncError::NotSubscribed { .. } => "not_subscribed",
            SyncError::Resolve(_) => "resolve_failed",
            SyncError::WorkerPanicked { .. } => "worker_panicked",
            SyncError::PoolExhausted { .. } => "pool_exhausted",
            SyncError::ControllerThread { .. } => "controller_thread_failed",
        }
    }
}
