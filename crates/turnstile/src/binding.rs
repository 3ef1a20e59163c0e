//! Controller bindings: owner + callable + bound arguments + guard providers.
//!
//! A binding is the unit of execution. It is validated once, when built, and
//! is immutable afterwards:
//!
//! - the callable must carry the requested [`BindingKind`]
//! - an instance callable needs an instance owner
//! - every guard provider on the owner's type takes no parameters, returns a
//!   boolean and, when the bound callable is static, is static itself
//! - no two guard providers share a guard name
//!
//! Any violation fails the build; nothing is kept. The guard checks run once
//! per owner type; later bindings reuse the table held by the
//! [`MethodCache`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::{GuardTable, MethodCache};
use crate::error::{InvokeError, SubscribeError};
use crate::method::{Method, MethodId, MethodKind, Owner, OwnerKey};

/// What a binding is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Run by a worker loop.
    Task,
    /// Run by outside code, synchronized through the synchronizer.
    Happening,
}

impl BindingKind {
    fn accepts(self, kind: &MethodKind) -> bool {
        matches!(
            (self, kind),
            (BindingKind::Task, MethodKind::Task) | (BindingKind::Happening, MethodKind::Happening)
        )
    }
}

/// Owner, callable, bound arguments and the owner's guard providers.
#[derive(Clone)]
pub struct ControllerBinding {
    kind: BindingKind,
    owner: Owner,
    method: Arc<Method>,
    args: Arc<[Value]>,
    guards: Arc<GuardTable>,
}

impl ControllerBinding {
    /// Builds a task binding with its bound arguments.
    pub fn task(
        cache: &MethodCache,
        owner: Owner,
        method: Arc<Method>,
        args: Vec<Value>,
    ) -> Result<Self, SubscribeError> {
        Self::build(cache, BindingKind::Task, owner, method, args)
    }

    /// Builds a happening binding. Arguments come from the outside caller.
    pub fn happening(
        cache: &MethodCache,
        owner: Owner,
        method: Arc<Method>,
    ) -> Result<Self, SubscribeError> {
        Self::build(cache, BindingKind::Happening, owner, method, Vec::new())
    }

    fn build(
        cache: &MethodCache,
        kind: BindingKind,
        owner: Owner,
        method: Arc<Method>,
        args: Vec<Value>,
    ) -> Result<Self, SubscribeError> {
        if !kind.accepts(method.kind()) {
            return Err(SubscribeError::InvalidArgument(format!(
                "{} is not a {kind:?} callable",
                method.qualified_name()
            )));
        }

        let table = cache.table_for(&owner);
        if !table.methods().iter().any(|m| m.id() == method.id()) {
            return Err(SubscribeError::InvalidArgument(format!(
                "{} does not belong to {}",
                method.qualified_name(),
                owner.type_name()
            )));
        }
        if owner.is_static() && !method.is_static() {
            return Err(SubscribeError::InvalidArgument(format!(
                "{} needs an instance owner",
                method.qualified_name()
            )));
        }

        let guards = cache.guards_for(&owner, method.is_static())?;

        Ok(Self {
            kind,
            owner,
            method,
            args: args.into(),
            guards,
        })
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Identity of the (owner, callable) pair.
    pub fn key(&self) -> (OwnerKey, MethodId) {
        (self.owner.key(), self.method.id())
    }

    pub fn has_guard_provider(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    pub fn guard_names(&self) -> impl Iterator<Item = &str> {
        self.guards.keys().map(String::as_str)
    }

    /// Computes the named guard.
    pub fn guard_value(&self, name: &str) -> Result<bool, InvokeError> {
        let provider = self
            .guards
            .get(name)
            .ok_or_else(|| InvokeError::UnknownGuard(name.to_string()))?;
        match provider.invoke(self.owner.receiver(), &[])? {
            Value::Bool(value) => Ok(value),
            other => Err(InvokeError::NotBoolean {
                guard: name.to_string(),
                value: other,
            }),
        }
    }

    /// Runs the bound callable with the bound arguments.
    pub fn execute(&self) -> Result<Value, InvokeError> {
        self.method.invoke(self.owner.receiver(), &self.args)
    }

    /// Runs the bound callable with caller-supplied arguments.
    pub(crate) fn execute_with(&self, args: &[Value]) -> Result<Value, InvokeError> {
        self.method.invoke(self.owner.receiver(), args)
    }
}

impl fmt::Debug for ControllerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerBinding")
            .field("kind", &self.kind)
            .field("method", &self.method.qualified_name())
            .field("args", &self.args)
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .finish()
    }
}
