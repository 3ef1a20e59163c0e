//! Controller description: callables, their signatures and their owners.
//!
//! A controller type lists its callables once, in [`Controller::describe`].
//! Each entry carries a [`MethodSig`] with an explicit [`MethodKind`], so
//! "is this a task / happening / guard provider" is a single match on the
//! kind rather than a scan for markers.
//!
//! ```text
//! impl Controller for Door {
//!     fn describe(m: &mut TableBuilder<Self>) {
//!         m.task("open", &[], |door, _| door.open())
//!          .guard("closed", |door| door.is_closed());
//!     }
//! }
//! ```
//!
//! Arguments travel as [`serde_json::Value`]; their runtime [`ArgShape`]s
//! select an overload (see [`MethodCache`](crate::MethodCache)).

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::Value;

use crate::error::InvokeError;

/// Type-erased controller instance.
pub type Erased = dyn Any + Send + Sync;

type Body = Arc<dyn Fn(Option<&Erased>, &[Value]) -> Result<Value, InvokeError> + Send + Sync>;

/// Declared parameter type of a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
    /// Accepts any value.
    Any,
}

/// Runtime shape of an argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgShape {
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ArgShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ArgShape::Null,
            Value::Bool(_) => ArgShape::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ArgShape::Integer,
            Value::Number(_) => ArgShape::Number,
            Value::String(_) => ArgShape::String,
            Value::Array(_) => ArgShape::Array,
            Value::Object(_) => ArgShape::Object,
        }
    }

    pub fn of_all(args: &[Value]) -> Vec<ArgShape> {
        args.iter().map(ArgShape::of).collect()
    }

    /// One-to-one correspondence between shape and parameter type.
    pub fn matches_exactly(self, param: ParamType) -> bool {
        matches!(
            (self, param),
            (ArgShape::Bool, ParamType::Bool)
                | (ArgShape::Integer, ParamType::Integer)
                | (ArgShape::Number, ParamType::Number)
                | (ArgShape::String, ParamType::String)
                | (ArgShape::Array, ParamType::Array)
                | (ArgShape::Object, ParamType::Object)
        )
    }

    /// Assignment compatibility: widening and `Any`, plus null for reference-like types.
    pub fn assignable_to(self, param: ParamType) -> bool {
        if self.matches_exactly(param) || param == ParamType::Any {
            return true;
        }
        match self {
            ArgShape::Integer => param == ParamType::Number,
            ArgShape::Null => matches!(
                param,
                ParamType::String | ParamType::Array | ParamType::Object
            ),
            _ => false,
        }
    }
}

pub(crate) fn describe_shapes(shapes: &[ArgShape]) -> String {
    let inner: Vec<String> = shapes
        .iter()
        .map(|s| format!("{s:?}").to_lowercase())
        .collect();
    format!("({})", inner.join(", "))
}

/// Declared return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Unit,
    Bool,
    Value,
}

/// Whether a callable needs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receiver {
    Instance,
    Static,
}

/// Capability of a callable. Replaces marker lookups with one discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Ordinary callable, not subscribable.
    Plain,
    /// Executed by a worker loop after its permission is granted.
    Task,
    /// Triggered by outside code; synchronized around its own execution.
    Happening,
    /// Provides the value of the named guard.
    Guard(String),
}

/// Signature of a registered callable.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<ParamType>,
    pub returns: ReturnType,
    pub receiver: Receiver,
    pub kind: MethodKind,
}

impl MethodSig {
    pub fn new(name: impl Into<String>, receiver: Receiver, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ReturnType::Unit,
            receiver,
            kind,
        }
    }

    pub fn with_params(mut self, params: &[ParamType]) -> Self {
        self.params = params.to_vec();
        self
    }

    pub fn returning(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }
}

/// Identity of a callable: the owning type plus its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    type_id: TypeId,
    index: usize,
}

/// A registered callable.
pub struct Method {
    sig: MethodSig,
    id: MethodId,
    type_name: &'static str,
    body: Body,
}

impl Method {
    pub fn sig(&self) -> &MethodSig {
        &self.sig
    }

    pub fn name(&self) -> &str {
        &self.sig.name
    }

    pub fn kind(&self) -> &MethodKind {
        &self.sig.kind
    }

    pub fn is_static(&self) -> bool {
        self.sig.receiver == Receiver::Static
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    /// `Type::name` for messages.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.type_name, self.sig.name)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Invokes the callable. Static callables ignore `receiver`.
    pub(crate) fn invoke(
        &self,
        receiver: Option<&Erased>,
        args: &[Value],
    ) -> Result<Value, InvokeError> {
        let receiver = if self.is_static() { None } else { receiver };
        (self.body)(receiver, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("type", &self.type_name)
            .field("sig", &self.sig)
            .finish()
    }
}

/// Every callable of one controller type, in registration order.
#[derive(Debug)]
pub struct MethodTable {
    type_id: TypeId,
    type_name: &'static str,
    methods: Vec<Arc<Method>>,
}

impl MethodTable {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }
}

/// A type whose callables can be bound to topics.
pub trait Controller: Send + Sync + 'static {
    /// Registers the type's callables. Called at most once per type per cache.
    fn describe(methods: &mut TableBuilder<Self>)
    where
        Self: Sized;
}

/// Collects the callables of `C`.
pub struct TableBuilder<C> {
    methods: Vec<Arc<Method>>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Controller> TableBuilder<C> {
    pub(crate) fn build() -> MethodTable {
        let mut builder = Self {
            methods: Vec::new(),
            _marker: PhantomData,
        };
        C::describe(&mut builder);
        MethodTable {
            type_id: TypeId::of::<C>(),
            type_name: short_type_name::<C>(),
            methods: builder.methods,
        }
    }

    /// Registers a callable with an arbitrary signature.
    ///
    /// The body receives `Some(&C)` for instance callables and `None` for
    /// static ones.
    pub fn method<F>(&mut self, sig: MethodSig, body: F) -> &mut Self
    where
        F: Fn(Option<&C>, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let qualified = format!("{}::{}", short_type_name::<C>(), sig.name);
        let receiver_kind = sig.receiver;
        let body: Body = Arc::new(move |receiver: Option<&Erased>, args: &[Value]| {
            let receiver = match (receiver_kind, receiver) {
                (Receiver::Static, _) => None,
                (Receiver::Instance, Some(erased)) => match erased.downcast_ref::<C>() {
                    Some(c) => Some(c),
                    None => {
                        return Err(InvokeError::ReceiverMismatch {
                            method: qualified.clone(),
                        })
                    }
                },
                (Receiver::Instance, None) => {
                    return Err(InvokeError::ReceiverMismatch {
                        method: qualified.clone(),
                    })
                }
            };
            body(receiver, args).map_err(|source| InvokeError::Failed {
                method: qualified.clone(),
                source,
            })
        });
        let id = MethodId {
            type_id: TypeId::of::<C>(),
            index: self.methods.len(),
        };
        self.methods.push(Arc::new(Method {
            sig,
            id,
            type_name: short_type_name::<C>(),
            body,
        }));
        self
    }

    /// Instance task taking `params`.
    pub fn task<F>(&mut self, name: &str, params: &[ParamType], f: F) -> &mut Self
    where
        F: Fn(&C, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let sig = MethodSig::new(name, Receiver::Instance, MethodKind::Task).with_params(params);
        self.method(sig, move |c, args| {
            f(required(c)?, args)?;
            Ok(Value::Null)
        })
    }

    /// Static task taking `params`.
    pub fn static_task<F>(
        &mut self,
        name: &str,
        params: &[ParamType],
        f: F,
    ) -> &mut Self
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let sig = MethodSig::new(name, Receiver::Static, MethodKind::Task).with_params(params);
        self.method(sig, move |_, args| {
            f(args)?;
            Ok(Value::Null)
        })
    }

    /// Instance happening; its return value is handed back by the synchronizer.
    pub fn happening<F>(
        &mut self,
        name: &str,
        params: &[ParamType],
        f: F,
    ) -> &mut Self
    where
        F: Fn(&C, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let sig = MethodSig::new(name, Receiver::Instance, MethodKind::Happening)
            .with_params(params)
            .returning(ReturnType::Value);
        self.method(sig, move |c, args| f(required(c)?, args))
    }

    pub fn static_happening<F>(
        &mut self,
        name: &str,
        params: &[ParamType],
        f: F,
    ) -> &mut Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let sig = MethodSig::new(name, Receiver::Static, MethodKind::Happening)
            .with_params(params)
            .returning(ReturnType::Value);
        self.method(sig, move |_, args| f(args))
    }

    /// Instance guard provider for `guard`. The callable is named after the guard.
    pub fn guard<F>(&mut self, guard: &str, f: F) -> &mut Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        let sig = MethodSig::new(guard, Receiver::Instance, MethodKind::Guard(guard.to_string()))
            .returning(ReturnType::Bool);
        self.method(sig, move |c, _| Ok(Value::Bool(f(required(c)?))))
    }

    pub fn static_guard<F>(&mut self, guard: &str, f: F) -> &mut Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let sig = MethodSig::new(guard, Receiver::Static, MethodKind::Guard(guard.to_string()))
            .returning(ReturnType::Bool);
        self.method(sig, move |_, _| Ok(Value::Bool(f())))
    }

    /// Ordinary instance callable; resolvable but not subscribable.
    pub fn plain<F>(&mut self, name: &str, params: &[ParamType], f: F) -> &mut Self
    where
        F: Fn(&C, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let sig = MethodSig::new(name, Receiver::Instance, MethodKind::Plain)
            .with_params(params)
            .returning(ReturnType::Value);
        self.method(sig, move |c, args| f(required(c)?, args))
    }
}

fn required<C>(receiver: Option<&C>) -> anyhow::Result<&C> {
    receiver.ok_or_else(|| anyhow!("instance callable invoked without a receiver"))
}

fn short_type_name<C>() -> &'static str {
    let full = std::any::type_name::<C>();
    match full.find('<') {
        Some(generic) => full[..generic].rsplit("::").next().unwrap_or(full),
        None => full.rsplit("::").next().unwrap_or(full),
    }
}

/// Identity of an owner: the instance pointer, or the type for static owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKey {
    Instance(usize),
    Type(TypeId),
}

/// The object (or, for static callables, the type) a callable is bound to.
#[derive(Clone)]
pub struct Owner {
    instance: Option<Arc<Erased>>,
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> MethodTable,
}

impl Owner {
    /// Instance-bound owner.
    pub fn instance<C: Controller>(controller: Arc<C>) -> Self {
        let erased: Arc<Erased> = controller;
        Self {
            instance: Some(erased),
            type_id: TypeId::of::<C>(),
            type_name: short_type_name::<C>(),
            describe: TableBuilder::<C>::build,
        }
    }

    /// Type owner, for static callables.
    pub fn of_type<C: Controller>() -> Self {
        Self {
            instance: None,
            type_id: TypeId::of::<C>(),
            type_name: short_type_name::<C>(),
            describe: TableBuilder::<C>::build,
        }
    }

    pub fn is_static(&self) -> bool {
        self.instance.is_none()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn key(&self) -> OwnerKey {
        match &self.instance {
            Some(instance) => OwnerKey::Instance(Arc::as_ptr(instance) as *const () as usize),
            None => OwnerKey::Type(self.type_id),
        }
    }

    pub(crate) fn receiver(&self) -> Option<&Erased> {
        self.instance.as_deref()
    }

    pub(crate) fn describe(&self) -> MethodTable {
        (self.describe)()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("type", &self.type_name)
            .field("key", &self.key())
            .finish()
    }
}
