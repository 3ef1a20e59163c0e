//! Memoized callable resolution.
//!
//! Three maps, all safe under concurrent first access:
//! - `TypeId → MethodTable`, filled by running `Controller::describe` once.
//! - `(TypeId, static-only, name, shapes) → Method`, filled on the first
//!   successful resolution. Failures are not cached.
//! - `(TypeId, static binding) → guard table`, validated once per type and
//!   shared by every binding built against it.
//!
//! Resolution is pure, so two callers racing on the same key compute the same
//! answer; the `entry` API keeps the first one.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::SubscribeError;
use crate::method::{describe_shapes, ArgShape, Method, MethodKind, MethodTable, Owner, ReturnType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResolveKey {
    type_id: TypeId,
    static_only: bool,
    name: String,
    shapes: Vec<ArgShape>,
}

/// Guard name → provider callable of one owner type.
pub(crate) type GuardTable = HashMap<String, Arc<Method>>;

/// Resolves `(owner, name, argument shapes)` to a callable.
#[derive(Debug, Default)]
pub struct MethodCache {
    tables: DashMap<TypeId, Arc<MethodTable>>,
    resolved: DashMap<ResolveKey, Arc<Method>>,
    guards: DashMap<(TypeId, bool), Arc<GuardTable>>,
}

impl MethodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callable table of the owner's type, built on first use.
    pub fn table_for(&self, owner: &Owner) -> Arc<MethodTable> {
        self.tables
            .entry(owner.type_id())
            .or_insert_with(|| Arc::new(owner.describe()))
            .clone()
    }

    /// Resolves among every callable of the owner's type.
    pub fn resolve(
        &self,
        owner: &Owner,
        name: &str,
        shapes: &[ArgShape],
    ) -> Result<Arc<Method>, SubscribeError> {
        self.lookup(owner, name, shapes, false)
    }

    /// Resolves among the static callables of the owner's type only.
    pub fn resolve_static(
        &self,
        owner_type: &Owner,
        name: &str,
        shapes: &[ArgShape],
    ) -> Result<Arc<Method>, SubscribeError> {
        self.lookup(owner_type, name, shapes, true)
    }

    /// Validated guard providers of the owner's type.
    ///
    /// `static_binding` is true when the bound callable is static; its guard
    /// providers must then be static too. Only valid tables are cached.
    pub(crate) fn guards_for(
        &self,
        owner: &Owner,
        static_binding: bool,
    ) -> Result<Arc<GuardTable>, SubscribeError> {
        let key = (owner.type_id(), static_binding);
        if let Some(hit) = self.guards.get(&key) {
            return Ok(hit.clone());
        }

        let table = self.table_for(owner);
        let mut guards = GuardTable::new();
        for provider in table.methods() {
            let MethodKind::Guard(guard) = provider.kind() else {
                continue;
            };
            check_guard_provider(provider, guard, static_binding)?;
            if guards.insert(guard.clone(), provider.clone()).is_some() {
                return Err(SubscribeError::DuplicateGuardProvider {
                    type_name: table.type_name().to_string(),
                    guard: guard.clone(),
                });
            }
        }
        trace!(type_name = table.type_name(), guards = guards.len(), "guard table built");

        Ok(self.guards.entry(key).or_insert_with(|| Arc::new(guards)).clone())
    }

    /// Number of memoized resolutions.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    fn lookup(
        &self,
        owner: &Owner,
        name: &str,
        shapes: &[ArgShape],
        static_only: bool,
    ) -> Result<Arc<Method>, SubscribeError> {
        if name.is_empty() {
            return Err(SubscribeError::InvalidArgument(
                "callable name must not be empty".into(),
            ));
        }

        let key = ResolveKey {
            type_id: owner.type_id(),
            static_only,
            name: name.to_string(),
            shapes: shapes.to_vec(),
        };
        if let Some(hit) = self.resolved.get(&key) {
            return Ok(hit.clone());
        }

        let table = self.table_for(owner);
        let method = find(&table, name, shapes, static_only).ok_or_else(|| {
            SubscribeError::NoSuchCallable {
                type_name: table.type_name().to_string(),
                method: name.to_string(),
                shapes: describe_shapes(shapes),
            }
        })?;
        trace!(method = %method.qualified_name(), "resolved callable");

        Ok(self.resolved.entry(key).or_insert(method).clone())
    }
}

fn check_guard_provider(
    provider: &Method,
    guard: &str,
    controller_is_static: bool,
) -> Result<(), SubscribeError> {
    let reason = if guard.is_empty() {
        Some("guard name is empty")
    } else if !provider.sig().params.is_empty() {
        Some("guard providers take no parameters")
    } else if provider.sig().returns != ReturnType::Bool {
        Some("guard providers must return a boolean")
    } else if controller_is_static && !provider.is_static() {
        Some("a static controller needs static guard providers")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SubscribeError::InvalidGuardProvider {
            type_name: provider.type_name().to_string(),
            method: provider.name().to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Exact parameter match first, then the first assignment-compatible candidate.
fn find(
    table: &MethodTable,
    name: &str,
    shapes: &[ArgShape],
    static_only: bool,
) -> Option<Arc<Method>> {
    let candidates = || {
        table.methods().iter().filter(move |m| {
            m.name() == name
                && m.sig().params.len() == shapes.len()
                && (!static_only || m.is_static())
        })
    };

    let exact = candidates().find(|m| {
        m.sig()
            .params
            .iter()
            .zip(shapes)
            .all(|(param, shape)| shape.matches_exactly(*param))
    });
    if let Some(m) = exact {
        return Some(m.clone());
    }

    candidates()
        .find(|m| {
            m.sig()
                .params
                .iter()
                .zip(shapes)
                .all(|(param, shape)| shape.assignable_to(*param))
        })
        .cloned()
}
