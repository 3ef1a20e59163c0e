//! # Registry: topics and every subscription made against them.
//!
//! ```text
//! add_topics(topics)
//!        │
//! subscribe(topic, owner, callable, args)
//!        ├─► MethodCache::resolve(owner, callable, shapes(args))
//!        ├─► kind = Happening ─► ControllerBinding::happening ─► HappeningSubscription
//!        │                       (one per (owner, callable); repeats are rejected)
//!        ├─► kind = Task ──────► ControllerBinding::task ─────► SimpleSubscription
//!        │                       (repeats allowed, each gets its own worker)
//!        └─► otherwise ────────► NotSubscribable
//!
//! create_complex_sequential(name, topic)
//! append_to_complex_sequential(name, owner, callable, args)
//! ```
//!
//! All validation happens here, synchronously; a failed call leaves the
//! registry exactly as it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::binding::ControllerBinding;
use crate::cache::MethodCache;
use crate::error::SubscribeError;
use crate::method::{ArgShape, Method, MethodId, MethodKind, Owner, OwnerKey};
use crate::subscription::{
    ComplexSequentialSubscription, HappeningSubscription, SimpleSubscription,
};
use crate::topic::Topic;

/// Owns topics and subscriptions.
#[derive(Debug, Default)]
pub struct Registry {
    cache: Arc<MethodCache>,
    topics: HashMap<String, Arc<Topic>>,
    simple: Vec<SimpleSubscription>,
    complex: BTreeMap<String, ComplexSequentialSubscription>,
    happenings: HashMap<(OwnerKey, MethodId), HappeningSubscription>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry sharing an existing method cache.
    pub fn with_cache(cache: Arc<MethodCache>) -> Self {
        Self {
            cache,
            ..Self::default()
        }
    }

    /// Adds topics; a name seen before is replaced.
    pub fn add_topics(&mut self, topics: impl IntoIterator<Item = Topic>) {
        for topic in topics {
            self.add_topic(topic);
        }
    }

    pub fn add_topic(&mut self, topic: Topic) {
        let name = topic.name().to_string();
        if self.topics.insert(name.clone(), Arc::new(topic)).is_some() {
            warn!(topic = %name, "topic redefined; last definition wins");
        } else {
            debug!(topic = %name, "topic added");
        }
    }

    pub fn topic(&self, name: &str) -> Option<&Arc<Topic>> {
        self.topics.get(name)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Arc<Topic>> {
        self.topics.values()
    }

    pub fn method_cache(&self) -> &Arc<MethodCache> {
        &self.cache
    }

    pub fn simple_subscriptions(&self) -> &[SimpleSubscription] {
        &self.simple
    }

    pub fn complex_sequential(&self, name: &str) -> Option<&ComplexSequentialSubscription> {
        self.complex.get(name)
    }

    /// Complex sequential subscriptions ordered by name.
    pub fn complex_sequentials(&self) -> impl Iterator<Item = &ComplexSequentialSubscription> {
        self.complex.values()
    }

    /// Happening subscription of `(owner, callable)`.
    pub fn happening(&self, owner: &Owner, method: &Method) -> Option<&HappeningSubscription> {
        self.happenings.get(&(owner.key(), method.id()))
    }

    pub fn happening_count(&self) -> usize {
        self.happenings.len()
    }

    /// Binds `owner`'s callable to `topic_name`.
    ///
    /// Happening callables become a happening subscription, task callables a
    /// new simple subscription. Anything else is not subscribable.
    pub fn subscribe(
        &mut self,
        topic_name: &str,
        owner: Owner,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), SubscribeError> {
        let topic = self.lookup_topic(topic_name)?;
        let resolved = self.resolve(&owner, method, &args)?;

        match resolved.kind() {
            MethodKind::Happening => {
                let key = (owner.key(), resolved.id());
                if self.happenings.contains_key(&key) {
                    return Err(SubscribeError::AlreadySubscribed {
                        type_name: owner.type_name().to_string(),
                        method: method.to_string(),
                    });
                }
                let binding = ControllerBinding::happening(&self.cache, owner, resolved)?;
                let subscription = HappeningSubscription::new(topic, binding)?;
                info!(
                    topic = topic_name,
                    method = %subscription.binding().method().qualified_name(),
                    "happening subscribed"
                );
                self.happenings.insert(key, subscription);
            }
            MethodKind::Task => {
                let binding = ControllerBinding::task(&self.cache, owner, resolved, args)?;
                let key = binding.key();
                if self.simple.iter().any(|s| s.binding().key() == key) {
                    debug!(
                        method = %binding.method().qualified_name(),
                        "callable already backs another simple subscription; it will run concurrently"
                    );
                }
                let subscription = SimpleSubscription::new(topic, binding)?;
                info!(
                    topic = topic_name,
                    method = %subscription.binding().method().qualified_name(),
                    "task subscribed"
                );
                self.simple.push(subscription);
            }
            MethodKind::Plain | MethodKind::Guard(_) => {
                return Err(SubscribeError::NotSubscribable {
                    type_name: owner.type_name().to_string(),
                    method: method.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Creates an empty complex sequential subscription named `name`.
    pub fn create_complex_sequential(
        &mut self,
        name: &str,
        topic_name: &str,
    ) -> Result<(), SubscribeError> {
        if name.is_empty() {
            return Err(SubscribeError::InvalidArgument(
                "subscription name must not be empty".into(),
            ));
        }
        let topic = self.lookup_topic(topic_name)?;
        if self.complex.contains_key(name) {
            return Err(SubscribeError::DuplicateSubscription(name.to_string()));
        }
        let subscription = ComplexSequentialSubscription::new(name, topic)?;
        info!(subscription = name, topic = topic_name, "complex sequential created");
        self.complex.insert(name.to_string(), subscription);
        Ok(())
    }

    /// Binds `owner`'s task callable to the next free slot of `name`.
    pub fn append_to_complex_sequential(
        &mut self,
        name: &str,
        owner: Owner,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), SubscribeError> {
        let resolved = self.resolve(&owner, method, &args)?;
        if *resolved.kind() != MethodKind::Task {
            return Err(SubscribeError::InvalidArgument(format!(
                "{} is not a task callable",
                resolved.qualified_name()
            )));
        }
        if !self.complex.contains_key(name) {
            return Err(SubscribeError::UnknownSubscription(name.to_string()));
        }
        let binding = ControllerBinding::task(&self.cache, owner, resolved, args)?;
        let subscription = self
            .complex
            .get_mut(name)
            .ok_or_else(|| SubscribeError::UnknownSubscription(name.to_string()))?;
        subscription.append(binding)?;
        debug!(subscription = name, slot = subscription.len() - 1, "binding appended");
        Ok(())
    }

    fn lookup_topic(&self, topic_name: &str) -> Result<Arc<Topic>, SubscribeError> {
        if topic_name.is_empty() {
            return Err(SubscribeError::InvalidArgument(
                "topic name must not be empty".into(),
            ));
        }
        self.topics
            .get(topic_name)
            .cloned()
            .ok_or_else(|| SubscribeError::UnknownTopic(topic_name.to_string()))
    }

    fn resolve(
        &self,
        owner: &Owner,
        method: &str,
        args: &[Value],
    ) -> Result<Arc<Method>, SubscribeError> {
        let shapes = ArgShape::of_all(args);
        if owner.is_static() {
            self.cache.resolve_static(owner, method, &shapes)
        } else {
            self.cache.resolve(owner, method, &shapes)
        }
    }
}
