//! Subscriptions tie controller bindings to a topic.
//!
//! | kind | bindings | permission slots |
//! |------|----------|------------------|
//! | [`SimpleSubscription`] | exactly 1 | exactly 1, non-empty |
//! | [`ComplexSequentialSubscription`] | 1..=slots, appended over time | at least 1 |
//! | [`HappeningSubscription`] | exactly 1 | at most 1 |
//!
//! Every insertion of a binding at slot `i` checks that the topic's guard
//! groups line up with its slots, that `i` is a slot of the topic, and that
//! the binding provides every guard of `guard_groups[i]`. A failed insertion
//! changes nothing.

use std::sync::Arc;

use crate::binding::{BindingKind, ControllerBinding};
use crate::error::SubscribeError;
use crate::topic::Topic;

/// Topic plus the bindings run in slot order by one worker loop.
pub trait SlotSequence: Send + Sync {
    /// Label used in logs and events.
    fn label(&self) -> String;

    fn topic(&self) -> &Arc<Topic>;

    fn bindings(&self) -> &[ControllerBinding];
}

/// Checks that `binding` can occupy `slot` of `topic`.
fn check_slot(
    topic: &Topic,
    slot: usize,
    binding: &ControllerBinding,
) -> Result<(), SubscribeError> {
    topic.validate()?;
    if slot >= topic.slots() {
        return Err(SubscribeError::TooManyBindings {
            topic: topic.name().to_string(),
            slots: topic.slots(),
        });
    }
    check_guard_coverage(topic, slot, binding)
}

fn check_guard_coverage(
    topic: &Topic,
    slot: usize,
    binding: &ControllerBinding,
) -> Result<(), SubscribeError> {
    match topic
        .guards(slot)
        .iter()
        .find(|guard| !binding.has_guard_provider(guard))
    {
        Some(missing) => Err(SubscribeError::MissingGuardProvider {
            topic: topic.name().to_string(),
            slot,
            guard: missing.clone(),
            type_name: binding.owner().type_name().to_string(),
        }),
        None => Ok(()),
    }
}

fn invalid_topic(topic: &Topic, reason: impl Into<String>) -> SubscribeError {
    SubscribeError::InvalidTopic {
        topic: topic.name().to_string(),
        reason: reason.into(),
    }
}

fn require_task(binding: &ControllerBinding) -> Result<(), SubscribeError> {
    if binding.kind() != BindingKind::Task {
        return Err(SubscribeError::InvalidArgument(format!(
            "{} is not a task binding",
            binding.method().qualified_name()
        )));
    }
    Ok(())
}

/// One task binding behind one permission.
#[derive(Debug, Clone)]
pub struct SimpleSubscription {
    topic: Arc<Topic>,
    binding: ControllerBinding,
}

impl SimpleSubscription {
    pub fn new(topic: Arc<Topic>, binding: ControllerBinding) -> Result<Self, SubscribeError> {
        require_task(&binding)?;
        topic.validate()?;
        if topic.slots() != 1 {
            return Err(invalid_topic(
                &topic,
                format!("needs exactly one permission slot, has {}", topic.slots()),
            ));
        }
        if topic.permission(0).is_none() {
            return Err(invalid_topic(&topic, "permission slot is empty"));
        }
        check_slot(&topic, 0, &binding)?;
        Ok(Self { topic, binding })
    }

    pub fn binding(&self) -> &ControllerBinding {
        &self.binding
    }
}

impl SlotSequence for SimpleSubscription {
    fn label(&self) -> String {
        format!(
            "{}@{}",
            self.binding.method().qualified_name(),
            self.topic.name()
        )
    }

    fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    fn bindings(&self) -> &[ControllerBinding] {
        std::slice::from_ref(&self.binding)
    }
}

/// Named sequence of task bindings, one per permission slot.
///
/// Grows from empty to full (`bindings == slots`); appending to a full
/// subscription fails.
#[derive(Debug, Clone)]
pub struct ComplexSequentialSubscription {
    name: String,
    topic: Arc<Topic>,
    bindings: Vec<ControllerBinding>,
}

impl ComplexSequentialSubscription {
    pub fn new(name: impl Into<String>, topic: Arc<Topic>) -> Result<Self, SubscribeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SubscribeError::InvalidArgument(
                "subscription name must not be empty".into(),
            ));
        }
        topic.validate()?;
        if topic.slots() == 0 {
            return Err(invalid_topic(&topic, "has no permission slots"));
        }
        Ok(Self {
            name,
            topic,
            bindings: Vec::new(),
        })
    }

    /// Binds the next free slot.
    pub fn append(&mut self, binding: ControllerBinding) -> Result<(), SubscribeError> {
        require_task(&binding)?;
        check_slot(&self.topic, self.bindings.len(), &binding)?;
        self.bindings.push(binding);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bindings.len() == self.topic.slots()
    }
}

impl SlotSequence for ComplexSequentialSubscription {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    fn bindings(&self) -> &[ControllerBinding] {
        &self.bindings
    }
}

/// One externally triggered binding behind at most one permission.
#[derive(Debug, Clone)]
pub struct HappeningSubscription {
    topic: Arc<Topic>,
    binding: ControllerBinding,
}

impl HappeningSubscription {
    pub fn new(topic: Arc<Topic>, binding: ControllerBinding) -> Result<Self, SubscribeError> {
        if binding.kind() != BindingKind::Happening {
            return Err(SubscribeError::InvalidArgument(format!(
                "{} is not a happening binding",
                binding.method().qualified_name()
            )));
        }
        topic.validate()?;
        if topic.slots() > 1 {
            return Err(invalid_topic(
                &topic,
                format!("needs at most one permission slot, has {}", topic.slots()),
            ));
        }
        check_guard_coverage(&topic, 0, &binding)?;
        Ok(Self { topic, binding })
    }

    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub fn binding(&self) -> &ControllerBinding {
        &self.binding
    }
}
