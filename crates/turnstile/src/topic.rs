//! Topics: named permission slots, guard groups and follow-up transitions.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::SubscribeError;

/// Guard names recomputed after one slot's controller runs.
pub type GuardGroup = SmallVec<[String; 4]>;

/// Immutable topic definition.
///
/// `permissions[i]` gates the controller bound at slot `i`; an empty entry
/// means no gate. `guard_groups`, when non-empty, has one group per slot.
/// `follow_ups` fire once each time every slot has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    name: String,
    permissions: Vec<String>,
    follow_ups: Vec<String>,
    guard_groups: Vec<GuardGroup>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
            follow_ups: Vec::new(),
            guard_groups: Vec::new(),
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_follow_ups<I, S>(mut self, follow_ups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.follow_ups = follow_ups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_guard_groups<I, G, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guard_groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(Into::into).collect())
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn follow_ups(&self) -> &[String] {
        &self.follow_ups
    }

    pub fn guard_groups(&self) -> &[GuardGroup] {
        &self.guard_groups
    }

    /// Number of permission slots.
    pub fn slots(&self) -> usize {
        self.permissions.len()
    }

    /// Permission gating `slot`, `None` when the slot is ungated or out of range.
    pub fn permission(&self, slot: usize) -> Option<&str> {
        self.permissions
            .get(slot)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Guards recomputed after `slot` runs; empty when none are configured.
    pub fn guards(&self, slot: usize) -> &[String] {
        self.guard_groups
            .get(slot)
            .map(|g| g.as_slice())
            .unwrap_or(&[])
    }

    /// Guard groups, if any are given, must line up with the permission slots.
    pub fn validate(&self) -> Result<(), SubscribeError> {
        if !self.guard_groups.is_empty() && self.guard_groups.len() != self.permissions.len() {
            return Err(SubscribeError::InvalidTopic {
                topic: self.name.clone(),
                reason: format!(
                    "{} guard group(s) for {} permission slot(s)",
                    self.guard_groups.len(),
                    self.permissions.len()
                ),
            });
        }
        Ok(())
    }
}
