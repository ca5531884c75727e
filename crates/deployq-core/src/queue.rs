use crate::deploy::Deploy;
use crate::types::Actor;
use serde::{Deserialize, Serialize};

/// Ordered deploys for one channel. The head, once started, holds the slot;
/// everything behind it waits unstarted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub items: Vec<Deploy>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append to the tail. Deduplication by actor is the engine's job.
    pub fn add(&mut self, deploy: Deploy) {
        self.items.push(deploy);
    }

    pub fn current(&self) -> Option<&Deploy> {
        self.items.first()
    }

    pub fn pop(&mut self) -> Option<Deploy> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.remove(0))
    }

    /// Overwrite the head.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty; callers check `current()` first.
    pub fn replace_head_with(&mut self, deploy: Deploy) {
        self.items[0] = deploy;
    }

    pub fn is_user_in_queue(&self, user: &Actor) -> bool {
        self.position_of(user).is_some()
    }

    pub fn entry_for(&self, user: &Actor) -> Option<&Deploy> {
        self.position_of(user).map(|i| &self.items[i])
    }

    /// Remove the first entry owned by `user`, wherever it sits.
    ///
    /// This also matches the head. Cancelling an active deploy goes through
    /// abort instead, so callers must not use this for the slot holder.
    pub fn remove_user(&mut self, user: &Actor) -> bool {
        match self.position_of(user) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    fn position_of(&self, user: &Actor) -> Option<usize> {
        self.items.iter().position(|d| d.user.same_as(user))
    }
}
