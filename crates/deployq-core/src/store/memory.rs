use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::{started_after, Commit, Store, StoreResult};
use crate::deploy::Deploy;
use crate::queue::Queue;

#[derive(Debug, Default)]
struct Channel {
    queue: Queue,
    history: Vec<Deploy>,
}

/// Process-local store. Each channel has its own lock, so channels never
/// contend with each other and a transaction holds only its channel.
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: RwLock<HashMap<String, Arc<Mutex<Channel>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, key: &str) -> Option<Arc<Mutex<Channel>>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn channel(&self, key: &str) -> Arc<Mutex<Channel>> {
        if let Some(ch) = self.existing(key) {
            return ch;
        }
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

impl Store for MemoryStore {
    fn get_queue(&self, key: &str) -> StoreResult<Queue> {
        Ok(self
            .existing(key)
            .map(|ch| ch.lock().unwrap_or_else(|e| e.into_inner()).queue.clone())
            .unwrap_or_default())
    }

    fn set_queue(&self, key: &str, queue: &Queue) -> StoreResult<()> {
        let ch = self.channel(key);
        ch.lock().unwrap_or_else(|e| e.into_inner()).queue = queue.clone();
        Ok(())
    }

    fn add_to_history(&self, key: &str, deploy: &Deploy) -> StoreResult<u64> {
        let ch = self.channel(key);
        let mut ch = ch.lock().unwrap_or_else(|e| e.into_inner());
        ch.history.push(deploy.clone());
        Ok(ch.history.len() as u64)
    }

    fn all(&self, key: &str) -> StoreResult<Vec<Deploy>> {
        Ok(self
            .existing(key)
            .map(|ch| ch.lock().unwrap_or_else(|e| e.into_inner()).history.clone())
            .unwrap_or_default())
    }

    fn since(&self, key: &str, cutoff: DateTime<Utc>) -> StoreResult<Vec<Deploy>> {
        let Some(ch) = self.existing(key) else {
            return Ok(Vec::new());
        };
        let ch = ch.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ch
            .history
            .iter()
            .filter(|d| started_after(d, cutoff))
            .cloned()
            .collect())
    }

    fn transact(&self, key: &str, f: &mut dyn FnMut(&mut Queue) -> Commit) -> StoreResult<()> {
        let ch = self.channel(key);
        let mut ch = ch.lock().unwrap_or_else(|e| e.into_inner());

        // Mutate a copy so `Commit::Nothing` really leaves the stored queue alone.
        let mut queue = ch.queue.clone();
        match f(&mut queue) {
            Commit::Nothing => {}
            Commit::Queue => ch.queue = queue,
            Commit::QueueAndHistory(deploy) => {
                ch.history.push(deploy);
                ch.queue = queue;
            }
        }
        Ok(())
    }
}
