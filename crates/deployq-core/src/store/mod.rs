//! Persistence port for channel queues and deploy history.
//!
//! Two interchangeable backends implement [`Store`]:
//! [`MemoryStore`] for tests and ephemeral runs, and [`RedbStore`] for a
//! durable single-file database. All queue mutations go through
//! [`Store::transact`], which runs the read, the mutation and the write for
//! one channel as a single atomic step.

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{StoreBackend, StoreConfig};
use crate::deploy::Deploy;
use crate::error::StoreError;
use crate::queue::Queue;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What a [`Store::transact`] mutation asks the store to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// Leave the stored queue untouched.
    Nothing,
    /// Overwrite the stored queue with the mutated one.
    Queue,
    /// Append a finished deploy to history and overwrite the queue, together.
    QueueAndHistory(Deploy),
}

/// Key-value contract for per-channel queue snapshots and history logs.
///
/// Implementations must be safe to call concurrently for different channels.
pub trait Store: Send + Sync {
    /// Return the channel's queue, or an empty one if nothing is stored.
    fn get_queue(&self, key: &str) -> StoreResult<Queue>;

    /// Overwrite the channel's queue snapshot.
    fn set_queue(&self, key: &str, queue: &Queue) -> StoreResult<()>;

    /// Append to the channel's history and return the assigned sequence
    /// number. Sequence numbers start at 1 and increase per channel.
    fn add_to_history(&self, key: &str, deploy: &Deploy) -> StoreResult<u64>;

    /// The channel's history in insertion order.
    fn all(&self, key: &str) -> StoreResult<Vec<Deploy>>;

    /// History entries started strictly after `cutoff`, in insertion order.
    fn since(&self, key: &str, cutoff: DateTime<Utc>) -> StoreResult<Vec<Deploy>>;

    /// Atomically load the channel's queue, hand it to `f`, and persist what
    /// `f` asks for. Concurrent transactions on the same channel are
    /// serialized, so no update is lost between the read and the write.
    fn transact(&self, key: &str, f: &mut dyn FnMut(&mut Queue) -> Commit) -> StoreResult<()>;
}

/// Build the backend selected by `config`. Relative database paths are
/// resolved against `root`.
pub fn open_store(config: &StoreConfig, root: &Path) -> StoreResult<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redb => {
            let path = if config.path.is_absolute() {
                config.path.clone()
            } else {
                root.join(&config.path)
            };
            Ok(Arc::new(RedbStore::open(&path)?))
        }
    }
}

fn started_after(deploy: &Deploy, cutoff: DateTime<Utc>) -> bool {
    deploy.started_at.is_some_and(|t| t > cutoff)
}

// ---------------------------------------------------------------------------
// Contract tests shared by every backend
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::types::{Actor, PullRequestReference, UserReference};
    use chrono::Duration;

    pub fn sample_deploy(id: &str, started_mins_ago: i64) -> Deploy {
        let now = Utc::now();
        Deploy {
            user: Actor::new(id, format!("user-{id}")),
            subject: format!("Deploy subject a/b#1 for @user{id}"),
            started_at: Some(now - Duration::minutes(started_mins_ago)),
            finished_at: Some(now - Duration::minutes(started_mins_ago - 1)),
            aborted: false,
            abort_reason: String::new(),
            pull_requests: vec![PullRequestReference {
                repository: "a/b".into(),
                id: "1".into(),
            }],
            subscribers: vec![UserReference::named(format!("user{id}"))],
        }
    }

    pub fn get_missing_queue_is_empty(store: &dyn Store) {
        assert!(store.get_queue("nope").unwrap().is_empty());
    }

    pub fn set_then_get_preserves_everything(store: &dyn Store) {
        let mut d = sample_deploy("1", 5);
        d.aborted = true;
        d.abort_reason = "something went wrong".into();
        d.subscribers.push(UserReference {
            id: Some("U2".into()),
            name: "user2".into(),
        });

        let mut queue = Queue::new();
        queue.add(d);
        store.set_queue("key1", &queue).unwrap();

        let loaded = store.get_queue("key1").unwrap();
        assert_eq!(loaded, queue);
        assert_eq!(loaded.items[0].abort_reason, "something went wrong");
        assert_eq!(loaded.items[0].subscribers, queue.items[0].subscribers);
        assert_eq!(loaded.items[0].pull_requests, queue.items[0].pull_requests);
        assert!(store.get_queue("key2").unwrap().is_empty());
    }

    pub fn history_is_ordered_and_sequenced(store: &dyn Store) {
        assert!(store.all("key1").unwrap().is_empty());

        let first = sample_deploy("1", 30);
        let second = sample_deploy("2", 20);
        let third = sample_deploy("3", 10);

        assert_eq!(store.add_to_history("key1", &first).unwrap(), 1);
        assert_eq!(store.add_to_history("key1", &second).unwrap(), 2);
        assert_eq!(store.add_to_history("other", &third).unwrap(), 1);
        assert_eq!(store.add_to_history("key1", &third).unwrap(), 3);

        assert_eq!(store.all("key1").unwrap(), vec![first, second, third.clone()]);
        assert_eq!(store.all("other").unwrap(), vec![third]);
    }

    pub fn since_filters_strictly_after_cutoff(store: &dyn Store) {
        let old = sample_deploy("1", 60);
        let recent = sample_deploy("2", 5);
        store.add_to_history("key1", &old).unwrap();
        store.add_to_history("key1", &recent).unwrap();

        let cutoff = Utc::now() - Duration::minutes(30);
        assert_eq!(store.since("key1", cutoff).unwrap(), vec![recent.clone()]);

        // the boundary itself is excluded
        let exact = recent.started_at.unwrap();
        assert!(store.since("key1", exact).unwrap().is_empty());
        assert!(store.since("missing", cutoff).unwrap().is_empty());
    }

    pub fn transact_commits_queue_and_history_together(store: &dyn Store) {
        let mut queue = Queue::new();
        queue.add(sample_deploy("1", 5));
        store.set_queue("key1", &queue).unwrap();

        store
            .transact("key1", &mut |q| match q.pop() {
                Some(d) => Commit::QueueAndHistory(d),
                None => Commit::Nothing,
            })
            .unwrap();

        assert!(store.get_queue("key1").unwrap().is_empty());
        assert_eq!(store.all("key1").unwrap().len(), 1);
    }

    pub fn transact_nothing_leaves_queue_untouched(store: &dyn Store) {
        let mut queue = Queue::new();
        queue.add(sample_deploy("1", 5));
        store.set_queue("key1", &queue).unwrap();

        store
            .transact("key1", &mut |q| {
                q.pop();
                Commit::Nothing
            })
            .unwrap();

        assert_eq!(store.get_queue("key1").unwrap(), queue);
    }

    pub fn concurrent_transactions_do_not_lose_updates(store: Arc<dyn Store>) {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .transact("key1", &mut |q| {
                            q.add(Deploy::new(Actor::new(format!("U{i}"), "x"), "race"));
                            Commit::Queue
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_queue("key1").unwrap().len(), 8);
    }
}
