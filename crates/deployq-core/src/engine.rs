//! Per-channel deploy coordination.
//!
//! `ChannelDeploys` owns no state of its own: every operation is one
//! [`Store::transact`] call, so concurrent requests on the same channel are
//! serialized by the store and cannot interleave between read and write.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::deploy::Deploy;
use crate::error::{DeployError, Result, StoreError};
use crate::store::{Commit, Store, StoreResult};
use crate::types::Actor;

pub struct ChannelDeploys {
    store: Arc<dyn Store>,
}

/// A deploy that left the slot, and the one promoted in its place.
#[derive(Debug, Clone, PartialEq)]
pub struct Released {
    pub deploy: Deploy,
    pub next: Option<Deploy>,
}

impl ChannelDeploys {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The live queue: the active deploy first, then everyone waiting.
    pub fn all(&self, key: &str) -> Result<Vec<Deploy>> {
        Ok(self.store.get_queue(key)?.items)
    }

    /// The deploy holding the slot, if any.
    pub fn current(&self, key: &str) -> Result<Option<Deploy>> {
        Ok(self.store.get_queue(key)?.current().cloned())
    }

    /// Claim the slot for `deploy`, or queue it behind the active one.
    ///
    /// Fails with [`DeployError::AlreadyQueued`] (carrying the existing entry)
    /// if the actor is anywhere in the queue, and with
    /// [`DeployError::InProgress`] (carrying the active deploy) after queueing
    /// the request behind someone else.
    pub fn start(&self, key: &str, deploy: Deploy) -> Result<Deploy> {
        let mut outcome = None;
        let res = self.store.transact(key, &mut |queue| {
            if let Some(existing) = queue.entry_for(&deploy.user) {
                outcome = Some(Err(DeployError::AlreadyQueued(existing.clone())));
                return Commit::Nothing;
            }

            if let Some(current) = queue.current().cloned() {
                queue.add(deploy.clone());
                outcome = Some(Err(DeployError::InProgress(current)));
                return Commit::Queue;
            }

            let mut started = deploy.clone();
            started.start();
            queue.add(started.clone());
            outcome = Some(Ok(started));
            Commit::Queue
        });

        match &outcome {
            Some(Ok(d)) => tracing::debug!(channel = %key, user = %d.user, "deploy started"),
            Some(Err(DeployError::InProgress(active))) => {
                tracing::debug!(channel = %key, user = %deploy.user, active = %active.user, "deploy queued")
            }
            _ => {}
        }
        settle(key, "start", res, outcome)
    }

    /// Finish the active deploy, record it in history and promote the next
    /// one in line. Fails with [`DeployError::NothingActive`] on an empty
    /// queue.
    pub fn finish(&self, key: &str) -> Result<Deploy> {
        Ok(self.release(key, "finish", None, |d| d.finish())?.deploy)
    }

    /// Like [`finish`](Self::finish), but marks the deploy aborted with
    /// `reason` (which may be empty).
    pub fn abort(&self, key: &str, reason: &str) -> Result<Deploy> {
        Ok(self.release(key, "abort", None, |d| d.abort(reason))?.deploy)
    }

    /// Finish the active deploy only if `holder` owns it; otherwise fail with
    /// [`DeployError::NotHolder`] and leave the queue alone.
    pub fn finish_as(&self, key: &str, holder: &Actor) -> Result<Released> {
        self.release(key, "finish", Some(holder), |d| d.finish())
    }

    /// Guarded [`abort`](Self::abort), see [`finish_as`](Self::finish_as).
    pub fn abort_as(&self, key: &str, holder: &Actor, reason: &str) -> Result<Released> {
        self.release(key, "abort", Some(holder), |d| d.abort(reason))
    }

    /// Remove `user`'s entry from the queue. Returns whether anything was
    /// removed; the queue is only written when it changed.
    pub fn leave_queue(&self, key: &str, user: &Actor) -> Result<bool> {
        let mut removed = None;
        let res = self.store.transact(key, &mut |queue| {
            let r = queue.remove_user(user);
            removed = Some(r);
            if r {
                Commit::Queue
            } else {
                Commit::Nothing
            }
        });
        if removed == Some(true) {
            tracing::debug!(channel = %key, user = %user, "left deploy queue");
        }
        settle(key, "leave", res, removed.map(Ok))
    }

    /// Finished and aborted deploys in the order they ended.
    pub fn history(&self, key: &str) -> Result<Vec<Deploy>> {
        Ok(self.store.all(key)?)
    }

    /// History entries started strictly after `cutoff`.
    pub fn history_since(&self, key: &str, cutoff: DateTime<Utc>) -> Result<Vec<Deploy>> {
        Ok(self.store.since(key, cutoff)?)
    }

    fn release(
        &self,
        key: &str,
        op: &'static str,
        holder: Option<&Actor>,
        end: impl Fn(&mut Deploy),
    ) -> Result<Released> {
        let mut outcome = None;
        let res = self.store.transact(key, &mut |queue| {
            if let (Some(holder), Some(current)) = (holder, queue.current()) {
                if !current.user.same_as(holder) {
                    outcome = Some(Err(DeployError::NotHolder(current.clone())));
                    return Commit::Nothing;
                }
            }
            let Some(mut current) = queue.pop() else {
                outcome = Some(Err(DeployError::NothingActive));
                return Commit::Nothing;
            };
            end(&mut current);

            let next = queue.current().cloned().map(|mut next| {
                next.start();
                queue.replace_head_with(next.clone());
                next
            });

            outcome = Some(Ok(Released {
                deploy: current.clone(),
                next,
            }));
            Commit::QueueAndHistory(current)
        });

        if let Some(Ok(r)) = &outcome {
            tracing::debug!(
                channel = %key,
                user = %r.deploy.user,
                state = %r.deploy.state(),
                promoted = r.next.is_some(),
                "deploy {op}ed"
            );
        }
        settle(key, op, res, outcome)
    }
}

/// Combine the store's result with the outcome computed inside the
/// transaction. A failed write after the mutation ran is logged and the
/// outcome still returned; the queue is not rolled back.
fn settle<T>(
    key: &str,
    op: &'static str,
    res: StoreResult<()>,
    outcome: Option<Result<T>>,
) -> Result<T> {
    match (res, outcome) {
        (Ok(()), Some(outcome)) => outcome,
        (Err(e), Some(outcome)) => {
            tracing::error!(channel = %key, op, error = %e, "failed to persist deploy queue");
            outcome
        }
        (Err(e), None) => Err(e.into()),
        (Ok(()), None) => Err(StoreError::Db(format!("{op} transaction did not run")).into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeployState;
    use crate::queue::Queue;
    use crate::store::{MemoryStore, RedbStore};
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine() -> (Arc<MemoryStore>, ChannelDeploys) {
        let store = Arc::new(MemoryStore::new());
        let engine = ChannelDeploys::new(store.clone());
        (store, engine)
    }

    fn alice() -> Actor {
        Actor::new("U1", "alice")
    }

    fn bob() -> Actor {
        Actor::new("U2", "bob")
    }

    #[test]
    fn current_is_none_on_empty_channel() {
        let (_, repo) = engine();
        assert!(repo.current("C1").unwrap().is_none());
        assert!(repo.all("C1").unwrap().is_empty());
    }

    #[test]
    fn start_on_empty_channel_activates() {
        let (_, repo) = engine();
        let d = repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        assert_eq!(d.state(), DeployState::Active);
        assert_eq!(repo.current("C1").unwrap(), Some(d));
    }

    #[test]
    fn start_while_active_queues_and_reports_holder() {
        let (_, repo) = engine();
        let active = repo.start("C1", Deploy::new(alice(), "api")).unwrap();

        match repo.start("C1", Deploy::new(bob(), "web")) {
            Err(DeployError::InProgress(d)) => assert_eq!(d, active),
            other => panic!("expected InProgress, got {other:?}"),
        }

        let all = repo.all("C1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].user, bob());
        assert_eq!(all[1].state(), DeployState::Pending);
        assert_eq!(repo.current("C1").unwrap(), Some(active));
    }

    #[test]
    fn start_twice_reports_existing_entry() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let _ = repo.start("C1", Deploy::new(bob(), "web"));

        // waiting actors are caught too, not only the holder
        match repo.start("C1", Deploy::new(bob(), "web again")) {
            Err(DeployError::AlreadyQueued(d)) => assert_eq!(d.subject, "web"),
            other => panic!("expected AlreadyQueued, got {other:?}"),
        }
        assert_eq!(repo.all("C1").unwrap().len(), 2);
    }

    #[test]
    fn channels_are_independent() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let d = repo.start("C2", Deploy::new(alice(), "api")).unwrap();
        assert!(d.is_started());
    }

    #[test]
    fn finish_single_deploy_empties_queue() {
        let (store, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();

        let d = repo.finish("C1").unwrap();
        assert_eq!(d.state(), DeployState::Finished);
        assert!(repo.current("C1").unwrap().is_none());
        assert_eq!(store.all("C1").unwrap(), vec![d]);
    }

    #[test]
    fn finish_promotes_next_in_line() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let _ = repo.start("C1", Deploy::new(bob(), "web"));
        std::thread::sleep(Duration::from_millis(2));

        let done = repo.finish("C1").unwrap();
        assert!(done.finished_at.unwrap() > done.started_at.unwrap());

        let next = repo.current("C1").unwrap().unwrap();
        assert_eq!(next.user, bob());
        assert_eq!(next.state(), DeployState::Active);
    }

    #[test]
    fn finish_on_empty_queue_is_nothing_active() {
        let (store, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        repo.finish("C1").unwrap();

        assert!(matches!(repo.finish("C1"), Err(DeployError::NothingActive)));
        assert!(matches!(repo.abort("C1", "x"), Err(DeployError::NothingActive)));
        assert_eq!(store.all("C1").unwrap().len(), 1);
    }

    #[test]
    fn abort_keeps_reason_verbatim() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let d = repo.abort("C1", "  something went wrong ").unwrap();
        assert!(d.aborted);
        assert_eq!(d.abort_reason, "  something went wrong ");

        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let d = repo.abort("C1", "").unwrap();
        assert!(d.aborted);
        assert_eq!(d.abort_reason, "");
        assert_eq!(repo.history("C1").unwrap().len(), 2);
    }

    #[test]
    fn abort_promotes_next_in_line() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let _ = repo.start("C1", Deploy::new(bob(), "web"));
        repo.abort("C1", "rollback").unwrap();
        assert_eq!(repo.current("C1").unwrap().unwrap().state(), DeployState::Active);
    }

    #[test]
    fn guarded_release_rejects_other_actors() {
        let (_, repo) = engine();
        let active = repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let _ = repo.start("C1", Deploy::new(bob(), "web"));

        match repo.finish_as("C1", &bob()) {
            Err(DeployError::NotHolder(d)) => assert_eq!(d, active),
            other => panic!("expected NotHolder, got {other:?}"),
        }
        assert_eq!(repo.all("C1").unwrap().len(), 2);

        let released = repo.abort_as("C1", &alice(), "flaky").unwrap();
        assert_eq!(released.deploy.abort_reason, "flaky");
        let next = released.next.unwrap();
        assert_eq!(next.user, bob());
        assert!(next.is_started());
        assert_eq!(repo.current("C1").unwrap(), Some(next));

        let released = repo.finish_as("C1", &bob()).unwrap();
        assert!(released.next.is_none());
        assert!(matches!(
            repo.finish_as("C1", &bob()),
            Err(DeployError::NothingActive)
        ));
    }

    #[test]
    fn leave_queue_removes_only_that_actor() {
        let (_, repo) = engine();
        let carol = Actor::new("U3", "carol");
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        let _ = repo.start("C1", Deploy::new(bob(), "web"));
        let _ = repo.start("C1", Deploy::new(carol.clone(), "db"));

        assert!(repo.leave_queue("C1", &bob()).unwrap());
        let users: Vec<_> = repo.all("C1").unwrap().into_iter().map(|d| d.user).collect();
        assert_eq!(users, vec![alice(), carol]);

        assert!(!repo.leave_queue("C1", &bob()).unwrap());
        assert!(!repo.leave_queue("C2", &bob()).unwrap());
    }

    #[test]
    fn history_since_filters_by_start_time() {
        let (_, repo) = engine();
        repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        repo.finish("C1").unwrap();
        let cutoff = Utc::now();
        std::thread::sleep(Duration::from_millis(2));
        repo.start("C1", Deploy::new(bob(), "web")).unwrap();
        repo.finish("C1").unwrap();

        let recent = repo.history_since("C1", cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user, bob());
    }

    fn two_actors_one_channel(repo: &ChannelDeploys) {
        let a = repo.start("C1", Deploy::new(alice(), "Deploy service X")).unwrap();
        let current = repo.current("C1").unwrap().unwrap();
        assert_eq!(current.user, alice());
        assert_eq!(current.subject, "Deploy service X");
        assert_eq!(current.state(), DeployState::Active);

        assert!(matches!(
            repo.start("C1", Deploy::new(bob(), "Deploy service Y")),
            Err(DeployError::InProgress(_))
        ));
        assert_eq!(repo.current("C1").unwrap(), Some(a.clone()));
        assert_eq!(repo.all("C1").unwrap().len(), 2);

        let finished = repo.finish("C1").unwrap();
        assert_eq!(finished.user, a.user);
        assert_eq!(finished.started_at, a.started_at);
        let next = repo.current("C1").unwrap().unwrap();
        assert_eq!(next.user, bob());
        assert_eq!(next.state(), DeployState::Active);
        assert_eq!(repo.history("C1").unwrap(), vec![finished]);
    }

    fn racing_starts(repo: ChannelDeploys) {
        let repo = Arc::new(repo);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    repo.start("C1", Deploy::new(Actor::new(format!("U{i}"), "x"), "race"))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(repo.all("C1").unwrap().len(), 16);
        let started = repo
            .all("C1")
            .unwrap()
            .iter()
            .filter(|d| d.is_started())
            .count();
        assert_eq!(started, 1);
    }

    fn redb_engine() -> (TempDir, ChannelDeploys) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("deploys.redb")).unwrap();
        (dir, ChannelDeploys::new(Arc::new(store)))
    }

    #[test]
    fn scenario_two_actors_one_channel() {
        two_actors_one_channel(&engine().1);
    }

    #[test]
    fn scenario_two_actors_one_channel_on_disk() {
        let (_dir, repo) = redb_engine();
        two_actors_one_channel(&repo);
    }

    #[test]
    fn concurrent_starts_admit_exactly_one_holder() {
        racing_starts(engine().1);
    }

    #[test]
    fn concurrent_starts_admit_exactly_one_holder_on_disk() {
        let (_dir, repo) = redb_engine();
        racing_starts(repo);
    }

    /// Runs mutations in memory but refuses to commit them.
    struct ReadOnlyStore(MemoryStore);

    impl Store for ReadOnlyStore {
        fn get_queue(&self, key: &str) -> StoreResult<Queue> {
            self.0.get_queue(key)
        }
        fn set_queue(&self, _: &str, _: &Queue) -> StoreResult<()> {
            Err(StoreError::Db("read-only".into()))
        }
        fn add_to_history(&self, _: &str, _: &Deploy) -> StoreResult<u64> {
            Err(StoreError::Db("read-only".into()))
        }
        fn all(&self, key: &str) -> StoreResult<Vec<Deploy>> {
            self.0.all(key)
        }
        fn since(&self, key: &str, cutoff: DateTime<Utc>) -> StoreResult<Vec<Deploy>> {
            self.0.since(key, cutoff)
        }
        fn transact(&self, key: &str, f: &mut dyn FnMut(&mut Queue) -> Commit) -> StoreResult<()> {
            let mut queue = self.0.get_queue(key)?;
            match f(&mut queue) {
                Commit::Nothing => Ok(()),
                _ => Err(StoreError::Db("read-only".into())),
            }
        }
    }

    #[test]
    fn write_failure_still_returns_outcome() {
        let repo = ChannelDeploys::new(Arc::new(ReadOnlyStore(MemoryStore::new())));
        let d = repo.start("C1", Deploy::new(alice(), "api")).unwrap();
        assert!(d.is_started());
        // nothing was persisted
        assert!(repo.current("C1").unwrap().is_none());
    }
}
