use crate::references;
use crate::types::{Actor, PullRequestReference, UserReference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DeployState
// ---------------------------------------------------------------------------

/// Lifecycle state of a deploy, derived from its timestamps.
///
/// Transitions: `Pending → Active → Finished | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Pending,
    Active,
    Finished,
    Aborted,
}

impl DeployState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployState::Pending => "pending",
            DeployState::Active => "active",
            DeployState::Finished => "finished",
            DeployState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeployState::Finished | DeployState::Aborted)
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Deploy
// ---------------------------------------------------------------------------

/// One request for exclusive use of a channel's deploy slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deploy {
    pub user: Actor,
    pub subject: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub abort_reason: String,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestReference>,
    #[serde(default)]
    pub subscribers: Vec<UserReference>,
}

impl Deploy {
    /// Create an unstarted deploy, extracting references from `subject`.
    pub fn new(user: Actor, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            pull_requests: references::pull_requests(&subject),
            subscribers: references::subscribers(&subject),
            user,
            subject,
            started_at: None,
            finished_at: None,
            aborted: false,
            abort_reason: String::new(),
        }
    }

    pub fn state(&self) -> DeployState {
        match (self.started_at, self.finished_at) {
            (_, Some(_)) if self.aborted => DeployState::Aborted,
            (_, Some(_)) => DeployState::Finished,
            (Some(_), None) => DeployState::Active,
            (None, None) => DeployState::Pending,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Mark the deploy active. Returns `false` if it was already started,
    /// which callers treat as "nothing to do" rather than an error.
    pub fn start(&mut self) -> bool {
        if self.is_started() {
            return false;
        }
        self.started_at = Some(Utc::now());
        true
    }

    /// Stamp the finish time. No-op once finished or aborted.
    pub fn finish(&mut self) {
        if self.is_finished() {
            return;
        }
        self.finished_at = Some(Utc::now());
    }

    /// Finish the deploy and flag it aborted with an optional free-text reason.
    /// No-op once finished or aborted.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.finish();
        self.aborted = true;
        self.abort_reason = reason.into();
    }

    /// Wall-clock time between start and finish.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f - s),
            _ => None,
        }
    }
}

/// Deploys compare by owner, subject and timestamps only.
impl PartialEq for Deploy {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.subject == other.subject
            && self.started_at == other.started_at
            && self.finished_at == other.finished_at
    }
}

impl Eq for Deploy {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Actor {
        Actor::new("U1", "alice")
    }

    #[test]
    fn new_deploy_is_pending_with_references() {
        let d = Deploy::new(alice(), "Deploy a/b#1 for @bob");
        assert_eq!(d.state(), DeployState::Pending);
        assert_eq!(d.pull_requests.len(), 1);
        assert_eq!(d.subscribers, vec![UserReference::named("bob")]);
    }

    #[test]
    fn start_is_guarded() {
        let mut d = Deploy::new(alice(), "api");
        assert!(d.start());
        let started = d.started_at;
        assert_eq!(d.state(), DeployState::Active);

        assert!(!d.start());
        assert_eq!(d.started_at, started);
    }

    #[test]
    fn finish_happens_once() {
        let mut d = Deploy::new(alice(), "api");
        d.start();
        d.finish();
        let finished = d.finished_at;
        assert_eq!(d.state(), DeployState::Finished);

        d.finish();
        d.abort("too late");
        assert_eq!(d.finished_at, finished);
        assert!(!d.aborted);
        assert!(d.abort_reason.is_empty());
    }

    #[test]
    fn abort_records_reason() {
        let mut d = Deploy::new(alice(), "api");
        d.start();
        d.abort("something went wrong");
        assert_eq!(d.state(), DeployState::Aborted);
        assert!(d.is_finished());
        assert_eq!(d.abort_reason, "something went wrong");
    }

    #[test]
    fn abort_without_reason() {
        let mut d = Deploy::new(alice(), "api");
        d.start();
        d.abort("");
        assert!(d.aborted);
        assert_eq!(d.abort_reason, "");
    }

    #[test]
    fn equality_ignores_abort_details() {
        let mut a = Deploy::new(alice(), "api");
        a.start();
        let mut b = a.clone();
        b.abort_reason = "different".into();
        assert_eq!(a, b);

        b.subject = "web".into();
        assert_ne!(a, b);
    }

    #[test]
    fn duration_needs_both_timestamps() {
        let mut d = Deploy::new(alice(), "api");
        assert!(d.duration().is_none());
        d.start();
        assert!(d.duration().is_none());
        d.finish();
        assert!(d.duration().unwrap() >= chrono::Duration::zero());
    }
}
