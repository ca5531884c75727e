//! Instant-message notifications for deploy transitions.
//!
//! A started deploy arms a reminder for its owner; completing or aborting it
//! cancels the reminder. A completed deploy is announced to everyone the
//! subject mentions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::deploy::Deploy;
use crate::error::NotifyError;
use crate::events::DeployObserver;
use crate::types::{Actor, UserReference};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    async fn send(&self, recipient: &Actor, text: &str) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Resolve a display name. `Ok(None)` means no such user.
    async fn lookup(&self, name: &str) -> Result<Option<Actor>, NotifyError>;
}

/// Directory backed by the `directory` section of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<String, Actor>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = Actor>) -> Self {
        Self {
            users: users.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.known_users())
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn lookup(&self, name: &str) -> Result<Option<Actor>, NotifyError> {
        Ok(self.users.get(name).cloned())
    }
}

// ---------------------------------------------------------------------------
// Message text
// ---------------------------------------------------------------------------

pub fn reminder_text(subject: &str, delay: Duration) -> String {
    format!(
        "Your deploy \"{subject}\" was started {} ago. Are you still deploying?",
        format_delay(delay)
    )
}

pub fn completion_text(deploy: &Deploy) -> String {
    format!("{} just deployed {}", deploy.user, deploy.subject)
}

/// `1h`, `1h30m`, `45s`; zero units are left out.
fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}

// ---------------------------------------------------------------------------
// Reminders
// ---------------------------------------------------------------------------

struct Reminder {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Reminders {
    generation: u64,
    armed: HashMap<String, Reminder>,
}

impl Reminders {
    fn cancel(&mut self, channel: &str) -> bool {
        match self.armed.remove(channel) {
            Some(reminder) => {
                reminder.task.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a fired timer. Succeeds only if the timer was not cancelled
    /// or replaced in the meantime; after that no cancel can reach it.
    fn claim(&mut self, channel: &str, generation: u64) -> bool {
        match self.armed.get(channel) {
            Some(r) if r.generation == generation => {
                self.armed.remove(channel);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ImNotifier
// ---------------------------------------------------------------------------

pub struct ImNotifier<M, D> {
    messenger: Arc<M>,
    directory: D,
    warning_delay: Option<Duration>,
    reminders: Arc<Mutex<Reminders>>,
    names: Mutex<HashMap<String, Actor>>,
}

impl<M: Messenger, D: Directory> ImNotifier<M, D> {
    pub fn new(messenger: M, directory: D, warning_delay: Duration) -> Self {
        Self {
            messenger: Arc::new(messenger),
            directory,
            warning_delay: Some(warning_delay),
            reminders: Arc::default(),
            names: Mutex::default(),
        }
    }

    /// Never schedule reminders. For processes that exit long before any
    /// reminder could fire; completion messages are still sent.
    pub fn without_reminders(mut self) -> Self {
        self.warning_delay = None;
        self
    }

    /// Whether a reminder is pending for `channel`.
    pub fn is_armed(&self, channel: &str) -> bool {
        self.reminders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .armed
            .contains_key(channel)
    }

    /// Schedule a reminder to the owner of `deploy`, replacing any reminder
    /// already pending for the channel.
    pub fn arm(&self, channel: &str, deploy: &Deploy) {
        let Some(delay) = self.warning_delay else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(channel, "no async runtime; deploy reminder not armed");
            return;
        };

        let mut reminders = self.reminders.lock().unwrap_or_else(|e| e.into_inner());
        reminders.cancel(channel);
        reminders.generation += 1;
        let generation = reminders.generation;

        let state = Arc::clone(&self.reminders);
        let messenger = Arc::clone(&self.messenger);
        let owner = deploy.user.clone();
        let text = reminder_text(&deploy.subject, delay);
        let key = channel.to_string();

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = {
                let mut reminders = state.lock().unwrap_or_else(|e| e.into_inner());
                reminders.claim(&key, generation)
            };
            if !claimed {
                return;
            }
            tracing::info!(channel = %key, user = %owner, "sending deploy reminder");
            if let Err(e) = messenger.send(&owner, &text).await {
                tracing::warn!(channel = %key, error = %e, "failed to send deploy reminder");
            }
        });

        reminders
            .armed
            .insert(channel.to_string(), Reminder { generation, task });
        tracing::debug!(channel, user = %deploy.user, ?delay, "deploy reminder armed");
    }

    /// Drop the pending reminder for `channel`. Once this returns, that
    /// reminder will not be sent.
    pub fn cancel(&self, channel: &str) {
        let cancelled = self
            .reminders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel(channel);
        if cancelled {
            tracing::debug!(channel, "deploy reminder cancelled");
        }
    }

    /// Tell everyone mentioned in the subject that `deploy` is done.
    pub async fn announce(&self, deploy: &Deploy) {
        let recipients = self.resolve(&deploy.subscribers).await;
        if recipients.is_empty() {
            return;
        }
        let text = completion_text(deploy);
        let sends = recipients.iter().map(|recipient| {
            let text = &text;
            async move {
                if let Err(e) = self.messenger.send(recipient, text).await {
                    tracing::warn!(recipient = %recipient, error = %e, "failed to notify subscriber");
                }
            }
        });
        join_all(sends).await;
    }

    /// Turn references into full identities. Names that are neither carried
    /// with an id nor cached are looked up once each; unknown names are
    /// dropped and looked up again next time.
    async fn resolve(&self, refs: &[UserReference]) -> Vec<Actor> {
        let missing: BTreeSet<&str> = {
            let names = self.names.lock().unwrap_or_else(|e| e.into_inner());
            refs.iter()
                .filter(|r| r.actor().is_none() && !r.name.is_empty())
                .map(|r| r.name.as_str())
                .filter(|name| !names.contains_key(*name))
                .collect()
        };

        let lookups = missing.into_iter().map(|name| async move {
            (name, self.directory.lookup(name).await)
        });
        let found = join_all(lookups).await;

        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        for (name, result) in found {
            match result {
                Ok(Some(actor)) => {
                    names.insert(name.to_string(), actor);
                }
                Ok(None) => tracing::debug!(name, "no user with that name"),
                Err(e) => tracing::warn!(name, error = %e, "user lookup failed"),
            }
        }

        let mut seen = BTreeSet::new();
        refs.iter()
            .filter_map(|r| r.actor().or_else(|| names.get(&r.name).cloned()))
            .filter(|actor| seen.insert(actor.id.clone()))
            .collect()
    }
}

#[async_trait]
impl<M: Messenger, D: Directory> DeployObserver for ImNotifier<M, D> {
    async fn started(&self, channel: &str, deploy: &Deploy) {
        self.arm(channel, deploy);
    }

    async fn completed(&self, channel: &str, deploy: &Deploy) {
        self.cancel(channel);
        self.announce(deploy).await;
    }

    async fn aborted(&self, channel: &str, _deploy: &Deploy) {
        self.cancel(channel);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
