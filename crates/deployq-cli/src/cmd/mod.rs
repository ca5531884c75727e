pub mod deploy;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use deployq_core::config::Config;
use deployq_core::coordinator::Coordinator;
use deployq_core::events::{DeployEvents, LogObserver};
use deployq_core::notifier::{ImNotifier, Messenger, StaticDirectory};
use deployq_core::store::open_store;
use deployq_core::types::Actor;
use deployq_core::{DeployError, NotifyError};

use crate::messages;

/// Everything a command needs besides its own arguments.
pub struct Context {
    pub root: PathBuf,
    pub channel: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub json: bool,
}

impl Context {
    /// The actor issuing the command. A missing id falls back to the name
    /// and vice versa.
    pub fn actor(&self) -> anyhow::Result<Actor> {
        match (&self.user_id, &self.user_name) {
            (Some(id), Some(name)) => Ok(Actor::new(id.clone(), name.clone())),
            (Some(id), None) => Ok(Actor::new(id.clone(), id.clone())),
            (None, Some(name)) => Ok(Actor::new(name.clone(), name.clone())),
            (None, None) => anyhow::bail!(
                "no user given: pass --user-name (or --user-id), or set DEPLOYQ_USER_NAME"
            ),
        }
    }

    pub fn coordinator(&self) -> anyhow::Result<Coordinator> {
        build_coordinator(&self.root)
    }
}

fn build_coordinator(root: &Path) -> anyhow::Result<Coordinator> {
    let config = Config::load(root).context("failed to load .deployq/config.yaml")?;
    let store = open_store(&config.store, root).context("failed to open deploy store")?;

    let notifier = ImNotifier::new(
        ConsoleMessenger,
        StaticDirectory::from_config(&config),
        config.notifier.warning_delay(),
    )
    .without_reminders();
    let events = DeployEvents::new()
        .with(Arc::new(LogObserver))
        .with(Arc::new(notifier));
    Ok(Coordinator::new(store, events))
}

/// Log an unexpected engine failure and hand back a generic error.
pub fn internal(op: &str, e: DeployError) -> anyhow::Error {
    tracing::error!(op, error = %e, "deploy operation failed");
    anyhow::anyhow!(messages::INTERNAL_ERROR)
}

/// Delivers direct messages by writing them to stderr.
///
/// Each run exits as soon as its command is done, so the notifier it feeds
/// never arms reminders. Only completion messages reach this messenger.
pub struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, recipient: &Actor, text: &str) -> Result<(), NotifyError> {
        eprintln!("message for {recipient}: {text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: Option<&str>, name: Option<&str>) -> Context {
        Context {
            root: PathBuf::from("."),
            channel: "default".into(),
            user_id: id.map(String::from),
            user_name: name.map(String::from),
            json: false,
        }
    }

    #[test]
    fn actor_falls_back_between_id_and_name() {
        assert_eq!(
            ctx(Some("U1"), Some("alice")).actor().unwrap(),
            Actor::new("U1", "alice")
        );
        assert_eq!(ctx(None, Some("alice")).actor().unwrap().id, "alice");
        assert_eq!(ctx(Some("U1"), None).actor().unwrap().name, "U1");
        assert!(ctx(None, None).actor().is_err());
    }
}
