//! Deploy transition events and their observers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::deploy::Deploy;

/// A state transition of a channel's deploy slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    Started(Deploy),
    Completed(Deploy),
    Aborted(Deploy),
}

impl DeployEvent {
    pub fn deploy(&self) -> &Deploy {
        match self {
            DeployEvent::Started(d) | DeployEvent::Completed(d) | DeployEvent::Aborted(d) => d,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployEvent::Started(_) => "started",
            DeployEvent::Completed(_) => "completed",
            DeployEvent::Aborted(_) => "aborted",
        }
    }

    async fn deliver(&self, observer: &dyn DeployObserver, channel: &str) {
        match self {
            DeployEvent::Started(d) => observer.started(channel, d).await,
            DeployEvent::Completed(d) => observer.completed(channel, d).await,
            DeployEvent::Aborted(d) => observer.aborted(channel, d).await,
        }
    }
}

/// Reacts to deploy transitions. Implementations handle their own failures;
/// nothing they do can affect the transition or other observers.
#[async_trait]
pub trait DeployObserver: Send + Sync {
    async fn started(&self, channel: &str, deploy: &Deploy);
    async fn completed(&self, channel: &str, deploy: &Deploy);
    async fn aborted(&self, channel: &str, deploy: &Deploy);
}

/// The observers registered by the composition root.
#[derive(Clone, Default)]
pub struct DeployEvents {
    observers: Vec<Arc<dyn DeployObserver>>,
}

impl DeployEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn DeployObserver>) -> Self {
        self.register(observer);
        self
    }

    pub fn register(&mut self, observer: Arc<dyn DeployObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer, each in its own task, and wait for
    /// all of them. A panicking observer is logged and does not affect the
    /// others.
    pub async fn dispatch(&self, channel: &str, event: &DeployEvent) {
        let tasks = self.observers.iter().map(|observer| {
            let observer = Arc::clone(observer);
            let channel = channel.to_string();
            let event = event.clone();
            tokio::spawn(async move { event.deliver(observer.as_ref(), &channel).await })
        });

        for result in join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(channel, event = event.as_str(), error = %e, "deploy observer failed");
            }
        }
    }
}

/// Writes every transition to the log.
#[derive(Debug, Default)]
pub struct LogObserver;

#[async_trait]
impl DeployObserver for LogObserver {
    async fn started(&self, channel: &str, deploy: &Deploy) {
        tracing::info!(channel, user = %deploy.user, subject = %deploy.subject, "deploy started");
    }

    async fn completed(&self, channel: &str, deploy: &Deploy) {
        tracing::info!(channel, user = %deploy.user, subject = %deploy.subject, "deploy completed");
    }

    async fn aborted(&self, channel: &str, deploy: &Deploy) {
        tracing::info!(
            channel,
            user = %deploy.user,
            reason = %deploy.abort_reason,
            "deploy aborted"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
