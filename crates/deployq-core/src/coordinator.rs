//! Composition root: runs engine operations and announces the transitions
//! they cause.
//!
//! Each channel has one delivery lane: a worker task that hands batches of
//! events to the observers one batch at a time. The lane's lock is held from
//! the engine call until the batch is queued, so observers see a channel's
//! transitions in the order they were committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::deploy::Deploy;
use crate::engine::{ChannelDeploys, Released};
use crate::error::{DeployError, Result};
use crate::events::{DeployEvent, DeployEvents};
use crate::store::Store;
use crate::types::Actor;

/// What a finish or abort request amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Release {
    Finished { deploy: Deploy, next: Option<Deploy> },
    Aborted { deploy: Deploy, next: Option<Deploy> },
    /// The requester was waiting, not holding; their entry was removed.
    LeftQueue,
    /// The requester was neither holding nor waiting.
    NotInQueue,
}

/// Background delivery of one operation's events.
#[derive(Debug, Default)]
pub struct Delivery(Option<oneshot::Receiver<()>>);

impl Delivery {
    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }

    /// Wait until every observer has seen every event of this operation and
    /// of every earlier operation on the same channel.
    pub async fn wait(self) {
        if let Some(delivered) = self.0 {
            if delivered.await.is_err() {
                tracing::warn!("event delivery stopped before finishing");
            }
        }
    }
}

struct Batch {
    events: Vec<DeployEvent>,
    delivered: oneshot::Sender<()>,
}

/// Sender into a channel's delivery worker; `None` until the first event.
type Lane = Option<mpsc::UnboundedSender<Batch>>;

pub struct Coordinator {
    deploys: ChannelDeploys,
    events: Arc<DeployEvents>,
    lanes: Mutex<HashMap<String, Arc<Mutex<Lane>>>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, events: DeployEvents) -> Self {
        Self {
            deploys: ChannelDeploys::new(store),
            events: Arc::new(events),
            lanes: Mutex::default(),
        }
    }

    pub fn deploys(&self) -> &ChannelDeploys {
        &self.deploys
    }

    pub fn current(&self, key: &str) -> Result<Option<Deploy>> {
        self.deploys.current(key)
    }

    pub fn all(&self, key: &str) -> Result<Vec<Deploy>> {
        self.deploys.all(key)
    }

    pub fn history(&self, key: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Deploy>> {
        match since {
            Some(cutoff) => self.deploys.history_since(key, cutoff),
            None => self.deploys.history(key),
        }
    }

    /// See [`ChannelDeploys::start`]. Only a deploy that actually claimed
    /// the slot is announced.
    pub fn start(&self, key: &str, deploy: Deploy) -> Result<(Deploy, Delivery)> {
        let lane = self.lane(key);
        let mut lane = lane.lock().unwrap_or_else(|e| e.into_inner());

        let started = self.deploys.start(key, deploy)?;
        let delivery = self.announce(key, &mut lane, vec![DeployEvent::Started(started.clone())]);
        Ok((started, delivery))
    }

    /// Finish on behalf of `actor`. Fails with [`DeployError::NothingActive`]
    /// on an empty channel.
    pub fn finish_by(&self, key: &str, actor: &Actor) -> Result<(Release, Delivery)> {
        let lane = self.lane(key);
        let mut lane = lane.lock().unwrap_or_else(|e| e.into_inner());

        match self.deploys.finish_as(key, actor) {
            Ok(Released { deploy, next }) => {
                let mut events = vec![DeployEvent::Completed(deploy.clone())];
                events.extend(next.clone().map(DeployEvent::Started));
                let delivery = self.announce(key, &mut lane, events);
                Ok((Release::Finished { deploy, next }, delivery))
            }
            Err(DeployError::NotHolder(_)) => self.leave(key, actor),
            Err(e) => Err(e),
        }
    }

    /// Abort on behalf of `actor`, see [`finish_by`](Self::finish_by).
    pub fn abort_by(&self, key: &str, actor: &Actor, reason: &str) -> Result<(Release, Delivery)> {
        let lane = self.lane(key);
        let mut lane = lane.lock().unwrap_or_else(|e| e.into_inner());

        match self.deploys.abort_as(key, actor, reason) {
            Ok(Released { deploy, next }) => {
                let mut events = vec![DeployEvent::Aborted(deploy.clone())];
                events.extend(next.clone().map(DeployEvent::Started));
                let delivery = self.announce(key, &mut lane, events);
                Ok((Release::Aborted { deploy, next }, delivery))
            }
            Err(DeployError::NotHolder(_)) => self.leave(key, actor),
            Err(e) => Err(e),
        }
    }

    /// Remove a waiting actor. Leaving never changes the holder, so nothing
    /// is announced.
    pub fn leave(&self, key: &str, actor: &Actor) -> Result<(Release, Delivery)> {
        let release = if self.deploys.leave_queue(key, actor)? {
            Release::LeftQueue
        } else {
            Release::NotInQueue
        };
        Ok((release, Delivery::default()))
    }

    fn lane(&self, key: &str) -> Arc<Mutex<Lane>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(lanes.entry(key.to_string()).or_default())
    }

    /// Queue `events` on the channel's lane, starting its worker if needed.
    /// Without a Tokio runtime the events are dropped with a warning.
    fn announce(&self, key: &str, lane: &mut Lane, events: Vec<DeployEvent>) -> Delivery {
        if self.events.is_empty() {
            return Delivery::default();
        }
        let (delivered, receiver) = oneshot::channel();
        let mut batch = Batch { events, delivered };

        if let Some(sender) = lane.as_ref() {
            match sender.send(batch) {
                Ok(()) => return Delivery(Some(receiver)),
                // worker is gone along with its runtime; start a new one
                Err(mpsc::error::SendError(returned)) => batch = returned,
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(channel = %key, "no async runtime; deploy events not delivered");
            return Delivery::default();
        };
        let (sender, batches) = mpsc::unbounded_channel();
        runtime.spawn(deliver_in_order(
            Arc::clone(&self.events),
            key.to_string(),
            batches,
        ));
        if sender.send(batch).is_err() {
            tracing::warn!(channel = %key, "delivery worker did not start");
        }
        *lane = Some(sender);
        Delivery(Some(receiver))
    }
}

async fn deliver_in_order(
    observers: Arc<DeployEvents>,
    channel: String,
    mut batches: mpsc::UnboundedReceiver<Batch>,
) {
    while let Some(batch) = batches.recv().await {
        for event in &batch.events {
            observers.dispatch(&channel, event).await;
        }
        let _ = batch.delivered.send(());
    }
    tracing::debug!(channel, "delivery lane closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
