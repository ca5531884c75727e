use crate::deploy::Deploy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// The requesting actor already holds a position in the channel's queue.
    /// Carries the actor's existing entry.
    #[error("{} is already in the queue", .0.user)]
    AlreadyQueued(Deploy),

    /// Another actor holds the slot. The new request has been queued behind
    /// it; carries the active deploy.
    #[error("{} is deploying at the moment", .0.user)]
    InProgress(Deploy),

    #[error("no deploys in channel")]
    NothingActive,

    /// A guarded finish or abort came from someone other than the holder.
    /// Carries the active deploy.
    #[error("{} holds the deploy slot", .0.user)]
    NotHolder(Deploy),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("deploy database error: {0}")]
    Db(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn db(e: impl std::fmt::Display) -> Self {
        StoreError::Db(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to deliver message to {recipient}: {reason}")]
    Delivery { recipient: String, reason: String },

    #[error("user lookup failed for {name}: {reason}")]
    Lookup { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DeployError>;
