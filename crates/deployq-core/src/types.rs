use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// A chat participant that can own a deploy or receive a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Queue membership is decided by id alone; display names may change.
    pub fn same_as(&self, other: &Actor) -> bool {
        self.id == other.id
    }
}

/// Renders as an escaped chat mention, e.g. `<@U123|alice>`.
impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<@{}|{}>", self.id, self.name)
    }
}

// ---------------------------------------------------------------------------
// References extracted from a deploy subject
// ---------------------------------------------------------------------------

/// `owner/repo#123` found in a deploy subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReference {
    pub repository: String,
    pub id: String,
}

impl fmt::Display for PullRequestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.id)
    }
}

/// A user mentioned in a deploy subject who wants to hear when it completes.
///
/// Escaped mentions carry an id; plain `@name` mentions only a display name
/// that has to be resolved through a directory before messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl UserReference {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    /// The full identity, if the mention already carried one.
    pub fn actor(&self) -> Option<Actor> {
        self.id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| Actor::new(id.clone(), self.name.clone()))
    }
}
