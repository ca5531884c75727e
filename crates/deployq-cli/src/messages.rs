//! User-facing text for each command outcome.

use chrono::{DateTime, Utc};
use deployq_core::deploy::Deploy;
use deployq_core::types::Actor;

pub const NOTHING_ACTIVE: &str = "No one is deploying at the moment";
pub const LEFT_QUEUE: &str = "You have left the deploy queue";
pub const NOT_IN_QUEUE: &str = "You are not in the deploy queue";
pub const INTERNAL_ERROR: &str = "something went wrong, see the log for details";

pub fn timestamp(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%d %b %y %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn announcement(d: &Deploy) -> String {
    format!("{} is about to deploy {}", d.user, d.subject)
}

pub fn in_progress(active: &Deploy) -> String {
    format!(
        "{} is deploying since {}. You are in the queue and will start once the slot frees up.",
        active.user,
        timestamp(active.started_at)
    )
}

pub fn already_queued(existing: &Deploy) -> String {
    if existing.is_started() {
        format!("You are already deploying {}", existing.subject)
    } else {
        format!("You are already in the queue with {}", existing.subject)
    }
}

pub fn status(active: &Deploy) -> String {
    format!(
        "{} is deploying {} since {}",
        active.user,
        active.subject,
        timestamp(active.started_at)
    )
}

pub fn waiting(position: usize, d: &Deploy) -> String {
    format!("  {position}. {} waiting to deploy {}", d.user, d.subject)
}

pub fn done(user: &Actor) -> String {
    format!("{user} done deploying")
}

pub fn aborted(user: &Actor, reason: &str) -> String {
    if reason.is_empty() {
        format!("{user} has aborted the deploy")
    } else {
        format!("{user} has aborted the deploy ({reason})")
    }
}
