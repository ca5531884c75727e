//! Cross-reference extraction from free-text deploy subjects.

use crate::types::{PullRequestReference, UserReference};
use regex::Regex;
use std::sync::OnceLock;

static PULL_REQUEST_RE: OnceLock<Regex> = OnceLock::new();
static MENTION_RE: OnceLock<Regex> = OnceLock::new();

fn pull_request_re() -> &'static Regex {
    PULL_REQUEST_RE
        .get_or_init(|| Regex::new(r"([A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)#(\d+)").unwrap())
}

fn mention_re() -> &'static Regex {
    MENTION_RE.get_or_init(|| {
        Regex::new(
            r"<@(?P<id>[A-Za-z0-9]+)(?:\|(?P<escaped>[^>]+))?>|(?:^|[^\w<@/])@(?P<name>[A-Za-z0-9_.\-]+)",
        )
        .unwrap()
    })
}

/// Find `owner/repo#123` references, in order of appearance, without duplicates.
pub fn pull_requests(subject: &str) -> Vec<PullRequestReference> {
    let mut refs: Vec<PullRequestReference> = Vec::new();
    for caps in pull_request_re().captures_iter(subject) {
        let r = PullRequestReference {
            repository: caps[1].to_string(),
            id: caps[2].to_string(),
        };
        if !refs.contains(&r) {
            refs.push(r);
        }
    }
    refs
}

/// Find `@name` and escaped `<@ID|name>` mentions, in order of appearance.
///
/// A user mentioned twice is returned once; an escaped mention wins over a
/// plain one because it already carries an id.
pub fn subscribers(subject: &str) -> Vec<UserReference> {
    let mut refs: Vec<UserReference> = Vec::new();
    for caps in mention_re().captures_iter(subject) {
        let r = if let Some(id) = caps.name("id") {
            UserReference {
                id: Some(id.as_str().to_string()),
                name: caps
                    .name("escaped")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        } else if let Some(name) = caps.name("name") {
            // Trailing dots belong to the sentence, not the handle.
            UserReference::named(name.as_str().trim_end_matches('.'))
        } else {
            continue;
        };

        match refs.iter_mut().find(|existing| same_user(existing, &r)) {
            Some(existing) => {
                if existing.id.is_none() && r.id.is_some() {
                    *existing = r;
                }
            }
            None => refs.push(r),
        }
    }
    refs
}

fn same_user(a: &UserReference, b: &UserReference) -> bool {
    match (&a.id, &b.id) {
        (Some(x), Some(y)) => x == y,
        _ => !a.name.is_empty() && a.name == b.name,
    }
}
