use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::timefmt::format_timestamp;

/// Type-specific part of a normalized event. Serializes with a `type` tag
/// (`push` / `pull_request` / `merge`) alongside the branch fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Push {
        branch: String,
    },
    PullRequest {
        from_branch: String,
        to_branch: String,
    },
    Merge {
        from_branch: String,
        to_branch: String,
    },
}

/// A webhook payload reduced to the uniform feed record. The store assigns
/// the id at append time; everything else is final once normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub kind: EventKind,
    pub message: String,
    pub author: String,
    pub repository: String,
    pub timestamp: String,
    pub raw_timestamp: String,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Classifies raw webhook payloads into [`EventRecord`]s.
///
/// Pure apart from the clock, which only supplies defaults for payloads that
/// omit their timestamp. Tests inject a fixed clock via [`Normalizer::with_clock`].
pub struct Normalizer {
    clock: Clock,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// Current clock time as an ISO-8601 string with a `Z` suffix, the shape
    /// webhook payloads carry their timestamps in.
    pub fn now_raw(&self) -> String {
        (self.clock)().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Returns the normalized record, or `None` when the payload is not one
    /// of the three handled shapes. Classification order matters: a payload
    /// with commits and a ref is a push regardless of any `action` field.
    pub fn normalize(&self, payload: &Value) -> Option<EventRecord> {
        let repository = str_or(payload, &["repository", "name"], "unknown");

        if payload.get("commits").is_some() && !str_or(payload, &["ref"], "").is_empty() {
            return Some(self.push_event(payload, repository));
        }

        let action = str_or(payload, &["action"], "");
        let has_pull_request = payload.get("pull_request").is_some();

        if action == "opened" && has_pull_request {
            return Some(self.pull_request_event(payload, repository));
        }

        if action == "closed" && has_pull_request {
            if bool_at(payload, &["pull_request", "merged"]) {
                return Some(self.merge_event(payload, repository));
            }
            info!("ignoring closed pull request that was not merged");
            return None;
        }

        info!(action = %action, "unhandled webhook payload shape");
        None
    }

    fn push_event(&self, payload: &Value, repository: String) -> EventRecord {
        let author = str_or(payload, &["pusher", "name"], "Unknown");
        let git_ref = str_or(payload, &["ref"], "");
        let branch = git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&git_ref)
            .to_string();
        let raw_timestamp = str_at(payload, &["head_commit", "timestamp"])
            .map(str::to_string)
            .unwrap_or_else(|| self.now_raw());
        let timestamp = format_timestamp(&raw_timestamp);
        let message = format!("\"{author}\" pushed to \"{branch}\" on {timestamp}");

        EventRecord {
            kind: EventKind::Push { branch },
            message,
            author,
            repository,
            timestamp,
            raw_timestamp,
        }
    }

    fn pull_request_event(&self, payload: &Value, repository: String) -> EventRecord {
        let author = str_or(payload, &["pull_request", "user", "login"], "Unknown");
        let from_branch = str_or(payload, &["pull_request", "head", "ref"], "unknown");
        let to_branch = str_or(payload, &["pull_request", "base", "ref"], "unknown");
        let raw_timestamp = str_at(payload, &["pull_request", "created_at"])
            .map(str::to_string)
            .unwrap_or_else(|| self.now_raw());
        let timestamp = format_timestamp(&raw_timestamp);
        let message = format!(
            "\"{author}\" submitted a pull request from \"{from_branch}\" to \"{to_branch}\" on {timestamp}"
        );

        EventRecord {
            kind: EventKind::PullRequest {
                from_branch,
                to_branch,
            },
            message,
            author,
            repository,
            timestamp,
            raw_timestamp,
        }
    }

    fn merge_event(&self, payload: &Value, repository: String) -> EventRecord {
        let author = str_or(payload, &["pull_request", "merged_by", "login"], "Unknown");
        let from_branch = str_or(payload, &["pull_request", "head", "ref"], "unknown");
        let to_branch = str_or(payload, &["pull_request", "base", "ref"], "unknown");
        let raw_timestamp = str_at(payload, &["pull_request", "merged_at"])
            .map(str::to_string)
            .unwrap_or_else(|| self.now_raw());
        let timestamp = format_timestamp(&raw_timestamp);
        let message = format!(
            "\"{author}\" merged branch \"{from_branch}\" to \"{to_branch}\" on {timestamp}"
        );

        EventRecord {
            kind: EventKind::Merge {
                from_branch,
                to_branch,
            },
            message,
            author,
            repository,
            timestamp,
            raw_timestamp,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

// Payload lookups go through these so a missing nested field always yields
// the caller's default instead of an error.

fn value_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |node, key| node.get(key))
}

fn str_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(payload, path).and_then(Value::as_str)
}

fn str_or(payload: &Value, path: &[&str], default: &str) -> String {
    str_at(payload, path).unwrap_or(default).to_string()
}

fn bool_at(payload: &Value, path: &[&str]) -> bool {
    value_at(payload, path)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
