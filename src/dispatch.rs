//! Webhook event dispatch.
//!
//! Pure decision functions: given a provider event type and its JSON
//! payload, decide whether to start a run, acknowledge a connectivity
//! check, or ignore the delivery. Keeping these free of I/O makes every
//! trigger rule unit-testable.

use crate::trigger::{parse_trigger_comment, TRIGGER_WORD};
use crate::workflow::{IssueKind, RunMode};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept(AcceptedEvent),
    /// Provider connectivity check; acknowledge without starting a run.
    Ping { message: String },
    Ignore { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEvent {
    pub issue_number: u64,
    pub mode: RunMode,
    pub explicit_command: Option<IssueKind>,
    /// Human-readable trigger reason, echoed in the HTTP response.
    pub reason: String,
}

/// GitHub: new issues auto-start a run; issue comments only when the whole
/// comment is the bare trigger word.
pub fn decide_github(event_type: &str, payload: &Value) -> Decision {
    match event_type {
        "ping" => {
            let zen = payload.get("zen").and_then(Value::as_str).unwrap_or("");
            Decision::Ping {
                message: format!("pong: {zen}"),
            }
        }
        "issues" => {
            let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
            if action != "opened" {
                return ignore(format!("issues event with action '{action}'"));
            }
            match issue_number(payload, &["issue", "number"]) {
                Some(number) => Decision::Accept(AcceptedEvent {
                    issue_number: number,
                    mode: RunMode::Full,
                    explicit_command: None,
                    reason: "new issue opened".to_string(),
                }),
                None => ignore("issues event without an issue number".to_string()),
            }
        }
        "issue_comment" => {
            let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
            if action != "created" {
                return ignore(format!("issue_comment event with action '{action}'"));
            }
            let body = payload
                .pointer("/comment/body")
                .and_then(Value::as_str)
                .unwrap_or("");
            if !body.trim().eq_ignore_ascii_case(TRIGGER_WORD) {
                return ignore("comment is not the trigger word".to_string());
            }
            match issue_number(payload, &["issue", "number"]) {
                Some(number) => Decision::Accept(AcceptedEvent {
                    issue_number: number,
                    mode: RunMode::Full,
                    explicit_command: None,
                    reason: format!("comment with '{TRIGGER_WORD}' trigger"),
                }),
                None => ignore("issue_comment event without an issue number".to_string()),
            }
        }
        other => ignore(format!("unhandled event type '{other}'")),
    }
}

/// GitLab: newly opened issues auto-start a run; issue notes containing the
/// trigger word are parsed for an explicit command and plan-only flag. A
/// `Push Hook` without commits is GitLab's connectivity test.
pub fn decide_gitlab(event_type: &str, payload: &Value) -> Decision {
    match event_type {
        "Push Hook" => {
            let commits = payload
                .get("commits")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if commits == 0 {
                Decision::Ping {
                    message: "connectivity test acknowledged".to_string(),
                }
            } else {
                ignore("push with commits".to_string())
            }
        }
        "Issue Hook" => {
            let action = payload
                .pointer("/object_attributes/action")
                .and_then(Value::as_str)
                .unwrap_or("");
            if action != "open" {
                return ignore(format!("issue event with action '{action}'"));
            }
            match issue_number(payload, &["object_attributes", "iid"]) {
                Some(number) => Decision::Accept(AcceptedEvent {
                    issue_number: number,
                    mode: RunMode::Full,
                    explicit_command: None,
                    reason: "new issue opened".to_string(),
                }),
                None => ignore("issue event without an iid".to_string()),
            }
        }
        "Note Hook" => {
            let noteable = payload
                .pointer("/object_attributes/noteable_type")
                .and_then(Value::as_str)
                .unwrap_or("");
            if noteable != "Issue" {
                return ignore(format!("note on '{noteable}' is not an issue note"));
            }
            let note = payload
                .pointer("/object_attributes/note")
                .and_then(Value::as_str)
                .unwrap_or("");
            if !note.to_lowercase().contains(TRIGGER_WORD) {
                return ignore("note without trigger word".to_string());
            }
            let Some(number) = issue_number(payload, &["issue", "iid"]) else {
                return ignore("note event without an issue iid".to_string());
            };
            let parsed = parse_trigger_comment(note);
            if !parsed.remaining.is_empty() {
                tracing::debug!("trigger free text: '{}'", parsed.remaining);
            }
            let mode = if parsed.plan_only {
                RunMode::PlanOnly
            } else {
                RunMode::Full
            };
            Decision::Accept(AcceptedEvent {
                issue_number: number,
                mode,
                explicit_command: parsed.command,
                reason: format!("note with '{TRIGGER_WORD}' trigger"),
            })
        }
        other => ignore(format!("unhandled event type '{other}'")),
    }
}

fn issue_number(payload: &Value, path: &[&str]) -> Option<u64> {
    let mut value = payload;
    for key in path {
        value = value.get(key)?;
    }
    value.as_u64().filter(|n| *n > 0)
}

fn ignore(reason: String) -> Decision {
    Decision::Ignore { reason }
}
