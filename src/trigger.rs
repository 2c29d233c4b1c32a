//! Trigger-comment parsing.
//!
//! Issue comments can steer a run: `sdlc /bug fix the crash --plan-only`.
//! The parser extracts the optional explicit command, the remaining free
//! text, and whether the commenter asked for a plan-only run.

use crate::workflow::IssueKind;
use regex::Regex;
use std::sync::OnceLock;

/// The word that makes a comment a trigger, case-insensitive.
pub const TRIGGER_WORD: &str = "sdlc";

/// Phrasings that request a plan without implementation. Checked in order;
/// the first pattern that matches wins and its occurrences are removed.
const PLAN_ONLY_PATTERNS: &[&str] = &[
    r"--plan-only",
    r"plan\s+only",
    r"don'?t\s+implement",
    r"no\s+implementation",
    r"skip\s+implementation",
    r"planning\s+only",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCommand {
    /// Explicit workflow selector, when the comment named one.
    pub command: Option<IssueKind>,
    /// Free text left over after the trigger word and flags are removed.
    pub remaining: String,
    pub plan_only: bool,
}

fn trigger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)sdlc\s+(/(?:feature|bug|chore))?\s*(.*)").unwrap_or_else(|e| {
            unreachable!("trigger regex is a constant and always compiles: {e}")
        })
    })
}

fn plan_only_regexes() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        PLAN_ONLY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    })
}

/// Parses a trigger comment into its command, remaining text, and mode.
pub fn parse_trigger_comment(body: &str) -> TriggerCommand {
    // Collapse all whitespace runs so multi-line comments parse like one line.
    let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut plan_only = false;
    let mut text = normalized;
    for re in plan_only_regexes() {
        if re.is_match(&text) {
            plan_only = true;
            text = re.replace_all(&text, "").into_owned();
            break;
        }
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(caps) = trigger_regex().captures(&text) {
        let command = caps
            .get(1)
            .and_then(|m| IssueKind::from_slash(&m.as_str().to_lowercase()));
        let remaining = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        return TriggerCommand {
            command,
            remaining,
            plan_only,
        };
    }

    // No well-formed trigger phrase: strip the bare keyword and keep the rest.
    let stripped = text
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case(TRIGGER_WORD))
        .collect::<Vec<_>>()
        .join(" ");
    TriggerCommand {
        command: None,
        remaining: stripped,
        plan_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_command_with_text() {
        let parsed = parse_trigger_comment("sdlc /bug the login form crashes");
        assert_eq!(parsed.command, Some(IssueKind::Bug));
        assert_eq!(parsed.remaining, "the login form crashes");
        assert!(!parsed.plan_only);
    }

    #[test]
    fn trigger_word_alone() {
        let parsed = parse_trigger_comment("sdlc");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.remaining, "");
        assert!(!parsed.plan_only);
    }

    #[test]
    fn plan_only_flag_is_removed() {
        let parsed = parse_trigger_comment("sdlc /feature add dark mode --plan-only");
        assert_eq!(parsed.command, Some(IssueKind::Feature));
        assert_eq!(parsed.remaining, "add dark mode");
        assert!(parsed.plan_only);
    }

    #[test]
    fn plan_only_phrasing_mid_comment() {
        let parsed = parse_trigger_comment("sdlc please plan only, don't build yet");
        assert!(parsed.plan_only);
        assert_eq!(parsed.command, None);
        assert!(parsed.remaining.contains("please"));
    }

    #[test]
    fn case_insensitive_trigger_and_command() {
        let parsed = parse_trigger_comment("SDLC /CHORE tidy the imports");
        assert_eq!(parsed.command, Some(IssueKind::Chore));
        assert_eq!(parsed.remaining, "tidy the imports");
    }

    #[test]
    fn multiline_whitespace_is_normalized() {
        let parsed = parse_trigger_comment("sdlc   /feature\n\n  add\tsearch ");
        assert_eq!(parsed.command, Some(IssueKind::Feature));
        assert_eq!(parsed.remaining, "add search");
    }

    #[test]
    fn dont_implement_sets_plan_only() {
        let parsed = parse_trigger_comment("sdlc /feature widget but don't implement");
        assert!(parsed.plan_only);
        assert_eq!(parsed.command, Some(IssueKind::Feature));
        assert_eq!(parsed.remaining, "widget but");
    }

    #[test]
    fn unknown_slash_word_is_free_text() {
        let parsed = parse_trigger_comment("sdlc /deploy to staging");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.remaining, "/deploy to staging");
    }

    #[test]
    fn keyword_strip_fallback() {
        // Trigger word present but nothing after it that the phrase regex
        // can anchor on still yields an empty, non-panicking parse.
        let parsed = parse_trigger_comment("  sdlc\t");
        assert_eq!(parsed.command, None);
        assert_eq!(parsed.remaining, "");
    }
}
