//! Preflight checks.
//!
//! Shared by startup validation and the `/health` endpoint: are the agent,
//! tunnel, and tracker CLIs present, and is the tunnel login still valid.
//! Missing tokens are warnings because the tracker CLIs fall back to their
//! own stored credentials.

use crate::agent::{ClaudeAgent, AGENT_BINARY};
use crate::tracker::{github::GitHubTracker, gitlab::GitLabTracker, Provider};
use crate::tunnel;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub async fn check(provider: Provider) -> HealthReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if !ClaudeAgent::installed() {
        errors.push(format!("{AGENT_BINARY} CLI is not installed"));
    }

    if !tunnel::installed() {
        errors.push(format!(
            "{} CLI is not installed (see https://aka.ms/devtunnels/download)",
            tunnel::TUNNEL_CLI
        ));
    } else if !tunnel::authenticated().await {
        errors.push(format!(
            "{} is not authenticated; run `{} user login -g`",
            tunnel::TUNNEL_CLI,
            tunnel::TUNNEL_CLI
        ));
    }

    match provider {
        Provider::GitHub => {
            if !GitHubTracker::installed() {
                errors.push("gh CLI is not installed".to_string());
            }
            if std::env::var("GH_TOKEN").is_err() {
                warnings.push("GH_TOKEN not set; using gh CLI stored credentials".to_string());
            }
        }
        Provider::GitLab => {
            if !GitLabTracker::installed() {
                errors.push("glab CLI is not installed".to_string());
            }
            if std::env::var("GITLAB_TOKEN").is_err() {
                warnings
                    .push("GITLAB_TOKEN not set; using glab CLI stored credentials".to_string());
            }
        }
    }

    HealthReport {
        success: errors.is_empty(),
        warnings,
        errors,
    }
}
