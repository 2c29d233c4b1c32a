//! Issue-tracker abstraction.
//!
//! One trait covers everything the pipeline needs from a tracker: fetching
//! the issue, posting progress comments, opening the final change request,
//! and managing webhook registrations. GitHub and GitLab adapters shell out
//! to their official CLIs (`gh`, `glab`).

pub mod github;
pub mod gitlab;

use crate::agent::AgentInvoker;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Deadline for one tracker CLI invocation.
const CLI_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    GitLab,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
        }
    }

    /// Path the webhook server mounts for this provider.
    pub fn webhook_path(&self) -> &'static str {
        match self {
            Provider::GitHub => "/gh-webhook",
            Provider::GitLab => "/gl-webhook",
        }
    }

    /// Header carrying the event type on inbound deliveries.
    pub fn event_header(&self) -> &'static str {
        match self {
            Provider::GitHub => "x-github-event",
            Provider::GitLab => "x-gitlab-event",
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            Provider::GitHub => "github-webhook-watcher",
            Provider::GitLab => "gitlab-webhook-watcher",
        }
    }

    /// What this provider calls the thing the pipeline opens at the end.
    pub fn change_request_noun(&self) -> &'static str {
        match self {
            Provider::GitHub => "Pull request",
            Provider::GitLab => "Merge request",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified issue model across providers. `number` is the GitHub issue
/// number or the GitLab iid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A provider-side webhook registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookInfo {
    pub id: u64,
    pub url: String,
}

/// Everything needed to open the final pull/merge request.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub branch: String,
    pub issue: Issue,
    pub plan_file: String,
    pub run_id: String,
    /// Resolved agent slash command for adapters that delegate to the agent.
    pub command: String,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    fn provider(&self) -> Provider;

    async fn fetch_issue(&self, number: u64) -> Result<Issue>;

    async fn post_comment(&self, number: u64, body: &str) -> Result<()>;

    /// Opens a pull/merge request for the finished branch and returns its URL.
    async fn open_change_request(
        &self,
        request: &ChangeRequest,
        agent: &dyn AgentInvoker,
    ) -> Result<String>;

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>>;

    async fn create_webhook(&self, url: &str) -> Result<u64>;

    async fn delete_webhook(&self, id: u64) -> Result<()>;
}

pub(crate) async fn run_cli(dir: &Path, program: &str, args: &[&str]) -> Result<String> {
    run_cli_timeout(dir, program, args, CLI_TIMEOUT).await
}

/// Variant with an explicit deadline for slower operations. The child is
/// killed when the deadline passes, so a hung CLI never suspends a run.
pub(crate) async fn run_cli_timeout(
    dir: &Path,
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true);
    let output = tokio::time::timeout(deadline, command.output())
        .await
        .map_err(|_| {
            anyhow!(
                "{program} {} timed out after {}s",
                args.join(" "),
                deadline.as_secs()
            )
        })?
        .with_context(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
