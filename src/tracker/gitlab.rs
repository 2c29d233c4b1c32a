//! GitLab adapter, backed by the `glab` CLI.

use super::{run_cli, run_cli_timeout, ChangeRequest, Issue, IssueTracker, Provider, WebhookInfo};
use crate::agent::AgentInvoker;
use crate::vcs::GitWorkspace;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

pub const GITLAB_CLI: &str = "glab";

/// Deadline for merge-request creation, which is slower than other calls.
const MR_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GitLabTracker {
    /// Full project path, e.g. `group/subgroup/repo`.
    project: String,
    working_dir: PathBuf,
}

impl GitLabTracker {
    pub fn new(project: String, working_dir: PathBuf) -> Self {
        Self {
            project,
            working_dir,
        }
    }

    pub fn installed() -> bool {
        which::which(GITLAB_CLI).is_ok()
    }

    /// Project path encoded for the REST API (`group%2Frepo`).
    fn encoded_project(&self) -> String {
        self.project.replace('/', "%2F")
    }
}

/// glab's JSON issue shape, mapped onto the unified model.
#[derive(Debug, Deserialize)]
struct GitLabIssue {
    iid: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

impl From<GitLabIssue> for Issue {
    fn from(raw: GitLabIssue) -> Self {
        Issue {
            number: raw.iid,
            title: raw.title,
            body: raw.description.unwrap_or_default(),
            url: raw.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GlHook {
    id: u64,
    #[serde(default)]
    url: String,
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://\S+")
            .unwrap_or_else(|e| unreachable!("url regex is a constant and always compiles: {e}"))
    })
}

/// Conventional-commit prefix derived from the branch name.
fn title_prefix(branch: &str) -> &'static str {
    if branch.starts_with("fix/") || branch.starts_with("bug/") {
        "fix"
    } else if branch.starts_with("chore/") {
        "chore"
    } else {
        "feat"
    }
}

fn merge_request_description(request: &ChangeRequest) -> String {
    format!(
        "## Summary\n\n\
         Implements #{iid}: {title}\n\n\
         ## Changes\n\n\
         See plan file: `{plan}`\n\n\
         ## Workflow\n\n\
         - ADW ID: `{run_id}`\n\
         - Closes #{iid}\n",
        iid = request.issue.number,
        title = request.issue.title,
        plan = request.plan_file,
        run_id = request.run_id,
    )
}

#[async_trait]
impl IssueTracker for GitLabTracker {
    fn provider(&self) -> Provider {
        Provider::GitLab
    }

    async fn fetch_issue(&self, number: u64) -> Result<Issue> {
        let output = run_cli(
            &self.working_dir,
            GITLAB_CLI,
            &[
                "issue",
                "view",
                &number.to_string(),
                "-R",
                &self.project,
                "--output",
                "json",
            ],
        )
        .await
        .with_context(|| format!("failed to fetch issue #{number}"))?;
        let raw: GitLabIssue =
            serde_json::from_str(&output).context("unexpected issue payload from glab")?;
        Ok(raw.into())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        run_cli(
            &self.working_dir,
            GITLAB_CLI,
            &[
                "issue",
                "note",
                &number.to_string(),
                "-R",
                &self.project,
                "--message",
                body,
            ],
        )
        .await
        .with_context(|| format!("failed to comment on issue #{number}"))?;
        Ok(())
    }

    /// GitLab opens the merge request directly: push the branch, then
    /// `glab mr create` with a conventional-commit title. A push failure is
    /// not fatal; the branch may already be on the remote.
    async fn open_change_request(
        &self,
        request: &ChangeRequest,
        _agent: &dyn AgentInvoker,
    ) -> Result<String> {
        if let Err(e) = GitWorkspace::new(self.working_dir.clone())
            .push_branch(&request.branch)
            .await
        {
            tracing::warn!("git push may have failed, creating merge request anyway: {e:#}");
        }

        let title = format!("{}: {}", title_prefix(&request.branch), request.issue.title);
        let description = merge_request_description(request);
        let output = run_cli_timeout(
            &self.working_dir,
            GITLAB_CLI,
            &[
                "mr",
                "create",
                "-R",
                &self.project,
                "--title",
                &title,
                "--description",
                &description,
                "--source-branch",
                &request.branch,
                "--target-branch",
                "main",
                "--no-editor",
            ],
            MR_TIMEOUT,
        )
        .await
        .context("failed to create merge request")?;

        match url_regex().find(&output) {
            Some(m) => Ok(m.as_str().to_string()),
            None => {
                let trimmed = output.trim();
                if trimmed.is_empty() {
                    bail!("merge request creation returned no URL");
                }
                Ok(trimmed.to_string())
            }
        }
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>> {
        let endpoint = format!("projects/{}/hooks", self.encoded_project());
        let output = run_cli(&self.working_dir, GITLAB_CLI, &["api", &endpoint])
            .await
            .context("failed to list webhooks")?;
        let hooks: Vec<GlHook> =
            serde_json::from_str(&output).context("unexpected webhook list payload from glab")?;
        Ok(hooks
            .into_iter()
            .map(|h| WebhookInfo {
                id: h.id,
                url: h.url,
            })
            .collect())
    }

    async fn create_webhook(&self, url: &str) -> Result<u64> {
        let endpoint = format!("projects/{}/hooks", self.encoded_project());
        let url_field = format!("url={url}");
        let output = run_cli(
            &self.working_dir,
            GITLAB_CLI,
            &[
                "api",
                &endpoint,
                "-X",
                "POST",
                "-f",
                &url_field,
                "-f",
                "issues_events=true",
                "-f",
                "note_events=true",
                "-f",
                "push_events=false",
            ],
        )
        .await
        .context("failed to create webhook")?;
        let created: GlHook = serde_json::from_str(&output)
            .context("unexpected webhook creation payload from glab")?;
        Ok(created.id)
    }

    async fn delete_webhook(&self, id: u64) -> Result<()> {
        let endpoint = format!("projects/{}/hooks/{id}", self.encoded_project());
        run_cli(
            &self.working_dir,
            GITLAB_CLI,
            &["api", "-X", "DELETE", &endpoint],
        )
        .await
        .with_context(|| format!("failed to delete webhook {id}"))?;
        Ok(())
    }
}
