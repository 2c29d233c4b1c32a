//! GitHub adapter, backed by the `gh` CLI.

use super::{run_cli, ChangeRequest, Issue, IssueTracker, Provider, WebhookInfo};
use crate::agent::AgentInvoker;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

pub const GITHUB_CLI: &str = "gh";

#[derive(Debug, Clone)]
pub struct GitHubTracker {
    /// `owner/name` repo path.
    repo: String,
    working_dir: PathBuf,
}

impl GitHubTracker {
    pub fn new(repo: String, working_dir: PathBuf) -> Self {
        Self { repo, working_dir }
    }

    pub fn installed() -> bool {
        which::which(GITHUB_CLI).is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct GhHook {
    id: u64,
    #[serde(default)]
    config: GhHookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct GhHookConfig {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct GhCreatedHook {
    id: u64,
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    async fn fetch_issue(&self, number: u64) -> Result<Issue> {
        let output = run_cli(
            &self.working_dir,
            GITHUB_CLI,
            &[
                "issue",
                "view",
                &number.to_string(),
                "-R",
                &self.repo,
                "--json",
                "number,title,body,url",
            ],
        )
        .await
        .with_context(|| format!("failed to fetch issue #{number}"))?;
        serde_json::from_str(&output).context("unexpected issue payload from gh")
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        run_cli(
            &self.working_dir,
            GITHUB_CLI,
            &[
                "issue",
                "comment",
                &number.to_string(),
                "-R",
                &self.repo,
                "--body",
                body,
            ],
        )
        .await
        .with_context(|| format!("failed to comment on issue #{number}"))?;
        Ok(())
    }

    /// GitHub opens the pull request through the resolved agent command; the
    /// agent pushes the branch and replies with the PR URL.
    async fn open_change_request(
        &self,
        request: &ChangeRequest,
        agent: &dyn AgentInvoker,
    ) -> Result<String> {
        let issue_json =
            serde_json::to_string(&request.issue).context("failed to serialize issue")?;
        let args = vec![
            request.branch.clone(),
            issue_json,
            request.plan_file.clone(),
            request.run_id.clone(),
        ];
        let response = agent
            .run_slash(&request.command, &args, &request.run_id, "pull_request")
            .await;
        if !response.success {
            bail!("pull request creation failed: {}", response.output);
        }
        let url = response.output.trim().to_string();
        if url.is_empty() {
            bail!("pull request creation returned no URL");
        }
        Ok(url)
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>> {
        let endpoint = format!("repos/{}/hooks", self.repo);
        let output = run_cli(&self.working_dir, GITHUB_CLI, &["api", &endpoint])
            .await
            .context("failed to list webhooks")?;
        let hooks: Vec<GhHook> =
            serde_json::from_str(&output).context("unexpected webhook list payload from gh")?;
        Ok(hooks
            .into_iter()
            .map(|h| WebhookInfo {
                id: h.id,
                url: h.config.url,
            })
            .collect())
    }

    async fn create_webhook(&self, url: &str) -> Result<u64> {
        let endpoint = format!("repos/{}/hooks", self.repo);
        let config_url = format!("config[url]={url}");
        let output = run_cli(
            &self.working_dir,
            GITHUB_CLI,
            &[
                "api",
                &endpoint,
                "-X",
                "POST",
                "-f",
                "name=web",
                "-F",
                "active=true",
                "-f",
                "events[]=issues",
                "-f",
                "events[]=issue_comment",
                "-f",
                &config_url,
                "-f",
                "config[content_type]=json",
            ],
        )
        .await
        .context("failed to create webhook")?;
        let created: GhCreatedHook =
            serde_json::from_str(&output).context("unexpected webhook creation payload from gh")?;
        Ok(created.id)
    }

    async fn delete_webhook(&self, id: u64) -> Result<()> {
        let endpoint = format!("repos/{}/hooks/{id}", self.repo);
        run_cli(
            &self.working_dir,
            GITHUB_CLI,
            &["api", "-X", "DELETE", &endpoint],
        )
        .await
        .with_context(|| format!("failed to delete webhook {id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_list_payload_decodes() {
        let payload = r#"[
            {"id": 1, "config": {"url": "https://a-8001.euw.devtunnels.ms/gh-webhook"}},
            {"id": 2, "config": {}}
        ]"#;
        let hooks: Vec<GhHook> = serde_json::from_str(payload).unwrap();
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].id, 1);
        assert!(hooks[0].config.url.contains("devtunnels.ms"));
        assert!(hooks[1].config.url.is_empty());
    }

    #[test]
    fn issue_payload_decodes() {
        let payload = r#"{"number": 42, "title": "Crash on login", "body": "steps...", "url": "https://github.com/acme/widgets/issues/42"}"#;
        let issue: Issue = serde_json::from_str(payload).unwrap();
        assert_eq!(issue.number, 42);
        assert_eq!(issue.title, "Crash on login");
    }

    #[test]
    fn issue_payload_tolerates_null_body() {
        let payload = r#"{"number": 7, "title": "t", "url": null}"#;
        let issue: Issue = serde_json::from_str(payload).unwrap();
        assert_eq!(issue.body, "");
        assert!(issue.url.is_none());
    }
}
