//! Git working-tree operations.
//!
//! Thin shell-outs to `git` plus the external `aipr` tool for commit-message
//! generation. The workflow reaches these through the [`Workspace`] trait so
//! tests can substitute a fake tree.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Directories a freshly written plan file is expected under.
const PLAN_DIRS: [&str; 2] = ["specs/", "ai-specs/"];

/// Deadline for one git/aipr invocation. Pushes and commit-message
/// generation can be slow, but a hung child must not suspend a run forever.
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Working-tree operations the workflow needs, mockable in tests.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Stages everything and commits with a generated message.
    /// Returns the commit message used.
    async fn commit_all(&self) -> Result<String>;

    /// Finds the plan file the agent just wrote.
    async fn locate_plan_file(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// URL of the `origin` remote.
    pub async fn remote_url(&self) -> Result<String> {
        let output = run_checked(&self.dir, "git", &["remote", "get-url", "origin"])
            .await
            .context("failed to read origin remote")?;
        Ok(output.trim().to_string())
    }

    async fn status_porcelain(&self) -> Result<String> {
        run_checked(&self.dir, "git", &["status", "--porcelain"])
            .await
            .context("git status failed")
    }

    /// Pushes a branch and sets its upstream.
    pub async fn push_branch(&self, branch: &str) -> Result<()> {
        run_checked(&self.dir, "git", &["push", "-u", "origin", branch])
            .await
            .with_context(|| format!("failed to push branch {branch}"))?;
        Ok(())
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn commit_all(&self) -> Result<String> {
        run_checked(&self.dir, "git", &["add", "."])
            .await
            .context("git add failed")?;
        let message = run_checked(&self.dir, "aipr", &["commit", "-s", "-m", "claude"])
            .await
            .context("commit message generation failed")?
            .trim()
            .to_string();
        if message.is_empty() {
            bail!("commit message generation produced empty output");
        }
        run_checked(&self.dir, "git", &["commit", "-m", &message])
            .await
            .context("git commit failed")?;
        Ok(message)
    }

    async fn locate_plan_file(&self) -> Result<String> {
        let status = self.status_porcelain().await?;
        plan_file_from_status(&status)
            .ok_or_else(|| anyhow::anyhow!("no plan file found in git status"))
    }
}

/// First porcelain status line naming a markdown file under a plan
/// directory, in listing order. The two-character status code and the
/// separator are stripped.
pub fn plan_file_from_status(status: &str) -> Option<String> {
    status
        .lines()
        .filter(|line| line.len() > 3)
        .filter(|line| line.ends_with(".md"))
        .filter(|line| PLAN_DIRS.iter().any(|dir| line.contains(dir)))
        .map(|line| line.get(3..).unwrap_or("").trim().to_string())
        .find(|path| !path.is_empty())
}

/// Last path segment of a remote URL, without the `.git` suffix.
/// Used to derive a per-repo tunnel name.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let name = trimmed.rsplit(['/', ':']).next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `owner/name` (or `group/sub/name`) project path from an https or ssh
/// remote URL. This is what `gh -R` and `glab -R` accept.
pub fn repo_path_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let path = if let Some(rest) = trimmed.split("://").nth(1) {
        // https://host/owner/name
        rest.split_once('/')?.1
    } else if let Some(rest) = trimmed.split_once(':').map(|(_, p)| p) {
        // git@host:owner/name
        rest
    } else {
        return None;
    };
    let path = path.trim_matches('/');
    if path.contains('/') {
        Some(path.to_string())
    } else {
        None
    }
}

async fn run_checked(dir: &Path, program: &str, args: &[&str]) -> Result<String> {
    run_checked_timeout(dir, program, args, GIT_TIMEOUT).await
}

async fn run_checked_timeout(
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
