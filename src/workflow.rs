//! Workflow state machine.
//!
//! One accepted webhook event becomes one [`WorkflowRun`] driven through a
//! fixed pipeline: classify, branch, plan, (plan-only exit), locate plan
//! file, implement, commit, open change request. Every transition posts
//! exactly one progress comment to the originating issue, each suffixed with
//! the run id for correlation. The first failing step short-circuits the
//! run with a single failure comment.

use crate::agent::AgentInvoker;
use crate::commands::CommandRegistry;
use crate::run_logger::RunLogger;
use crate::tracker::{ChangeRequest, Issue, IssueTracker};
use crate::vcs::Workspace;
use anyhow::{anyhow, bail, Result};
use uuid::Uuid;

/// What kind of work an issue asks for; doubles as the planning slash
/// command selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Feature,
    Bug,
    Chore,
}

impl IssueKind {
    pub fn from_slash(s: &str) -> Option<Self> {
        match s {
            "/feature" => Some(Self::Feature),
            "/bug" => Some(Self::Bug),
            "/chore" => Some(Self::Chore),
            _ => None,
        }
    }

    pub fn as_slash(&self) -> &'static str {
        match self {
            Self::Feature => "/feature",
            Self::Bug => "/bug",
            Self::Chore => "/chore",
        }
    }

    /// Bare name used as a slash-command argument.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_slash())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    /// Generate and commit the plan, skip implementation.
    PlanOnly,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::PlanOnly => "plan-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Classifying,
    Branching,
    Planning,
    Locating,
    Implementing,
    Committing,
    OpeningRequest,
    Done,
    Failed,
}

/// One workflow run, owned by the task that executes it.
#[derive(Debug)]
pub struct WorkflowRun {
    pub run_id: String,
    pub issue_number: u64,
    pub mode: RunMode,
    pub explicit_command: Option<IssueKind>,
    pub status: RunStatus,
}

impl WorkflowRun {
    pub fn new(issue_number: u64, mode: RunMode, explicit_command: Option<IssueKind>) -> Self {
        Self {
            run_id: new_run_id(),
            issue_number,
            mode,
            explicit_command,
            status: RunStatus::Pending,
        }
    }
}

/// Short correlation id: the first 8 hex chars of a v4 UUID.
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// Drives one run through the pipeline. Progress and failure comments are
/// posted along the way; the returned error repeats the failing step's
/// detail for the caller's log.
pub async fn execute_run(
    tracker: &dyn IssueTracker,
    agent: &dyn AgentInvoker,
    workspace: &dyn Workspace,
    registry: &CommandRegistry,
    run: &mut WorkflowRun,
    issue: &Issue,
    logger: &RunLogger,
) -> Result<()> {
    logger.info(&format!(
        "starting workflow for issue #{} (run {}, mode {})",
        run.issue_number,
        run.run_id,
        run.mode.as_str()
    ));

    // Step 1: explicit command or classification.
    run.status = RunStatus::Classifying;
    let kind = match run.explicit_command {
        Some(kind) => {
            logger.info(&format!("using explicit command {kind}"));
            progress(tracker, run, &format!("✅ Using command: {kind}")).await;
            kind
        }
        None => match classify_issue(agent, issue, &run.run_id).await {
            Ok(kind) => {
                logger.info(&format!("issue classified as {kind}"));
                progress(tracker, run, &format!("✅ Classified as: {kind}")).await;
                kind
            }
            Err(e) => return Err(fail(tracker, run, logger, "Classification failed", e).await),
        },
    };

    // Step 2: branch.
    run.status = RunStatus::Branching;
    let branch = match create_branch(agent, registry, issue, kind, &run.run_id).await {
        Ok(branch) => {
            logger.info(&format!("created branch {branch}"));
            progress(tracker, run, &format!("✅ Created branch: {branch}")).await;
            branch
        }
        Err(e) => return Err(fail(tracker, run, logger, "Branch creation failed", e).await),
    };

    // Step 3: plan.
    run.status = RunStatus::Planning;
    match build_plan(agent, registry, issue, kind, &run.run_id).await {
        Ok(_) => {
            logger.info("plan created");
            progress(tracker, run, "✅ Plan created").await;
        }
        Err(e) => return Err(fail(tracker, run, logger, "Plan creation failed", e).await),
    }

    // Plan-only runs commit the plan and stop here.
    if run.mode == RunMode::PlanOnly {
        run.status = RunStatus::Committing;
        match workspace.commit_all().await {
            Ok(message) => {
                logger.info(&format!("plan committed: {message}"));
                progress(tracker, run, "✅ Plan committed").await;
            }
            Err(e) => return Err(fail(tracker, run, logger, "Plan commit failed", e).await),
        }
        run.status = RunStatus::Done;
        logger.info("plan-only workflow completed");
        progress(tracker, run, "✅ Plan-only workflow completed!").await;
        return Ok(());
    }

    // Step 4: locate the plan file while it is still untracked.
    run.status = RunStatus::Locating;
    let plan_file = match workspace.locate_plan_file().await {
        Ok(path) => {
            logger.info(&format!("plan file located: {path}"));
            progress(tracker, run, &format!("✅ Plan file: {path}")).await;
            path
        }
        Err(e) => return Err(fail(tracker, run, logger, "Could not locate plan file", e).await),
    };

    // Step 5: implement.
    run.status = RunStatus::Implementing;
    match implement_plan(agent, registry, &plan_file, &run.run_id).await {
        Ok(_) => {
            logger.info("implementation completed");
            progress(tracker, run, "✅ Implementation completed").await;
        }
        Err(e) => return Err(fail(tracker, run, logger, "Implementation failed", e).await),
    }

    // Step 6: commit plan and implementation together.
    run.status = RunStatus::Committing;
    match workspace.commit_all().await {
        Ok(message) => {
            logger.info(&format!("changes committed: {message}"));
            progress(tracker, run, "✅ Changes committed").await;
        }
        Err(e) => return Err(fail(tracker, run, logger, "Commit failed", e).await),
    }

    // Step 7: open the change request.
    run.status = RunStatus::OpeningRequest;
    let noun = tracker.provider().change_request_noun();
    let request = ChangeRequest {
        branch,
        issue: issue.clone(),
        plan_file,
        run_id: run.run_id.clone(),
        command: registry.resolve("/pull_request"),
    };
    let url = match tracker.open_change_request(&request, agent).await {
        Ok(url) => {
            logger.info(&format!("change request created: {url}"));
            progress(tracker, run, &format!("✅ {noun} created: {url}")).await;
            url
        }
        Err(e) => {
            let label = format!("{noun} creation failed");
            return Err(fail(tracker, run, logger, &label, e).await);
        }
    };

    run.status = RunStatus::Done;
    logger.info("workflow completed");
    progress(tracker, run, &format!("✅ Workflow completed! {noun}: {url}")).await;
    Ok(())
}

/// Posts one progress comment, tagged with the run id. A tracker hiccup
/// here must not kill the run.
async fn progress(tracker: &dyn IssueTracker, run: &WorkflowRun, text: &str) {
    let body = format!("{text} (ADW ID: {})", run.run_id);
    if let Err(e) = tracker.post_comment(run.issue_number, &body).await {
        tracing::warn!(run_id = %run.run_id, "failed to post progress comment: {e:#}");
    }
}

/// Marks the run failed and posts the single failure comment carrying the
/// step label and the raw error detail.
async fn fail(
    tracker: &dyn IssueTracker,
    run: &mut WorkflowRun,
    logger: &RunLogger,
    label: &str,
    error: anyhow::Error,
) -> anyhow::Error {
    run.status = RunStatus::Failed;
    logger.error(&format!("{label}: {error:#}"));
    progress(tracker, run, &format!("❌ {label}: {error:#}")).await;
    error.context(label.to_string())
}

fn classification_prompt(issue: &Issue) -> String {
    format!(
        "Classify this issue as one of: /feature, /bug, or /chore\n\n\
         Issue Title: {}\n\
         Issue Body: {}\n\n\
         Respond with ONLY one of these three options:\n\
         - /feature (for new functionality or enhancements)\n\
         - /bug (for defects or problems that need fixing)\n\
         - /chore (for maintenance, refactoring, or other non-feature work)\n\n\
         Your response:",
        issue.title, issue.body
    )
}

async fn classify_issue(
    agent: &dyn AgentInvoker,
    issue: &Issue,
    run_id: &str,
) -> Result<IssueKind> {
    let response = agent
        .run_prompt(&classification_prompt(issue), run_id, "classify")
        .await;
    tracing::debug!(session_id = ?response.session_id, "classification response");
    if !response.success {
        bail!("{}", response.output);
    }
    let value = response.output.trim().to_lowercase();
    IssueKind::from_slash(&value)
        .ok_or_else(|| anyhow!("invalid classification result: {value}"))
}

async fn create_branch(
    agent: &dyn AgentInvoker,
    registry: &CommandRegistry,
    issue: &Issue,
    kind: IssueKind,
    run_id: &str,
) -> Result<String> {
    let command = registry.resolve("/branch");
    let issue_json = serde_json::to_string(issue)?;
    let args = vec![kind.as_arg().to_string(), run_id.to_string(), issue_json];
    let response = agent.run_slash(&command, &args, run_id, "branch").await;
    if !response.success {
        bail!("{}", response.output);
    }
    let branch = response.output.trim().to_string();
    if branch.is_empty() {
        bail!("branch command returned no branch name");
    }
    Ok(branch)
}

async fn build_plan(
    agent: &dyn AgentInvoker,
    registry: &CommandRegistry,
    issue: &Issue,
    kind: IssueKind,
    run_id: &str,
) -> Result<String> {
    let command = registry.resolve(kind.as_slash());
    let args = vec![format!("{}: {}", issue.title, issue.body)];
    let response = agent.run_slash(&command, &args, run_id, "plan").await;
    if !response.success {
        bail!("{}", response.output);
    }
    Ok(response.output)
}

async fn implement_plan(
    agent: &dyn AgentInvoker,
    registry: &CommandRegistry,
    plan_file: &str,
    run_id: &str,
) -> Result<String> {
    let command = registry.resolve("/implement");
    let args = vec![plan_file.to_string()];
    let response = agent.run_slash(&command, &args, run_id, "implement").await;
    if !response.success {
        bail!("{}", response.output);
    }
    Ok(response.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;
    use crate::tracker::testing::RecordingTracker;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedAgent {
        classify_reply: String,
        fail_step: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new() -> Self {
            Self {
                classify_reply: "/feature".to_string(),
                fail_step: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn steps(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        async fn run_prompt(&self, _prompt: &str, _run_id: &str, step: &str) -> AgentResponse {
            self.calls.lock().unwrap().push(step.to_string());
            if self.fail_step == Some(step) {
                return AgentResponse {
                    success: false,
                    output: "scripted failure".to_string(),
                    session_id: None,
                };
            }
            let output = match step {
                "classify" => self.classify_reply.clone(),
                "branch" => "feature/issue-42-search".to_string(),
                _ => "ok".to_string(),
            };
            AgentResponse {
                success: true,
                output,
                session_id: Some("sess".to_string()),
            }
        }
    }

    struct FakeWorkspace {
        plan_file: Option<String>,
        commits: Mutex<u32>,
    }

    impl FakeWorkspace {
        fn new() -> Self {
            Self {
                plan_file: Some("specs/issue-42-search.md".to_string()),
                commits: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl crate::vcs::Workspace for FakeWorkspace {
        async fn commit_all(&self) -> Result<String> {
            *self.commits.lock().unwrap() += 1;
            Ok("feat: scripted commit".to_string())
        }

        async fn locate_plan_file(&self) -> Result<String> {
            self.plan_file
                .clone()
                .ok_or_else(|| anyhow!("no plan file found in git status"))
        }
    }

    fn registry() -> CommandRegistry {
        let tmp = std::env::temp_dir().join("adw-missing-commands");
        CommandRegistry::new(tmp.join("user"), tmp.join("plugin"))
    }

    fn run_logger() -> (tempfile::TempDir, RunLogger) {
        let tmp = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(tmp.path(), "testrun").unwrap();
        (tmp, logger)
    }

    async fn drive(
        tracker: &RecordingTracker,
        agent: &ScriptedAgent,
        workspace: &FakeWorkspace,
        run: &mut WorkflowRun,
    ) -> Result<()> {
        let issue = tracker.fetch_issue(run.issue_number).await.unwrap();
        let (_tmp, logger) = run_logger();
        execute_run(tracker, agent, workspace, &registry(), run, &issue, &logger).await
    }

    #[tokio::test]
    async fn full_run_posts_one_comment_per_transition() {
        let tracker = RecordingTracker::new();
        let agent = ScriptedAgent::new();
        let workspace = FakeWorkspace::new();
        let mut run = WorkflowRun::new(42, RunMode::Full, None);

        drive(&tracker, &agent, &workspace, &mut run).await.unwrap();

        assert_eq!(run.status, RunStatus::Done);
        let comments = tracker.comment_bodies();
        assert_eq!(comments.len(), 8);
        assert!(comments[0].contains("Classified as: /feature"));
        assert!(comments[1].contains("Created branch: feature/issue-42-search"));
        assert!(comments[2].contains("Plan created"));
        assert!(comments[3].contains("Plan file: specs/issue-42-search.md"));
        assert!(comments[4].contains("Implementation completed"));
        assert!(comments[5].contains("Changes committed"));
        assert!(comments[6].contains("Pull request created:"));
        assert!(comments[7].contains("Workflow completed!"));
        assert_eq!(agent.steps(), vec!["classify", "branch", "plan", "implement"]);
        assert_eq!(*workspace.commits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn every_comment_carries_the_run_id() {
        let tracker = RecordingTracker::new();
        let agent = ScriptedAgent::new();
        let workspace = FakeWorkspace::new();
        let mut run = WorkflowRun::new(42, RunMode::Full, None);

        drive(&tracker, &agent, &workspace, &mut run).await.unwrap();

        let tag = format!("(ADW ID: {})", run.run_id);
        for comment in tracker.comment_bodies() {
            assert!(comment.ends_with(&tag), "untagged comment: {comment}");
        }
    }

    #[tokio::test]
    async fn plan_only_commits_plan_and_stops() {
        let tracker = RecordingTracker::new();
        let agent = ScriptedAgent::new();
        let workspace = FakeWorkspace::new();
        let mut run = WorkflowRun::new(7, RunMode::PlanOnly, Some(IssueKind::Chore));

        drive(&tracker, &agent, &workspace, &mut run).await.unwrap();

        assert_eq!(run.status, RunStatus::Done);
        let comments = tracker.comment_bodies();
        assert_eq!(comments.len(), 5);
        assert!(comments[0].contains("Using command: /chore"));
        assert!(comments[3].contains("Plan committed"));
        assert!(comments[4].contains("Plan-only workflow completed!"));
        // Explicit command skips classification; plan-only skips implement.
        assert_eq!(agent.steps(), vec!["branch", "plan"]);
        assert_eq!(*workspace.commits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn first_failing_step_short_circuits() {
        let tracker = RecordingTracker::new();
        let mut agent = ScriptedAgent::new();
        agent.fail_step = Some("branch");
        let workspace = FakeWorkspace::new();
        let mut run = WorkflowRun::new(42, RunMode::Full, None);

        let err = drive(&tracker, &agent, &workspace, &mut run)
            .await
            .unwrap_err();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(format!("{err:#}").contains("scripted failure"));
        let comments = tracker.comment_bodies();
        assert_eq!(comments.len(), 2);
        let failures: Vec<_> = comments.iter().filter(|c| c.contains('❌')).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("Branch creation failed: scripted failure"));
        // No step after the failing one ran.
        assert_eq!(agent.steps(), vec!["classify", "branch"]);
        assert_eq!(*workspace.commits.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_classification_is_a_typed_failure() {
        let tracker = RecordingTracker::new();
        let mut agent = ScriptedAgent::new();
        agent.classify_reply = "probably a feature?".to_string();
        let workspace = FakeWorkspace::new();
        let mut run = WorkflowRun::new(42, RunMode::Full, None);

        let err = drive(&tracker, &agent, &workspace, &mut run)
            .await
            .unwrap_err();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(format!("{err:#}").contains("invalid classification result"));
        assert_eq!(tracker.comment_bodies().len(), 1);
    }

    #[tokio::test]
    async fn missing_plan_file_fails_the_run() {
        let tracker = RecordingTracker::new();
        let agent = ScriptedAgent::new();
        let mut workspace = FakeWorkspace::new();
        workspace.plan_file = None;
        let mut run = WorkflowRun::new(42, RunMode::Full, None);

        let err = drive(&tracker, &agent, &workspace, &mut run)
            .await
            .unwrap_err();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(format!("{err:#}").contains("no plan file found"));
        assert_eq!(agent.steps(), vec!["classify", "branch", "plan"]);
    }

    #[test]
    fn run_ids_are_short_and_unique() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn issue_kind_round_trips_slash_forms() {
        for kind in [IssueKind::Feature, IssueKind::Bug, IssueKind::Chore] {
            assert_eq!(IssueKind::from_slash(kind.as_slash()), Some(kind));
        }
        assert_eq!(IssueKind::from_slash("/deploy"), None);
    }
}
