//! Webhook HTTP server.
//!
//! One POST route per provider plus `/health`. Webhook deliveries always
//! get HTTP 200 with a JSON status body, whatever happened, so the provider
//! never goes into retry storms over our internal failures. Accepted events
//! are answered immediately; the workflow runs in a detached task.

use crate::agent::{AgentInvoker, ClaudeAgent};
use crate::commands::CommandRegistry;
use crate::dispatch::{decide_github, decide_gitlab, AcceptedEvent, Decision};
use crate::health;
use crate::run_logger::RunLogger;
use crate::tracker::{Issue, IssueTracker, Provider};
use crate::vcs::Workspace;
use crate::workflow::{self, WorkflowRun};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<dyn IssueTracker>,
    pub agent: Arc<dyn AgentInvoker>,
    pub workspace: Arc<dyn Workspace>,
    pub registry: CommandRegistry,
    pub transcript_root: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let webhook_path = state.tracker.provider().webhook_path();
    Router::new()
        .route(webhook_path, post(handle_webhook))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let provider = state.tracker.provider();
    let event_type = headers
        .get(provider.event_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("undecodable webhook payload: {e}");
            return Json(json!({"status": "error", "message": "invalid JSON payload"}));
        }
    };

    let decision = match provider {
        Provider::GitHub => decide_github(&event_type, &payload),
        Provider::GitLab => decide_gitlab(&event_type, &payload),
    };

    match decision {
        Decision::Ping { message } => Json(json!({"status": "ok", "message": message})),
        Decision::Ignore { reason } => {
            tracing::debug!("ignoring {event_type} event: {reason}");
            Json(json!({"status": "ignored", "reason": reason}))
        }
        Decision::Accept(event) => accept_event(state, event).await,
    }
}

async fn accept_event(state: AppState, event: AcceptedEvent) -> Json<Value> {
    // Fetch the issue up front so a bad number surfaces in the response
    // instead of dying silently in the background task.
    let issue = match state.tracker.fetch_issue(event.issue_number).await {
        Ok(issue) => issue,
        Err(e) => {
            tracing::error!("failed to fetch issue #{}: {e:#}", event.issue_number);
            return Json(json!({
                "status": "error",
                "message": format!("failed to fetch issue #{}: {e:#}", event.issue_number),
            }));
        }
    };

    let run = WorkflowRun::new(event.issue_number, event.mode, event.explicit_command);
    tracing::info!(
        run_id = %run.run_id,
        issue = run.issue_number,
        mode = run.mode.as_str(),
        "accepted webhook event: {}",
        event.reason
    );
    let response = json!({
        "status": "accepted",
        "run_id": run.run_id.clone(),
        "issue_number": run.issue_number,
        "mode": run.mode.as_str(),
        "reason": event.reason,
        "log_dir": state.transcript_root.join(&run.run_id).display().to_string(),
    });

    tokio::spawn(run_workflow_task(state, run, issue));

    Json(response)
}

/// Detached workflow task. Every exit path either finishes the pipeline
/// (which posts its own comments) or posts a failure comment here; the
/// task never dies silently.
async fn run_workflow_task(state: AppState, mut run: WorkflowRun, issue: Issue) {
    let issue_number = run.issue_number;
    let post_failure = |tracker: Arc<dyn IssueTracker>, body: String| async move {
        if let Err(e) = tracker.post_comment(issue_number, &body).await {
            tracing::error!("failed to post failure comment: {e:#}");
        }
    };

    if !ClaudeAgent::installed() {
        tracing::error!(run_id = %run.run_id, "agent CLI is not installed");
        post_failure(
            Arc::clone(&state.tracker),
            format!("❌ Claude Code CLI is not installed (ADW ID: {})", run.run_id),
        )
        .await;
        return;
    }

    let logger = match RunLogger::new(&state.transcript_root, &run.run_id) {
        Ok(logger) => {
            tracing::debug!(run_id = %run.run_id, "run log at {}", logger.path().display());
            logger
        }
        Err(e) => {
            tracing::error!(run_id = %run.run_id, "failed to create run log: {e:#}");
            post_failure(
                Arc::clone(&state.tracker),
                format!("❌ Could not start workflow: {e:#} (ADW ID: {})", run.run_id),
            )
            .await;
            return;
        }
    };

    if let Err(e) = workflow::execute_run(
        state.tracker.as_ref(),
        state.agent.as_ref(),
        state.workspace.as_ref(),
        &state.registry,
        &mut run,
        &issue,
        &logger,
    )
    .await
    {
        // The pipeline already posted the failure comment.
        tracing::error!(
            run_id = %run.run_id,
            status = ?run.status,
            "workflow failed: {e:#}"
        );
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let provider = state.tracker.provider();
    let report = health::check(provider).await;
    Json(json!({
        "status": if report.success { "healthy" } else { "unhealthy" },
        "service": provider.service_name(),
        "health_check": report,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;
    use crate::tracker::testing::RecordingTracker;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct RefusingAgent;

    #[async_trait]
    impl AgentInvoker for RefusingAgent {
        async fn run_prompt(&self, _prompt: &str, _run_id: &str, _step: &str) -> AgentResponse {
            AgentResponse {
                success: false,
                output: "agent disabled in tests".to_string(),
                session_id: None,
            }
        }
    }

    struct NullWorkspace;

    #[async_trait]
    impl Workspace for NullWorkspace {
        async fn commit_all(&self) -> anyhow::Result<String> {
            Err(anyhow!("no workspace in tests"))
        }

        async fn locate_plan_file(&self) -> anyhow::Result<String> {
            Err(anyhow!("no workspace in tests"))
        }
    }

    fn test_state(tmp: &tempfile::TempDir) -> AppState {
        AppState {
            tracker: Arc::new(RecordingTracker::new()),
            agent: Arc::new(RefusingAgent),
            workspace: Arc::new(NullWorkspace),
            registry: CommandRegistry::from_working_dir(tmp.path()),
            transcript_root: tmp.path().join("agents"),
        }
    }

    fn github_headers(event: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", event.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn ping_is_acknowledged() {
        let tmp = tempfile::tempdir().unwrap();
        let body = Bytes::from(r#"{"zen": "Anything added dilutes everything else."}"#);
        let Json(response) =
            handle_webhook(State(test_state(&tmp)), github_headers("ping"), body).await;
        assert_eq!(response["status"], "ok");
        assert!(response["message"].as_str().unwrap().contains("pong"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_200_error_status() {
        let tmp = tempfile::tempdir().unwrap();
        let body = Bytes::from("{not json");
        let Json(response) =
            handle_webhook(State(test_state(&tmp)), github_headers("issues"), body).await;
        assert_eq!(response["status"], "error");
    }

    #[tokio::test]
    async fn missing_event_header_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let body = Bytes::from("{}");
        let Json(response) =
            handle_webhook(State(test_state(&tmp)), HeaderMap::new(), body).await;
        assert_eq!(response["status"], "ignored");
    }

    #[tokio::test]
    async fn accepted_event_reports_run_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let body = Bytes::from(r#"{"action": "opened", "issue": {"number": 42}}"#);
        let Json(response) =
            handle_webhook(State(test_state(&tmp)), github_headers("issues"), body).await;
        assert_eq!(response["status"], "accepted");
        assert_eq!(response["issue_number"], 42);
        assert_eq!(response["mode"], "full");
        assert_eq!(response["run_id"].as_str().unwrap().len(), 8);
        assert!(response["log_dir"].as_str().unwrap().contains("agents"));
    }
}
