//! Agent CLI invocation.

pub mod stream;
pub mod transcript;

use crate::settings::Settings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use stream::stream_command;
use tokio::process::Command;
use transcript::TranscriptWriter;

/// Binary name of the coding-agent CLI.
pub const AGENT_BINARY: &str = "claude";

/// Outcome of one agent invocation. Failures carry their detail in `output`
/// so callers can forward it verbatim into an issue comment.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
}

impl AgentResponse {
    fn failure(detail: String) -> Self {
        Self {
            success: false,
            output: detail,
            session_id: None,
        }
    }
}

/// Seam between the workflow and the agent CLI, mockable in tests.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn run_prompt(&self, prompt: &str, run_id: &str, step: &str) -> AgentResponse;

    /// Sends a slash command with positional arguments as a single prompt.
    async fn run_slash(
        &self,
        command: &str,
        args: &[String],
        run_id: &str,
        step: &str,
    ) -> AgentResponse {
        let prompt = if args.is_empty() {
            command.to_string()
        } else {
            format!("{command} {}", args.join(" "))
        };
        self.run_prompt(&prompt, run_id, step).await
    }
}

#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    model: String,
    timeout: Duration,
    transcript_root: PathBuf,
    working_dir: PathBuf,
}

impl ClaudeAgent {
    pub fn new(settings: &Settings) -> Self {
        Self {
            model: settings.model.clone(),
            timeout: settings.agent_timeout,
            transcript_root: settings.transcript_root.clone(),
            working_dir: settings.working_dir.clone(),
        }
    }

    pub fn installed() -> bool {
        which::which(AGENT_BINARY).is_ok()
    }

    fn build_command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(AGENT_BINARY);
        cmd.arg("--print")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&self.model)
            .arg("--dangerously-skip-permissions")
            .arg(prompt)
            .current_dir(&self.working_dir);
        cmd
    }
}

#[async_trait]
impl AgentInvoker for ClaudeAgent {
    async fn run_prompt(&self, prompt: &str, run_id: &str, step: &str) -> AgentResponse {
        let transcript = match TranscriptWriter::create(&self.transcript_root, run_id, step) {
            Ok(t) => t,
            Err(e) => return AgentResponse::failure(format!("{e:#}")),
        };
        tracing::debug!(run_id, step, "invoking {AGENT_BINARY}");
        match stream_command(self.build_command(prompt), transcript, self.timeout).await {
            Ok(outcome) => {
                tracing::debug!(
                    run_id,
                    step,
                    success = outcome.success,
                    "transcript at {}",
                    outcome.transcript_path.display()
                );
                AgentResponse {
                    success: outcome.success,
                    output: outcome.output,
                    session_id: outcome.session_id,
                }
            }
            Err(e) => AgentResponse::failure(format!("{e:#}")),
        }
    }
}
