//! Agent stream-json consumption.
//!
//! The agent CLI emits one JSON object per stdout line. Two fields matter to
//! the workflow: the session id (first occurrence wins, emitted by the init
//! message) and the final `result` text (last occurrence wins). Lines that
//! are not JSON are persisted to the transcript but otherwise ignored.

use super::transcript::TranscriptWriter;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct StreamParser {
    session_id: Option<String>,
    result: Option<String>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_line(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        if self.session_id.is_none() {
            if let Some(id) = value.get("session_id").and_then(Value::as_str) {
                self.session_id = Some(id.to_string());
            }
        }
        if let Some(result) = value.get("result").and_then(Value::as_str) {
            self.result = Some(result.to_string());
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        (self.session_id, self.result)
    }
}

#[derive(Debug)]
pub struct StreamOutcome {
    pub success: bool,
    /// Final result text on success, failure detail otherwise.
    pub output: String,
    pub session_id: Option<String>,
    pub transcript_path: PathBuf,
}

/// Spawns the command and consumes its stream-json output line by line,
/// persisting each line to the transcript as it arrives. Kills the child
/// when the deadline passes.
pub async fn stream_command(
    mut command: Command,
    mut transcript: TranscriptWriter,
    timeout: Duration,
) -> Result<StreamOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().context("failed to spawn agent process")?;
    let stdout = child.stdout.take().context("agent stdout not captured")?;
    let stderr = child.stderr.take().context("agent stderr not captured")?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut parser = StreamParser::new();
    let mut stderr_buf = String::new();
    let deadline = Instant::now() + timeout;
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut timed_out = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => match line {
                Ok(Some(line)) => {
                    if let Err(e) = transcript.append_line(&line) {
                        tracing::warn!("transcript write failed: {e:#}");
                    }
                    parser.observe_line(&line);
                }
                Ok(None) => stdout_done = true,
                Err(e) => {
                    tracing::debug!("agent stdout read error: {e}");
                    stdout_done = true;
                }
            },
            line = stderr_lines.next_line(), if !stderr_done => match line {
                Ok(Some(line)) => {
                    stderr_buf.push_str(&line);
                    stderr_buf.push('\n');
                }
                _ => stderr_done = true,
            },
            _ = tokio::time::sleep_until(deadline) => {
                timed_out = true;
                let _ = child.kill().await;
                break;
            }
        }
    }

    let session_id = parser.session_id().map(str::to_string);
    let transcript_path = transcript.finalize(session_id.as_deref())?;

    if timed_out {
        return Ok(StreamOutcome {
            success: false,
            output: format!("agent command timed out after {}s", timeout.as_secs()),
            session_id,
            transcript_path,
        });
    }

    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .context("timed out waiting for agent process exit")?
        .context("failed to reap agent process")?;

    let (session_id, result) = parser.into_parts();
    if status.success() {
        Ok(StreamOutcome {
            success: true,
            output: result.unwrap_or_default(),
            session_id,
            transcript_path,
        })
    } else {
        let detail = stderr_buf.trim();
        let output = if detail.is_empty() {
            format!("agent exited with {status}")
        } else {
            format!("agent exited with {status}: {detail}")
        };
        Ok(StreamOutcome {
            success: false,
            output,
            session_id,
            transcript_path,
        })
    }
}
