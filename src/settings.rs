use std::path::PathBuf;
use std::time::Duration;

/// Default model passed to the agent CLI.
const DEFAULT_MODEL: &str = "sonnet";

/// Default per-invocation agent timeout in seconds.
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 600;

/// Runtime settings, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model name forwarded to the agent CLI via `--model`.
    pub model: String,
    /// Hard timeout for a single agent invocation.
    pub agent_timeout: Duration,
    /// Explicit tunnel id override (`DEVTUNNEL_ID`).
    pub tunnel_id: Option<String>,
    /// Working directory the workflows operate in.
    pub working_dir: PathBuf,
    /// Root directory for per-run transcripts and logs.
    pub transcript_root: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let transcript_root = working_dir.join("agents");
        Self {
            model: env_or("ADW_MODEL", DEFAULT_MODEL),
            agent_timeout: Duration::from_secs(
                std::env::var("ADW_AGENT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_AGENT_TIMEOUT_SECS),
            ),
            tunnel_id: std::env::var("DEVTUNNEL_ID").ok().filter(|v| !v.is_empty()),
            working_dir,
            transcript_root,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
