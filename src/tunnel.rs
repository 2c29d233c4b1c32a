//! Microsoft devtunnel CLI operations.
//!
//! Everything goes through the `devtunnel` binary. Tunnel and port creation
//! are idempotent from this module's point of view: "already exists" and
//! "not found" responses count as success for the operation that provoked
//! them.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

pub const TUNNEL_CLI: &str = "devtunnel";

/// Vendor domain all tunnel URLs live under; also how stale webhook
/// registrations are recognized.
pub const TUNNEL_DOMAIN: &str = "devtunnels.ms";

const DEFAULT_TUNNEL_ID: &str = "webhook-tunnel";

/// Phrases in `devtunnel user show` output that mean the login is missing
/// or expired.
const LOGIN_REQUIRED_PHRASES: &[&str] = &[
    "Login token expired",
    "Login required",
    "not authenticated",
    "Not logged in",
];

pub fn installed() -> bool {
    which::which(TUNNEL_CLI).is_ok()
}

/// Explicit id beats the repo-derived name, which beats the fixed default.
pub fn resolve_tunnel_id(explicit: Option<&str>, repo_name: Option<&str>) -> String {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    if let Some(name) = repo_name.filter(|name| !name.is_empty()) {
        return format!("{name}-tunnel");
    }
    DEFAULT_TUNNEL_ID.to_string()
}

pub async fn authenticated() -> bool {
    let Ok(output) = Command::new(TUNNEL_CLI)
        .args(["user", "show"])
        .output()
        .await
    else {
        return false;
    };
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if LOGIN_REQUIRED_PHRASES.iter().any(|p| combined.contains(p)) {
        return false;
    }
    output.status.success()
}

/// `devtunnel show` output, or `None` when the tunnel does not exist.
pub async fn show(tunnel_id: &str) -> Result<Option<String>> {
    let output = Command::new(TUNNEL_CLI)
        .args(["show", tunnel_id])
        .output()
        .await
        .context("failed to run devtunnel show")?;
    if output.status.success() {
        return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.to_lowercase().contains("not found") {
        tracing::warn!("devtunnel show failed: {}", stderr.trim());
    }
    Ok(None)
}

/// Creates the tunnel with anonymous access.
pub async fn create(tunnel_id: &str) -> Result<()> {
    let output = Command::new(TUNNEL_CLI)
        .args(["create", tunnel_id, "-a"])
        .output()
        .await
        .context("failed to run devtunnel create")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("failed to create tunnel {tunnel_id}: {}", stderr.trim());
    }
    Ok(())
}

/// Adds an HTTP port forward. An existing forward on the same port is fine.
pub async fn configure_port(tunnel_id: &str, port: u16) -> Result<()> {
    let port_arg = port.to_string();
    let output = Command::new(TUNNEL_CLI)
        .args(["port", "create", tunnel_id, "-p", port_arg.as_str(), "--protocol", "http"])
        .output()
        .await
        .context("failed to run devtunnel port create")?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_lowercase().contains("already exists") {
        return Ok(());
    }
    bail!("failed to configure port {port} on {tunnel_id}: {}", stderr.trim());
}

/// Deletes the tunnel; an already-absent tunnel counts as deleted.
pub async fn delete(tunnel_id: &str) -> Result<()> {
    let output = Command::new(TUNNEL_CLI)
        .args(["delete", tunnel_id, "-f"])
        .output()
        .await
        .context("failed to run devtunnel delete")?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_lowercase().contains("not found") {
        return Ok(());
    }
    bail!("failed to delete tunnel {tunnel_id}: {}", stderr.trim());
}

/// Public URL for a port, computed from `devtunnel show` output.
pub async fn public_url(tunnel_id: &str, port: u16) -> Result<String> {
    let info = show(tunnel_id)
        .await?
        .with_context(|| format!("tunnel {tunnel_id} does not exist"))?;
    parse_public_url(&info, port)
        .with_context(|| format!("could not parse tunnel host from devtunnel show {tunnel_id}"))
}

/// The show output carries a line `Tunnel ID: <name>.<region>`; the public
/// URL for a port is `https://<name>-<port>.<region>.devtunnels.ms`.
pub fn parse_public_url(show_output: &str, port: u16) -> Option<String> {
    let full_id = show_output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Tunnel ID"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, id)| id.trim())?;
    let (name, region) = full_id.split_once('.')?;
    if name.is_empty() || region.is_empty() {
        return None;
    }
    let region = region.strip_suffix(&format!(".{TUNNEL_DOMAIN}")).unwrap_or(region);
    Some(format!("https://{name}-{port}.{region}.{TUNNEL_DOMAIN}"))
}

/// Spawns `devtunnel host` with piped stdout for the readiness scan.
pub fn start_host(tunnel_id: &str) -> Result<Child> {
    Command::new(TUNNEL_CLI)
        .args(["host", tunnel_id])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to start devtunnel host")
}

/// Consumes host output until a readiness line appears or the deadline
/// passes. Returns whether the host reported ready.
pub async fn scan_for_ready<R: AsyncRead + Unpin>(reader: R, timeout: Duration) -> bool {
    let mut lines = BufReader::new(reader).lines();
    let deadline = Instant::now() + timeout;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let lower = line.to_lowercase();
                    if lower.contains("error") || lower.contains("failed") {
                        tracing::warn!("tunnel host: {line}");
                    }
                    if line.contains("Starting tunnel host")
                        || line.contains("Ready to accept connections")
                    {
                        return true;
                    }
                }
                _ => return false,
            },
            _ = tokio::time::sleep_until(deadline) => return false,
        }
    }
}
