//! Tunnel and webhook lifecycle.
//!
//! [`ServerLifecycle`] owns the tunnel endpoint and the `devtunnel host`
//! child process, and is the single place they are torn down from, whether
//! on Ctrl+C or an explicit `--remove`.

use crate::tracker::IssueTracker;
use crate::tunnel;
use anyhow::Result;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;

const HOST_READY_TIMEOUT: Duration = Duration::from_secs(10);
const HOST_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookState {
    /// A registration with the exact URL already exists.
    AlreadyConfigured,
    Created(u64),
}

/// Makes sure exactly one registration points at `webhook_url`. Re-running
/// with unchanged state performs no writes; a changed tunnel URL first
/// prunes the stale vendor-domain registrations.
pub async fn ensure_webhook(
    tracker: &dyn IssueTracker,
    webhook_url: &str,
) -> Result<WebhookState> {
    let hooks = tracker.list_webhooks().await?;
    if hooks.iter().any(|h| h.url == webhook_url) {
        tracing::info!("webhook already configured: {webhook_url}");
        return Ok(WebhookState::AlreadyConfigured);
    }
    let removed = remove_stale_webhooks(tracker).await?;
    if removed > 0 {
        tracing::info!("removed {removed} stale tunnel webhook(s)");
    }
    let id = tracker.create_webhook(webhook_url).await?;
    tracing::info!("created webhook {id}: {webhook_url}");
    Ok(WebhookState::Created(id))
}

/// Deletes every registration pointing at the tunnel vendor domain.
/// Individual delete failures are logged, not fatal.
pub async fn remove_stale_webhooks(tracker: &dyn IssueTracker) -> Result<usize> {
    let hooks = tracker.list_webhooks().await?;
    let mut removed = 0;
    for hook in hooks.iter().filter(|h| h.url.contains(tunnel::TUNNEL_DOMAIN)) {
        match tracker.delete_webhook(hook.id).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("failed to delete webhook {}: {e:#}", hook.id),
        }
    }
    Ok(removed)
}

pub struct ServerLifecycle {
    tunnel_id: String,
    port: u16,
    host: Mutex<Option<Child>>,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    /// Whether the tunnel had to be created (vs. reusing an existing one).
    pub created: bool,
}

impl ServerLifecycle {
    pub fn new(tunnel_id: String, port: u16) -> Self {
        Self {
            tunnel_id,
            port,
            host: Mutex::new(None),
        }
    }

    pub fn tunnel_id(&self) -> &str {
        &self.tunnel_id
    }

    /// Creates the tunnel if needed, configures the port forward, and
    /// returns the public base URL.
    pub async fn ensure_endpoint(&self) -> Result<Endpoint> {
        let mut created = false;
        if tunnel::show(&self.tunnel_id).await?.is_none() {
            tunnel::create(&self.tunnel_id).await?;
            created = true;
        }
        tunnel::configure_port(&self.tunnel_id, self.port).await?;
        let url = tunnel::public_url(&self.tunnel_id, self.port).await?;
        Ok(Endpoint { url, created })
    }

    /// Starts `devtunnel host` and waits for its readiness line. A host
    /// that never reports ready keeps running; the caller is warned.
    pub async fn start_host(&self) -> Result<bool> {
        let mut child = tunnel::start_host(&self.tunnel_id)?;
        let ready = match child.stdout.take() {
            Some(stdout) => tunnel::scan_for_ready(stdout, HOST_READY_TIMEOUT).await,
            None => false,
        };
        if !ready {
            tracing::warn!("tunnel host did not report ready; continuing anyway");
        }
        *self.host.lock().await = Some(child);
        Ok(ready)
    }

    /// Stops the host child: SIGTERM, a grace period, then SIGKILL.
    pub async fn stop_host(&self) {
        let Some(mut child) = self.host.lock().await.take() else {
            return;
        };
        tracing::info!("stopping tunnel host");
        terminate(&child);
        match tokio::time::timeout(HOST_STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("tunnel host exited with {status}"),
            Ok(Err(e)) => tracing::warn!("failed to reap tunnel host: {e}"),
            Err(_) => {
                tracing::warn!("tunnel host ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        }
    }

    /// Full teardown: stop the host, delete vendor-domain webhook
    /// registrations, delete the tunnel.
    pub async fn teardown(&self, tracker: &dyn IssueTracker) -> Result<()> {
        self.stop_host().await;
        let removed = remove_stale_webhooks(tracker).await?;
        tracing::info!("removed {removed} webhook registration(s)");
        tunnel::delete(&self.tunnel_id).await?;
        tracing::info!("deleted tunnel {}", self.tunnel_id);
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::testing::RecordingTracker;
    use crate::tracker::WebhookInfo;

    const URL: &str = "https://widgets-tunnel-8001.euw.devtunnels.ms/gh-webhook";

    #[tokio::test]
    async fn ensure_creates_then_is_idempotent() {
        let tracker = RecordingTracker::new();

        let first = ensure_webhook(&tracker, URL).await.unwrap();
        assert!(matches!(first, WebhookState::Created(_)));

        let second = ensure_webhook(&tracker, URL).await.unwrap();
        assert_eq!(second, WebhookState::AlreadyConfigured);

        assert_eq!(tracker.created.lock().unwrap().len(), 1);
        assert!(tracker.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_tunnel_webhooks_are_pruned_before_create() {
        let tracker = RecordingTracker::with_hooks(vec![
            WebhookInfo {
                id: 1,
                url: "https://old-tunnel-8001.euw.devtunnels.ms/gh-webhook".to_string(),
            },
            WebhookInfo {
                id: 2,
                url: "https://ci.example.com/hook".to_string(),
            },
        ]);

        let state = ensure_webhook(&tracker, URL).await.unwrap();
        assert!(matches!(state, WebhookState::Created(_)));
        // Only the vendor-domain registration went away.
        assert_eq!(*tracker.deleted.lock().unwrap(), vec![1]);
        let remaining = tracker.hooks.lock().unwrap().clone();
        assert!(remaining.iter().any(|h| h.id == 2));
        assert!(remaining.iter().any(|h| h.url == URL));
    }

    #[tokio::test]
    async fn remove_stale_counts_only_vendor_domain() {
        let tracker = RecordingTracker::with_hooks(vec![
            WebhookInfo {
                id: 5,
                url: "https://a-1.euw.devtunnels.ms/x".to_string(),
            },
            WebhookInfo {
                id: 6,
                url: "https://b-2.usw.devtunnels.ms/y".to_string(),
            },
            WebhookInfo {
                id: 7,
                url: "https://ci.example.com/hook".to_string(),
            },
        ]);
        let removed = remove_stale_webhooks(&tracker).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tracker.hooks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_host_without_child_is_a_no_op() {
        let lifecycle = ServerLifecycle::new("t".to_string(), 8001);
        lifecycle.stop_host().await;
    }
}
