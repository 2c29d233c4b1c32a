mod agent;
mod commands;
mod dispatch;
mod health;
mod lifecycle;
mod logging;
mod run_logger;
mod server;
mod settings;
mod tracker;
mod trigger;
mod tunnel;
mod vcs;
mod workflow;

use agent::ClaudeAgent;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandRegistry;
use lifecycle::ServerLifecycle;
use settings::Settings;
use std::sync::Arc;
use tracker::{github::GitHubTracker, gitlab::GitLabTracker, IssueTracker, Provider};
use vcs::GitWorkspace;

#[derive(Parser)]
#[command(
    name = "adw",
    version,
    about = "Issue-tracker webhook watcher that drives AI developer workflows"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProviderArg {
    Github,
    Gitlab,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Github => Provider::GitHub,
            ProviderArg::Gitlab => Provider::GitLab,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook watcher server
    Watch {
        #[arg(long, value_enum, default_value_t = ProviderArg::Github)]
        provider: ProviderArg,
        /// Port for the local webhook server (default: 8001 GitHub, 8002 GitLab)
        #[arg(long)]
        port: Option<u16>,
        /// Tunnel id to use (defaults to DEVTUNNEL_ID or "<repo>-tunnel")
        #[arg(long)]
        tunnel_id: Option<String>,
        /// Remove webhook registrations and delete the tunnel, then exit
        #[arg(long)]
        remove: bool,
    },
    /// Run preflight checks and report their result
    Health {
        #[arg(long, value_enum, default_value_t = ProviderArg::Github)]
        provider: ProviderArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            provider,
            port,
            tunnel_id,
            remove,
        } => watch(provider.into(), port, tunnel_id, remove).await,
        Commands::Health { provider } => run_health(provider.into()).await,
    }
}

fn default_port(provider: Provider) -> u16 {
    match provider {
        Provider::GitHub => 8001,
        Provider::GitLab => 8002,
    }
}

async fn watch(
    provider: Provider,
    port: Option<u16>,
    tunnel_override: Option<String>,
    remove: bool,
) -> Result<()> {
    let settings = Settings::from_env();
    let workspace = GitWorkspace::new(settings.working_dir.clone());
    let remote = workspace
        .remote_url()
        .await
        .context("not inside a git repository with an origin remote")?;
    let repo_path = vcs::repo_path_from_url(&remote)
        .with_context(|| format!("could not parse a project path from remote '{remote}'"))?;
    let repo_name = vcs::repo_name_from_url(&remote);

    let tracker: Arc<dyn IssueTracker> = match provider {
        Provider::GitHub => Arc::new(GitHubTracker::new(
            repo_path.clone(),
            settings.working_dir.clone(),
        )),
        Provider::GitLab => Arc::new(GitLabTracker::new(
            repo_path.clone(),
            settings.working_dir.clone(),
        )),
    };

    let port = port.unwrap_or_else(|| default_port(provider));
    let tunnel_id = tunnel::resolve_tunnel_id(
        tunnel_override.as_deref().or(settings.tunnel_id.as_deref()),
        repo_name.as_deref(),
    );
    let lifecycle = Arc::new(ServerLifecycle::new(tunnel_id, port));

    if remove {
        tracing::info!(
            "cleaning up watcher resources for tunnel {}",
            lifecycle.tunnel_id()
        );
        return lifecycle.teardown(tracker.as_ref()).await;
    }

    if !tunnel::installed() {
        bail!("devtunnel CLI is not installed (see https://aka.ms/devtunnels/download)");
    }
    if !tunnel::authenticated().await {
        bail!("devtunnel is not authenticated; run `devtunnel user login -g`");
    }
    if !ClaudeAgent::installed() {
        tracing::warn!("claude CLI not found; workflow runs will fail until it is installed");
    }

    let endpoint = lifecycle.ensure_endpoint().await?;
    let webhook_url = format!("{}{}", endpoint.url, provider.webhook_path());

    tracing::info!(
        "tunnel {} ({})",
        lifecycle.tunnel_id(),
        if endpoint.created { "created" } else { "existing" }
    );
    tracing::info!("project: {repo_path} ({provider})");
    tracing::info!("webhook URL: {webhook_url}");
    tracing::info!("local server: http://0.0.0.0:{port}");

    let state = server::AppState {
        tracker: Arc::clone(&tracker),
        agent: Arc::new(ClaudeAgent::new(&settings)),
        workspace: Arc::new(workspace),
        registry: CommandRegistry::from_working_dir(&settings.working_dir),
        transcript_root: settings.transcript_root.clone(),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    // The provider pings the webhook URL on registration, so the host and
    // the registration are set up only once the listener is accepting.
    {
        let lifecycle = Arc::clone(&lifecycle);
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            if let Err(e) = lifecycle.start_host().await {
                tracing::error!("failed to start tunnel host: {e:#}");
                return;
            }
            if let Err(e) = crate::lifecycle::ensure_webhook(tracker.as_ref(), &webhook_url).await {
                tracing::error!("failed to configure webhook: {e:#}");
            }
        });
    }

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook server failed")?;

    lifecycle.stop_host().await;
    tracing::info!("tunnel and webhook registrations persist; use --remove to delete them");
    Ok(())
}

async fn run_health(provider: Provider) -> Result<()> {
    let report = health::check(provider).await;
    for warning in &report.warnings {
        println!("⚠️  {warning}");
    }
    for error in &report.errors {
        println!("❌ {error}");
    }
    if !report.success {
        bail!("health check failed");
    }
    println!("✅ All checks passed");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown requested");
}
