//! Steward daemon: serves the engine over HTTP.
//!
//! Configuration comes from CLI flags with environment-variable fallbacks
//! (`STEWARD_*`), so the daemon can run under systemd with a plain
//! environment file. On SIGINT/SIGTERM every in-flight agent invocation is
//! cancelled and awaited before the process exits, so no agent subprocess
//! is orphaned.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use steward_core::{Config, ExecutionCoordinator};
use steward_http::AppState;

#[derive(Parser, Debug)]
#[command(name = "steward-daemon", about = "Remote operator console for a command-execution agent")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: String,

    /// Path to the agent CLI binary (env: STEWARD_AGENT_BINARY)
    #[arg(long)]
    agent_binary: Option<String>,

    /// Data directory for sessions, logs, and transcripts
    /// (env: STEWARD_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Default working directory for new sessions
    /// (env: STEWARD_WORKING_DIR)
    #[arg(long)]
    working_dir: Option<String>,

    /// Execution timeout in seconds (env: STEWARD_TIMEOUT)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Allowed user id; repeat for several (env: STEWARD_ALLOWED_USERS,
    /// comma-separated). Empty admits everyone.
    #[arg(long = "allow-user")]
    allow_user: Vec<i64>,

    /// Bearer token required on every HTTP request
    /// (env: STEWARD_AUTH_TOKEN). Unset disables authentication.
    #[arg(long)]
    auth_token: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn build_config(args: &Args) -> Config {
    let mut config = Config::default();

    if let Some(binary) = args
        .agent_binary
        .clone()
        .or_else(|| env_var("STEWARD_AGENT_BINARY"))
    {
        config.agent_binary = binary;
    }
    if let Some(dir) = args
        .data_dir
        .clone()
        .or_else(|| env_var("STEWARD_DATA_DIR").map(PathBuf::from))
    {
        config.files_dir = dir.join("files");
        config.data_dir = dir;
    }
    if let Some(dir) = args
        .working_dir
        .clone()
        .or_else(|| env_var("STEWARD_WORKING_DIR"))
    {
        config.default_working_dir = dir;
    }
    if let Some(secs) = args
        .timeout_secs
        .or_else(|| env_var("STEWARD_TIMEOUT").and_then(|v| v.parse().ok()))
    {
        config.timeout = Duration::from_secs(secs);
    }

    let mut allowed: HashSet<i64> = args.allow_user.iter().copied().collect();
    if let Some(list) = env_var("STEWARD_ALLOWED_USERS") {
        for part in list.split(',') {
            if let Ok(id) = part.trim().parse() {
                allowed.insert(id);
            }
        }
    }
    config.allowed_user_ids = allowed;

    config
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args);

    // An explicit path that doesn't exist is a misconfiguration; bail early
    // instead of failing on the first request.
    if config.agent_binary.contains('/') && !PathBuf::from(&config.agent_binary).exists() {
        log::error!("agent binary not found at {}", config.agent_binary);
        return ExitCode::FAILURE;
    }

    let auth_token = args.auth_token.clone().or_else(|| env_var("STEWARD_AUTH_TOKEN"));
    if auth_token.is_none() {
        log::warn!("no auth token configured - the HTTP API is unauthenticated");
    }

    log::info!(
        "starting steward-daemon (agent: {}, data dir: {}, timeout: {}s)",
        config.agent_binary,
        config.data_dir.display(),
        config.timeout.as_secs()
    );

    let coordinator = Arc::new(ExecutionCoordinator::new(config));
    let state = Arc::new(AppState {
        coordinator: Arc::clone(&coordinator),
        auth_token,
    });
    let app = steward_http::router(state);

    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {e}", args.listen);
            return ExitCode::FAILURE;
        }
    };
    log::info!("listening on {}", args.listen);

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        log::error!("server error: {e}");
        return ExitCode::FAILURE;
    }

    // Cancel and await every in-flight execution before exiting.
    log::info!("shutting down; cancelling in-flight executions");
    let _ = tokio::task::spawn_blocking(move || coordinator.shutdown()).await;
    log::info!("shutdown complete");

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => log::warn!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received SIGINT"),
        _ = terminate => log::info!("received SIGTERM"),
    }
}
