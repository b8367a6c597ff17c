use anyhow::Context as _;
use axum::{Json, Router, extract::State, routing::get, routing::post};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod host_impl;
mod server;

use server::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI arguments for the standalone proxy host.
#[derive(Parser, Debug, Clone)]
#[command(name = "edgeline-proxyd")]
#[command(
    version,
    about = "Standalone MCP proxy: one /mcp endpoint delegating to a backend MCP server"
)]
struct CliArgs {
    /// Path to the proxy config file (YAML).
    #[arg(short = 'c', long = "config", env = "EDGELINE_PROXYD_CONFIG")]
    config: PathBuf,

    /// HTTP bind address (ip:port).
    #[arg(
        short = 'b',
        long,
        env = "EDGELINE_PROXYD_BIND",
        default_value = "127.0.0.1:4100"
    )]
    bind: String,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "EDGELINE_PROXYD_LOG",
        default_value = "info"
    )]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting edgeline-proxyd v{VERSION}");
    run(args).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let yaml = std::fs::read_to_string(&args.config)
        .with_context(|| format!("read config {}", args.config.display()))?;
    let mut config =
        edgeline_mcp_proxy::ProxyConfig::from_yaml(&yaml).context("parse proxy config")?;

    // Operational escape hatch: bump the backend timeout without a config
    // rollout.
    if let Some(timeout_ms) = edgeline_env::positive_u64("EDGELINE_PROXYD_TIMEOUT_MS") {
        tracing::info!(timeout_ms, "backend timeout overridden from environment");
        config.server.timeout = timeout_ms;
    }

    tracing::info!(
        server = %config.server.name,
        backend = %config.server.mcp_server_url,
        transport = ?config.server.transport,
        "proxy configured"
    );

    let state = Arc::new(AppState {
        config: Arc::new(config),
        http: reqwest::Client::builder()
            .build()
            .context("build http client")?,
        version: VERSION,
        start_time: Instant::now(),
    });

    let app = Router::new()
        .route("/mcp", post(server::handle_mcp))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/map", get(map))
        .with_state(state);

    let addr: SocketAddr = args.bind.parse().context("parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: &'static str,
    uptime_secs: u64,
    server_name: String,
    backend_url: String,
    transport: &'static str,
    configured_tools: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version,
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_name: state.config.server.name.clone(),
        backend_url: state.config.server.mcp_server_url.clone(),
        transport: match state.config.server.transport {
            edgeline_mcp_proxy::Transport::Http => "http",
            edgeline_mcp_proxy::Transport::Sse => "sse",
        },
        configured_tools: state.config.tools.len(),
    })
}

#[derive(Serialize)]
struct MapResponse {
    tools: Vec<serde_json::Value>,
}

/// GET /map - the configured tool catalog with generated input schemas.
async fn map(State(state): State<Arc<AppState>>) -> Json<MapResponse> {
    Json(MapResponse {
        tools: edgeline_mcp_proxy::tools::catalog_entries(&state.config.tools),
    })
}
