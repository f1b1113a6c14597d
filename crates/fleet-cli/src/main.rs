//! `fleet-cli`: the two operational entrypoints onto a Coordination Core
//! process. This is not a general command dispatcher for missions, sorties,
//! or locks — that surface lives entirely behind the HTTP API, so this
//! binary only boots the daemon and probes it.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleet-cli", about = "Operate a FleetTools Coordination Core process")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the Coordinator API in this process, loading configuration from
    /// the environment exactly as `fleet-daemon` does.
    Serve,
    /// Probe a running Core's `/api/v1/health` endpoint and exit non-zero if
    /// it is unreachable or reports anything other than `ok`.
    Health {
        #[arg(long, default_value = "http://127.0.0.1:4287")]
        addr: String,
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::Health { addr, timeout_secs } => health(&addr, timeout_secs).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = fleet_config::CoreConfig::from_env()?;
    tracing::info!(data_dir = %config.data_dir.display(), "fleet-cli serve: booting Core in-process");

    let app = fleet_daemon::build_app(config).await?;

    let addr: SocketAddr = std::env::var("FLEET_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4287".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "fleet-cli serve: listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

async fn health(addr: &str, timeout_secs: u64) -> anyhow::Result<()> {
    let url = format!("{}/api/v1/health", addr.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let response = client.get(&url).send().await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or(serde_json::json!({}));

    if !status.is_success() {
        anyhow::bail!("health check at {url} failed: HTTP {status}: {body}");
    }

    let health_status = body.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
    println!("{body}");

    if health_status != "ok" {
        anyhow::bail!("Core at {url} reports status {health_status:?}");
    }

    Ok(())
}
