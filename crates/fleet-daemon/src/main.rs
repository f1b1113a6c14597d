//! Coordinator API process entrypoint.
//!
//! Loads [`CoreConfig`] from the environment, initializes tracing, bootstraps
//! the Store, and serves the Axum router until it receives SIGINT/SIGTERM.

use std::net::SocketAddr;

use fleet_config::CoreConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = CoreConfig::from_env()?;
    init_tracing(&config);

    tracing::info!(data_dir = %config.data_dir.display(), "starting fleet-daemon");

    let app = fleet_daemon::build_app(config).await?;

    let addr: SocketAddr = std::env::var("FLEET_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:4287".to_string())
        .parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "fleet-daemon listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("fleet-daemon shut down");
    Ok(())
}

fn init_tracing(config: &CoreConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
