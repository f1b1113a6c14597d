//! The Coordinator API process: wires [`state::AppState`] together, attaches
//! the Axum router built in [`routes`], and spawns the background workers
//! that keep the Store, Lock Manager, and Recovery Engine healthy between
//! requests.
//!
//! `state` owns the shared handle, `routes` owns the HTTP surface,
//! `error_response`/`api_types` own the wire shapes, and this file owns
//! only the assembly — `main.rs` and `fleet-cli`'s `serve` subcommand both
//! call [`build_app`] rather than duplicating the wiring.

pub mod api_types;
pub mod error_response;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fleet_config::CoreConfig;
use fleet_store::Store;
use state::AppState;

/// A fully wired application: the Axum router plus the state it was built
/// from, in case a caller (tests, `fleet-cli serve`) needs the latter after
/// the router has taken ownership of its clone.
pub struct App {
    pub router: Router,
    pub state: AppState,
}

/// Bootstrap the Store, wire up every service, and spawn the three
/// background workers.
/// Separated from [`build_router`] so tests can build a router against an
/// already-open `Store` without also starting background tasks.
pub async fn build_app(config: CoreConfig) -> anyhow::Result<App> {
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.checkpoints_dir())?;
    std::fs::create_dir_all(config.logs_dir())?;

    let store = Arc::new(Store::bootstrap(&config.state_db_path(), config.case_policy).await?);
    let state = AppState::new(config, store);

    spawn_background_workers(&state);

    let router = build_router(state.clone());
    Ok(App { router, state })
}

/// Compose the route table with the middleware every request passes
/// through: request tracing and a permissive CORS layer. Authentication is
/// out of scope for the Core itself so no auth layer is added
/// here — an operator fronting this process with a reverse proxy is
/// expected to add one.
pub fn build_router(state: AppState) -> Router {
    routes::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn spawn_background_workers(state: &AppState) {
    Store::spawn_maintenance(Arc::clone(&state.store), state.config.sweep_interval);
    fleet_locks::LockManager::spawn_sweeper(Arc::new(state.locks.clone()), state.config.sweep_interval);
    state::spawn_stale_mission_scanner(
        Arc::clone(&state.recovery),
        chrono::Duration::from_std(state.config.heartbeat_threshold * 2).unwrap_or(chrono::Duration::seconds(240)),
        Duration::max(state.config.sweep_interval * 12, Duration::from_secs(60)),
    );
}
