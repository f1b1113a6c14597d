//! Shared runtime state for fleet-daemon.
//!
//! A single `Clone`-able handle built once at startup and threaded through
//! every Axum handler via `State<AppState>`. Nothing here is wrapped in
//! `RwLock<...>` — all mutable state lives in the Store behind its own
//! write lock, so `AppState` itself owns no lock of its own.

use std::sync::Arc;

use fleet_checkpoint::CheckpointEngine;
use fleet_config::CoreConfig;
use fleet_locks::LockManager;
use fleet_mailbox::MailboxService;
use fleet_projections::Ledger;
use fleet_recovery::RecoveryEngine;
use fleet_store::Store;

/// Cloneable handle shared across all Axum handlers; every field is cheap
/// to clone (`Arc` or an internally-`Arc`-backed service struct).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CoreConfig>,
    pub store: Arc<Store>,
    pub ledger: Ledger,
    pub locks: LockManager,
    pub mailbox: MailboxService,
    pub checkpoints: CheckpointEngine,
    pub recovery: Arc<RecoveryEngine>,
}

impl AppState {
    pub fn new(config: CoreConfig, store: Arc<Store>) -> Self {
        let ledger = Ledger::new(Arc::clone(&store));
        let locks = LockManager::new(ledger.clone(), config.case_policy);
        let mailbox = MailboxService::new(ledger.clone());
        let checkpoints = CheckpointEngine::new(ledger.clone(), config.checkpoints_dir());
        let recovery = RecoveryEngine::new(ledger.clone(), locks.clone(), mailbox.clone(), checkpoints.clone());

        Self {
            config: Arc::new(config),
            store,
            ledger,
            locks,
            mailbox,
            checkpoints,
            recovery: Arc::new(recovery),
        }
    }
}

/// Spawn the background stale-mission scanner.
pub fn spawn_stale_mission_scanner(
    recovery: Arc<RecoveryEngine>,
    activity_threshold: chrono::Duration,
    interval: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match recovery.detect(activity_threshold).await {
                Ok(candidates) if !candidates.is_empty() => {
                    tracing::warn!(count = candidates.len(), "stale mission candidates detected");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "stale mission scan failed"),
            }
        }
    });
}
