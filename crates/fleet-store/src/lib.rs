//! The Store — sqlite pool, WAL pragmas, startup schema
//! application, and the `ReadTxn`/`WriteTxn` primitives every other crate in
//! the workspace builds on.
//!
//! Backed by `sqlx::SqlitePool` because the Core owns an embedded,
//! single-file database rather than pointing at a running server process.
//! The single-writer transaction discipline — the Store's write lock is
//! the sole serialization point — is an async `tokio::sync::Mutex` held
//! for the duration of one write transaction, so the authoritative
//! conflict check always runs inside the same transaction as the write
//! it guards.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fleet_model::{CasePolicy, CoreError, CoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// `core_metadata` key recording the case-fold policy chosen at first boot.
const METADATA_CASE_POLICY: &str = "case_policy";
/// `core_metadata` key recording the schema revision this database was
/// created with. A mismatch on a later boot is fatal.
const METADATA_SCHEMA_VERSION: &str = "schema_version";
const CURRENT_SCHEMA_VERSION: &str = "1";

/// A write transaction, holding the Store's single-writer lock for its
/// entire lifetime. Dropping it without calling [`WriteTxn::commit`] rolls
/// back, matching sqlx's `Transaction` drop semantics.
pub struct WriteTxn<'s> {
    _guard: MutexGuard<'s, ()>,
    pub tx: Transaction<'static, Sqlite>,
}

impl<'s> WriteTxn<'s> {
    pub async fn commit(self) -> CoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| CoreError::transient(format!("commit failed: {e}")))
    }

    pub async fn rollback(self) -> CoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| CoreError::transient(format!("rollback failed: {e}")))
    }
}

/// A read transaction. Reads never contend with the write lock: SQLite's
/// WAL mode gives every reader a consistent snapshot via MVCC.
pub struct ReadTxn {
    pub tx: Transaction<'static, Sqlite>,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub ok: bool,
    pub degraded: bool,
    pub has_core_tables: bool,
    pub wal_size_bytes: u64,
}

/// The embedded SQL database plus the single-writer serialization point.
pub struct Store {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    db_path: std::path::PathBuf,
    /// Incremented on every committed write; drives `maintain()`'s periodic
    /// WAL checkpoint cadence.
    writes_since_checkpoint: AtomicU64,
}

/// Threshold above which `health()` reports the Store as degraded because
/// the WAL file has grown past a size we consider healthy.
const WAL_DEGRADED_BYTES: u64 = 64 * 1024 * 1024;
/// How many committed writes trigger an incremental WAL checkpoint.
const CHECKPOINT_EVERY_N_WRITES: u64 = 500;

impl Store {
    /// Open (creating if absent) the database at `db_path`, apply pragmas,
    /// and run the schema in one transaction. Fatal on a `schema_version`
    /// or `case_policy` mismatch against what was recorded at first boot.
    pub async fn bootstrap(db_path: &Path, case_policy: CasePolicy) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::internal(format!("create_dir_all {parent:?}: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::internal(format!("failed to open {db_path:?}: {e}")))?;

        let store = Store {
            pool,
            write_lock: Mutex::new(()),
            db_path: db_path.to_path_buf(),
            writes_since_checkpoint: AtomicU64::new(0),
        };

        store.apply_schema().await?;
        store.reconcile_metadata(case_policy).await?;

        info!(path = %db_path.display(), "store bootstrapped");
        Ok(store)
    }

    /// Applies `schema.sql` as one transaction.
    async fn apply_schema(&self) -> CoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::internal(format!("begin schema txn: {e}")))?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::corruption(format!("schema application failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::internal(format!("commit schema txn: {e}")))?;
        Ok(())
    }

    /// Reads (or, on first boot, writes) the reserved `core_metadata` rows
    /// for schema version and case-fold policy; a mismatch on either is a
    /// fatal `CORRUPTION`-class error.
    async fn reconcile_metadata(&self, case_policy: CasePolicy) -> CoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::internal(format!("begin metadata txn: {e}")))?;

        let existing_version: Option<String> =
            sqlx::query_scalar("SELECT value FROM core_metadata WHERE key = ?")
                .bind(METADATA_SCHEMA_VERSION)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::internal(format!("read schema_version: {e}")))?;

        match existing_version {
            None => {
                sqlx::query(
                    "INSERT INTO core_metadata (key, value) VALUES (?, ?)",
                )
                .bind(METADATA_SCHEMA_VERSION)
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::internal(format!("write schema_version: {e}")))?;
            }
            Some(v) if v == CURRENT_SCHEMA_VERSION => {}
            Some(v) => {
                return Err(CoreError::corruption(format!(
                    "schema_version mismatch: database has {v:?}, server expects {CURRENT_SCHEMA_VERSION:?}; refusing to start"
                )));
            }
        }

        let existing_policy: Option<String> =
            sqlx::query_scalar("SELECT value FROM core_metadata WHERE key = ?")
                .bind(METADATA_CASE_POLICY)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::internal(format!("read case_policy: {e}")))?;

        match existing_policy {
            None => {
                sqlx::query("INSERT INTO core_metadata (key, value) VALUES (?, ?)")
                    .bind(METADATA_CASE_POLICY)
                    .bind(case_policy.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| CoreError::internal(format!("write case_policy: {e}")))?;
            }
            Some(v) if v == case_policy.as_str() => {}
            Some(v) => {
                return Err(CoreError::corruption(format!(
                    "case_policy mismatch: database was created with {v:?}, configured policy is {:?}; refusing to start",
                    case_policy.as_str()
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::internal(format!("commit metadata txn: {e}")))?;
        Ok(())
    }

    /// Begin the single write transaction. Blocks (suspends) until any
    /// concurrent writer completes.
    pub async fn begin_write(&self) -> CoreResult<WriteTxn<'_>> {
        let guard = self.write_lock.lock().await;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::transient(format!("begin write txn: {e}")))?;
        Ok(WriteTxn { _guard: guard, tx })
    }

    /// Begin a read transaction. Never blocks on the write lock.
    pub async fn begin_read(&self) -> CoreResult<ReadTxn> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::transient(format!("begin read txn: {e}")))?;
        Ok(ReadTxn { tx })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Called by the caller after a successful `WriteTxn::commit` so
    /// `maintain()` can decide whether to checkpoint the WAL.
    pub fn note_write_committed(&self) {
        self.writes_since_checkpoint.fetch_add(1, Ordering::Relaxed);
    }

    /// `SELECT 1` plus a table-existence probe, reporting degraded if the
    /// WAL file exceeds [`WAL_DEGRADED_BYTES`].
    pub async fn health(&self) -> CoreResult<HealthReport> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::transient(format!("health SELECT 1 failed: {e}")))?;

        let has_core_tables: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type='table' AND name='events')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::transient(format!("health table probe failed: {e}")))?;

        let wal_size_bytes = wal_file_size(&self.db_path);
        let degraded = wal_size_bytes > WAL_DEGRADED_BYTES;

        Ok(HealthReport {
            ok: one == 1 && has_core_tables,
            degraded,
            has_core_tables,
            wal_size_bytes,
        })
    }

    /// Periodic maintenance: an incremental WAL checkpoint every
    /// [`CHECKPOINT_EVERY_N_WRITES`] writes, plus an opportunistic `VACUUM`
    /// when the caller believes the database is idle.
    pub async fn maintain(&self, idle: bool) -> CoreResult<()> {
        let writes = self.writes_since_checkpoint.load(Ordering::Relaxed);
        if writes >= CHECKPOINT_EVERY_N_WRITES {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::transient(format!("wal_checkpoint failed: {e}")))?;
            self.writes_since_checkpoint.store(0, Ordering::Relaxed);
            info!(writes, "incremental wal checkpoint");
        }

        if idle {
            sqlx::query("VACUUM")
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::transient(format!("vacuum failed: {e}")))?;
        }

        Ok(())
    }

    /// Spawn the periodic maintenance task; terminates on server shutdown
    /// once its current transaction completes.
    pub fn spawn_maintenance(store: std::sync::Arc<Store>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = store.maintain(false).await {
                    warn!(error = %e, "periodic maintenance failed");
                }
            }
        });
    }
}

fn wal_file_size(db_path: &Path) -> u64 {
    let mut wal_path = db_path.as_os_str().to_owned();
    wal_path.push("-wal");
    std::fs::metadata(std::path::Path::new(&wal_path))
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Helper used by every other crate to decode a stored row's timestamp
/// column without repeating the chrono parse boilerplate at every call
/// site.
pub fn get_datetime(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> CoreResult<chrono::DateTime<chrono::Utc>> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| CoreError::internal(format!("column {column}: {e}")))?;
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| CoreError::corruption(format!("column {column} has invalid timestamp {raw:?}: {e}")))
}

pub fn get_optional_datetime(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> CoreResult<Option<chrono::DateTime<chrono::Utc>>> {
    let raw: Option<String> = row
        .try_get(column)
        .map_err(|e| CoreError::internal(format!("column {column}: {e}")))?;
    raw.map(|raw| {
        chrono::DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| CoreError::corruption(format!("column {column} has invalid timestamp {raw:?}: {e}")))
    })
    .transpose()
}

/// Attempts a `TRANSIENT`-classified operation up to [`MAX_RETRY_ATTEMPTS`]
/// times with bounded exponential backoff before surfacing the error as a
/// 503. Every other error kind is returned on its first occurrence without
/// retrying.
///
/// `f` is called fresh on every attempt rather than resumed, since a rolled
/// back write transaction cannot be replayed in place — callers pass a
/// closure that opens its own `WriteTxn`/`ReadTxn` per call.
pub async fn retry_transient<F, Fut, T>(mut f: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    const MAX_RETRY_ATTEMPTS: u32 = 4;
    const INITIAL_BACKOFF: Duration = Duration::from_millis(20);

    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind.retryable() && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                let delay = INITIAL_BACKOFF * 2u32.pow(attempt);
                warn!(
                    attempt,
                    kind = err.kind.code(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying transient error with bounded backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
