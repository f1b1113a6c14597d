use fleet_model::CasePolicy;
use fleet_store::Store;

#[tokio::test]
async fn bootstrap_creates_schema_and_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");

    let store = Store::bootstrap(&db_path, CasePolicy::Sensitive).await.unwrap();
    let health = store.health().await.unwrap();

    assert!(health.ok);
    assert!(health.has_core_tables);
    assert!(!health.degraded);
}

#[tokio::test]
async fn reopening_with_mismatched_case_policy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");

    let _store = Store::bootstrap(&db_path, CasePolicy::Sensitive).await.unwrap();
    drop(_store);

    let reopened = Store::bootstrap(&db_path, CasePolicy::InsensitiveAscii).await;
    let err = reopened.expect_err("case policy mismatch must be fatal");
    assert_eq!(err.kind, fleet_model::ErrorKind::Corruption);
}

#[tokio::test]
async fn write_txn_commits_and_read_txn_sees_it() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let store = Store::bootstrap(&db_path, CasePolicy::Sensitive).await.unwrap();

    let mut write = store.begin_write().await.unwrap();
    sqlx::query("INSERT INTO core_metadata (key, value) VALUES ('probe', 'hello')")
        .execute(&mut *write.tx)
        .await
        .unwrap();
    write.commit().await.unwrap();
    store.note_write_committed();

    let mut read = store.begin_read().await.unwrap();
    let value: String = sqlx::query_scalar("SELECT value FROM core_metadata WHERE key = 'probe'")
        .fetch_one(&mut *read.tx)
        .await
        .unwrap();
    assert_eq!(value, "hello");
}
