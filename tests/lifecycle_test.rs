//! Store lifecycle: open, migrate, close, reopen

use tempfile::TempDir;
use trueno_runlog::experiment::{NewLog, NewRun};
use trueno_runlog::{Error, ExperimentFilter, LogFilter, LogStore, RunFilter, StoreConfig};

#[tokio::test]
async fn test_migrate_twice() {
    let store = LogStore::open(StoreConfig::in_memory()).unwrap();
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();

    store.add_experiment("after-migrate").await.unwrap();
}

#[tokio::test]
async fn test_operations_before_migrate_fail() {
    let store = LogStore::open(StoreConfig::in_memory()).unwrap();
    let err = store.add_experiment("too-early").await.unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let store = LogStore::open(StoreConfig::in_memory()).unwrap();
    store.migrate().await.unwrap();

    store.close().await.unwrap();
    store.close().await.unwrap();

    let err = store.add_experiment("closed").await.unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert_eq!(err.code(), "CLOSED");

    let err = store
        .get_logs(&LogFilter::all())
        .collect_all()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
}

#[tokio::test]
async fn test_close_affects_clones() {
    let store = LogStore::open(StoreConfig::in_memory()).unwrap();
    store.migrate().await.unwrap();
    let clone = store.clone();

    store.close().await.unwrap();
    assert!(matches!(
        clone.get_experiments(&ExperimentFilter::all()).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_zero_page_size_rejected() {
    let err = LogStore::builder().page_size(0).open().unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runs.db");

    let (experiment_id, run_id) = {
        let store = LogStore::open(StoreConfig::with_path(&path)).unwrap();
        store.migrate().await.unwrap();
        let experiment = store.add_experiment("persisted").await.unwrap();
        let run = store
            .add_run(NewRun::new(experiment.experiment_id()).name("p01"))
            .await
            .unwrap();
        store
            .add_logs(run.run_id(), vec![NewLog::new(1, "trial"), NewLog::new(3, "trial")])
            .await
            .unwrap();
        store.close().await.unwrap();
        (experiment.experiment_id().to_string(), run.run_id().to_string())
    };

    let store = LogStore::builder().path(&path).open().unwrap();
    store.migrate().await.unwrap();

    let experiment = store.get_experiment(&experiment_id).await.unwrap();
    assert_eq!(experiment.name(), "persisted");
    let run = store.get_run(&run_id).await.unwrap();
    assert_eq!(run.name(), Some("p01"));

    let missing = store.get_missing_logs(&RunFilter::all()).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].run_id, run_id);
    assert_eq!(missing[0].number, 2);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_id_key_changes_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keyed.db");

    let store = LogStore::builder().path(&path).id_key(1).open().unwrap();
    store.migrate().await.unwrap();
    let experiment = store.add_experiment("keyed").await.unwrap();
    store.close().await.unwrap();

    let store = LogStore::builder().path(&path).id_key(2).open().unwrap();
    store.migrate().await.unwrap();
    let listed = store.get_experiments(&ExperimentFilter::all()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_ne!(listed[0].experiment_id(), experiment.experiment_id());
    assert_eq!(
        store.get_experiment(experiment.experiment_id()).await.unwrap_err().code(),
        "NOT_FOUND"
    );
}

#[tokio::test]
async fn test_newer_schema_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
    }

    let store = LogStore::open(StoreConfig::with_path(&path)).unwrap();
    let err = store.migrate().await.unwrap_err();
    assert!(matches!(err, Error::MigrationFailed(_)));
}

#[test]
fn test_builder_collects_config() {
    let builder = LogStore::builder()
        .path("/tmp/runs.db")
        .page_size(64)
        .busy_timeout_ms(250)
        .max_pending_logs(10)
        .id_key(7);
    let config = builder.config();
    assert_eq!(config.page_size, 64);
    assert_eq!(config.busy_timeout_ms, 250);
    assert_eq!(config.max_pending_logs, 10);
    assert_eq!(config.id_key, 7);
    assert!(config.path.is_some());
}
