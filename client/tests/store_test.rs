//! Integration tests for the local store lifecycle and entry storage.

mod common;

use common::{entry, open_store};
use lexicon_client::{Error, LocalStoreManager, PushAck, StoreState};
use lexicon_engine::{Checkpoint, Record, RemoteRecord, SyncStatus};

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn reset_twice_is_harmless() {
    let (dir, store) = open_store().await;
    let path = dir.path().join("lexicon.db");
    store.create_local(entry("apple")).await.unwrap();

    store.reset().await.unwrap();
    store.reset().await.unwrap();

    assert_eq!(store.state(), StoreState::Closed);
    assert!(!path.exists());
    assert!(!dir.path().join("lexicon.db-wal").exists());
}

#[tokio::test]
async fn reset_before_init() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStoreManager::new(dir.path().join("lexicon.db"), 1);

    store.reset().await.unwrap();
    assert_eq!(store.state(), StoreState::Closed);
}

#[tokio::test]
async fn stale_pool_after_reset() {
    let (_dir, store) = open_store().await;
    let stale = store.pool().await.unwrap();

    store.reset().await.unwrap();

    assert!(stale.is_closed());
    let err: Error = sqlx::query("SELECT 1")
        .execute(&stale)
        .await
        .unwrap_err()
        .into();
    assert!(matches!(err, Error::DatabaseNotInitialized));

    assert!(matches!(store.pool().await, Err(Error::DatabaseNotInitialized)));
    assert!(matches!(store.get("anything").await, Err(Error::DatabaseNotInitialized)));
    assert!(matches!(
        store.create_local(entry("apple")).await,
        Err(Error::DatabaseNotInitialized)
    ));
}

#[tokio::test]
async fn reopen_after_reset_starts_empty() {
    let (_dir, store) = open_store().await;
    store.create_local(entry("apple")).await.unwrap();
    store.reset().await.unwrap();

    store.init().await.unwrap();
    assert_eq!(store.state(), StoreState::Connected);
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.checkpoint().await.unwrap().is_initial());
}

#[tokio::test]
async fn unopenable_path_fails_to_connect() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file
    let store = LocalStoreManager::new(dir.path(), 1);

    let err = store.init().await.unwrap_err();
    assert!(matches!(err, Error::DatabaseConnection(_)), "got {:?}", err);
    assert!(err.is_displayable());
    assert_eq!(store.state(), StoreState::ConnectionFailed);
    assert!(matches!(store.pool().await, Err(Error::DatabaseNotInitialized)));
}

#[tokio::test]
async fn checkpoint_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lexicon.db");
    let checkpoint = Checkpoint::at(1706745600000, "entry_with_underscores");

    let first = LocalStoreManager::new(&path, 1);
    first.init().await.unwrap();
    assert!(first.checkpoint().await.unwrap().is_initial());
    first.save_checkpoint(&checkpoint).await.unwrap();
    first.pool().await.unwrap().close().await;

    let second = LocalStoreManager::new(&path, 1);
    second.init().await.unwrap();
    assert_eq!(second.checkpoint().await.unwrap(), checkpoint);
}

#[tokio::test]
async fn corrupt_checkpoint_restarts_from_beginning() {
    let (_dir, store) = open_store().await;
    let pool = store.pool().await.unwrap();
    sqlx::query("INSERT INTO sync_checkpoint (id, token) VALUES (1, 'garbage')")
        .execute(&pool)
        .await
        .unwrap();

    assert!(store.checkpoint().await.unwrap().is_initial());
}

// ============================================================================
// Entries
// ============================================================================

#[tokio::test]
async fn local_edits_stay_pending() {
    let (_dir, store) = open_store().await;

    let created = store.create_local(entry("apple")).await.unwrap();
    assert_eq!(created.version, 1);
    assert!(created.is_pending());

    let updated = store
        .update_local(&created.key, entry("apples"))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert!(updated.metadata.updated_at > created.metadata.updated_at);
    assert_eq!(store.get(&created.key).await.unwrap(), Some(updated.clone()));

    let deleted = store.delete_local(&created.key).await.unwrap();
    assert!(deleted.deleted);
    assert_eq!(deleted.version, 3);

    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(store.pending_count().await.unwrap(), 1);
    assert_eq!(store.pending().await.unwrap(), vec![deleted.clone()]);

    // Deleting again keeps the tombstone as it is
    assert_eq!(store.delete_local(&created.key).await.unwrap(), deleted);
}

#[tokio::test]
async fn missing_entries() {
    let (_dir, store) = open_store().await;

    assert_eq!(store.get("nope").await.unwrap(), None);
    assert!(matches!(
        store.update_local("nope", entry("x")).await,
        Err(Error::RecordNotFound(key)) if key == "nope"
    ));
    assert!(matches!(
        store.delete_local("nope").await,
        Err(Error::RecordNotFound(_))
    ));

    let created = store.create_local(entry("apple")).await.unwrap();
    store.delete_local(&created.key).await.unwrap();
    assert!(matches!(
        store.update_local(&created.key, entry("x")).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn non_object_payload_is_rejected() {
    let (_dir, store) = open_store().await;

    let err = store
        .create_local(serde_json::json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn mark_synced_skips_reedited_entries() {
    let (_dir, store) = open_store().await;

    let pushed = store.create_local(entry("apple")).await.unwrap();
    let edited = store.update_local(&pushed.key, entry("apples")).await.unwrap();
    let ack = PushAck {
        key: pushed.key.clone(),
        version: 7,
    };

    // The pushed value is no longer the local one
    assert!(!store.mark_synced(&pushed, &ack).await.unwrap());
    assert_eq!(store.pending_count().await.unwrap(), 1);

    assert!(store.mark_synced(&edited, &ack).await.unwrap());
    let stored = store.get(&pushed.key).await.unwrap().unwrap();
    assert_eq!(stored.version, 7);
    assert_eq!(stored.metadata.sync_status, SyncStatus::Synced);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn get_many_skips_undecodable_rows() {
    let (_dir, store) = open_store().await;
    let good = store.create_local(entry("apple")).await.unwrap();
    common::insert_raw(&store, "broken", "{not json", "synced").await;

    let keys = vec![good.key.clone(), "broken".to_string(), "missing".to_string()];
    let found = store.get_many(&keys).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found.get(&good.key), Some(&good));
}

// ============================================================================
// Remote application
// ============================================================================

#[tokio::test]
async fn apply_remote_writes_record_and_checkpoint() {
    let (_dir, store) = open_store().await;
    let remote = RemoteRecord::new("k1", 3, entry("pear"), 1000);
    let record = Record::from_remote(&remote);

    assert!(store
        .apply_remote(&record, None, &remote.checkpoint())
        .await
        .unwrap());

    assert_eq!(store.get("k1").await.unwrap(), Some(record));
    assert_eq!(store.checkpoint().await.unwrap(), Checkpoint::at(1000, "k1"));
}

#[tokio::test]
async fn apply_remote_keeps_concurrent_local_edit() {
    let (_dir, store) = open_store().await;
    let base = store.create_local(entry("apple")).await.unwrap();
    let edited = store.update_local(&base.key, entry("apples")).await.unwrap();

    let remote = RemoteRecord::new(base.key.clone(), 5, entry("remote apple"), 2000);
    let mut adopted = base.clone();
    adopted.adopt_remote(&remote);

    let applied = store
        .apply_remote(&adopted, Some(&base), &remote.checkpoint())
        .await
        .unwrap();

    assert!(!applied);
    assert_eq!(store.get(&base.key).await.unwrap(), Some(edited));
    // The feed position still moves on
    assert_eq!(store.checkpoint().await.unwrap(), remote.checkpoint());
}
