//! Shared helpers for the client integration tests.

#![allow(dead_code)]

use futures::future::{BoxFuture, FutureExt};
use lexicon_client::store::now_millis;
use lexicon_client::{
    ChangeBatch, LocalStoreManager, PushAck, RemoteAuthority, RemoteError, SearchIndexHydrator,
    SyncCoordinator, UiState,
};
use lexicon_engine::{Checkpoint, ConflictPolicy, EntrySchema, Record, RemoteRecord, Timestamp};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{watch, Notify};

/// A remote call as seen by the in-memory remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Fetch from the given checkpoint token
    Fetch(String),
    /// Push of the given key
    Push(String),
}

/// Remote authority double holding the change feed in memory.
///
/// Every key keeps only its latest change, like a server change feed ordered
/// by `(updated_at, key)`.
pub struct InMemoryRemote {
    records: Mutex<BTreeMap<String, RemoteRecord>>,
    clock: Mutex<Timestamp>,
    calls: Mutex<Vec<Call>>,
    fetches: AtomicUsize,
    fail_fetch_at: Mutex<Option<usize>>,
    gate: watch::Sender<bool>,
    fetch_started: Notify,
}

impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(BTreeMap::new()),
            clock: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            fail_fetch_at: Mutex::new(None),
            gate: watch::channel(true).0,
            fetch_started: Notify::new(),
        })
    }

    /// A remote timestamp, strictly increasing and close to wall-clock time.
    pub fn tick(&self) -> Timestamp {
        let mut clock = self.clock.lock().unwrap();
        *clock = now_millis().max(*clock + 1);
        *clock
    }

    /// Add or replace a dictionary entry on the remote.
    pub fn seed(&self, key: &str, headword: &str) -> RemoteRecord {
        let version = self
            .records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        let record = RemoteRecord::new(key, version, entry(headword), self.tick());
        self.put(record.clone());
        record
    }

    /// Delete an entry on the remote.
    pub fn seed_tombstone(&self, key: &str) -> RemoteRecord {
        let version = self
            .records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        let record = RemoteRecord::tombstone(key, version, self.tick());
        self.put(record.clone());
        record
    }

    pub fn put(&self, record: RemoteRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &str) -> Option<RemoteRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Push(_)))
            .count()
    }

    /// Make the `n`th fetch (counting from 1, over the remote's lifetime) fail.
    pub fn fail_fetch_at(&self, n: usize) {
        *self.fail_fetch_at.lock().unwrap() = Some(n);
    }

    /// Hold every fetch until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until a fetch has been issued.
    pub async fn wait_for_fetch(&self) {
        self.fetch_started.notified().await;
    }

    fn page(&self, since: &Checkpoint, limit: u32) -> ChangeBatch {
        let records = self.records.lock().unwrap();
        let mut feed: Vec<&RemoteRecord> = records
            .values()
            .filter(|r| r.checkpoint() > *since)
            .collect();
        feed.sort_by_key(|r| r.checkpoint());

        let has_more = feed.len() > limit as usize;
        let page: Vec<RemoteRecord> = feed
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect();
        let checkpoint = page
            .last()
            .map(|r| r.checkpoint())
            .unwrap_or_else(|| since.clone());

        ChangeBatch {
            records: page,
            checkpoint,
            has_more,
        }
    }
}

impl RemoteAuthority for InMemoryRemote {
    fn fetch_changes_since<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
        limit: u32,
    ) -> BoxFuture<'a, Result<ChangeBatch, RemoteError>> {
        async move {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Fetch(checkpoint.to_string()));
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            self.fetch_started.notify_one();

            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;

            if *self.fail_fetch_at.lock().unwrap() == Some(n) {
                return Err(RemoteError::Unavailable("connection reset".into()));
            }
            Ok(self.page(checkpoint, limit))
        }
        .boxed()
    }

    fn push_record<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, Result<PushAck, RemoteError>> {
        async move {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Push(record.key.clone()));

            let version = self
                .get(&record.key)
                .map(|r| r.version.max(record.version) + 1)
                .unwrap_or(record.version);
            let stored = RemoteRecord {
                key: record.key.clone(),
                version,
                payload: if record.deleted {
                    serde_json::Value::Null
                } else {
                    record.payload.clone()
                },
                updated_at: self.tick(),
                deleted: record.deleted,
            };
            self.put(stored);

            Ok(PushAck {
                key: record.key.clone(),
                version,
            })
        }
        .boxed()
    }
}

/// A dictionary entry payload.
pub fn entry(headword: &str) -> serde_json::Value {
    json!({
        "headword": headword,
        "senses": [format!("meaning of {}", headword)],
    })
}

/// A store on a fresh temporary database, already initialized.
pub async fn open_store() -> (TempDir, Arc<LocalStoreManager>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStoreManager::new(dir.path().join("lexicon.db"), 2));
    store.init().await.unwrap();
    (dir, store)
}

pub fn coordinator(
    store: &Arc<LocalStoreManager>,
    remote: &Arc<InMemoryRemote>,
    ui: &UiState,
    policy: ConflictPolicy,
    pull_limit: u32,
) -> Arc<SyncCoordinator> {
    Arc::new(SyncCoordinator::new(
        Arc::clone(store),
        remote.clone(),
        ui.clone(),
        policy,
        pull_limit,
    ))
}

pub fn hydrator(store: &Arc<LocalStoreManager>, ui: &UiState) -> SearchIndexHydrator {
    SearchIndexHydrator::new(Arc::clone(store), ui.clone(), EntrySchema::dictionary(), 2)
}

/// Insert a raw row, bypassing record validation.
pub async fn insert_raw(store: &LocalStoreManager, key: &str, payload: &str, sync_status: &str) {
    let pool = store.pool().await.unwrap();
    sqlx::query(
        "INSERT INTO entries (key, version, payload, deleted, origin, sync_status, created_at, updated_at)
         VALUES (?, 1, ?, 0, 'remote', ?, 1, 1)",
    )
    .bind(key)
    .bind(payload)
    .bind(sync_status)
    .execute(&pool)
    .await
    .unwrap();
}
