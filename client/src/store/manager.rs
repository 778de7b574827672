//! Lifecycle and data access for the local SQLite store.

use super::entries::{self, StoredEntry};
use crate::error::{Error, Result};
use crate::remote::PushAck;
use lexicon_engine::{Checkpoint, EntryKey, Record, Timestamp};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Keys per `IN (...)` query, well under SQLite's bound-parameter limit.
const KEY_CHUNK: usize = 500;

/// Connection state of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreState {
    Uninitialized,
    Connected,
    ConnectionFailed,
    Closed,
}

/// Owns the session's connection pool.
///
/// Other components never keep the pool. Every operation asks the manager for
/// it again, so a store that was reset is reported as not initialized.
#[derive(Debug)]
pub struct LocalStoreManager {
    path: PathBuf,
    max_connections: u32,
    pool: RwLock<Option<SqlitePool>>,
    state: watch::Sender<StoreState>,
}

impl LocalStoreManager {
    pub fn new(path: impl Into<PathBuf>, max_connections: u32) -> Self {
        let (state, _) = watch::channel(StoreState::Uninitialized);
        Self {
            path: path.into(),
            max_connections: max_connections.max(1),
            pool: RwLock::new(None),
            state,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StoreState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Open the database, run migrations and check it answers queries.
    ///
    /// Calling this while connected does nothing.
    pub async fn init(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            if !pool.is_closed() && self.state() == StoreState::Connected {
                return Ok(());
            }
        }

        match self.connect().await {
            Ok(pool) => {
                *guard = Some(pool);
                self.state.send_replace(StoreState::Connected);
                tracing::info!(path = %self.path.display(), "Local store connected");
                Ok(())
            }
            Err(err) => {
                *guard = None;
                self.state.send_replace(StoreState::ConnectionFailed);
                tracing::warn!(path = %self.path.display(), "Local store failed to open: {}", err);
                Err(err)
            }
        }
    }

    async fn connect(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|err| Error::DatabaseConnection(Arc::new(err)))?;

        tracing::debug!("Running local store migrations...");
        if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
            pool.close().await;
            return Err(err.into());
        }

        if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(Error::DatabaseConnection(Arc::new(err)));
        }

        Ok(pool)
    }

    /// Close the pool and delete the database files.
    ///
    /// Safe to call repeatedly.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_none() && self.state() == StoreState::Closed {
            return Ok(());
        }

        if let Some(pool) = guard.take() {
            pool.close().await;
        }

        for path in self.database_files() {
            remove_if_file(&path).await?;
        }

        self.state.send_replace(StoreState::Closed);
        tracing::info!(path = %self.path.display(), "Local store reset");
        Ok(())
    }

    fn database_files(&self) -> [PathBuf; 3] {
        let with_suffix = |suffix: &str| {
            let mut name: OsString = self.path.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        [self.path.clone(), with_suffix("-wal"), with_suffix("-shm")]
    }

    /// The live pool, re-validated on every call.
    pub async fn pool(&self) -> Result<SqlitePool> {
        let guard = self.pool.read().await;
        let state = self.state();
        match guard.as_ref() {
            Some(pool) if state == StoreState::Connected && !pool.is_closed() => Ok(pool.clone()),
            _ => Err(Error::DatabaseNotInitialized),
        }
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    /// Get an entry by key, tombstones included.
    pub async fn get(&self, key: &str) -> Result<Option<Record>> {
        let pool = self.pool().await?;
        match entries::fetch_entry(&pool, key).await? {
            Some(stored) => Ok(Some(stored.to_record()?)),
            None => Ok(None),
        }
    }

    /// Get entries by key. Rows that cannot be decoded are left out.
    pub async fn get_many(&self, keys: &[EntryKey]) -> Result<HashMap<EntryKey, Record>> {
        let pool = self.pool().await?;
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(KEY_CHUNK) {
            for stored in entries::fetch_entries(&pool, chunk).await? {
                if let Some(record) = decode_or_warn(&stored) {
                    found.insert(record.key.clone(), record);
                }
            }
        }

        Ok(found)
    }

    /// Create a new local entry with a generated key.
    pub async fn create_local(&self, payload: serde_json::Value) -> Result<Record> {
        let key = uuid::Uuid::new_v4().to_string();
        let record = Record::new_local(key, payload, now_millis());
        record.validate_shape()?;

        let pool = self.pool().await?;
        entries::upsert_entry(&pool, &record).await?;
        tracing::debug!(key = %record.key, "Created local entry");
        Ok(record)
    }

    /// Replace the payload of an existing entry.
    pub async fn update_local(&self, key: &str, payload: serde_json::Value) -> Result<Record> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut record = match entries::fetch_entry(&mut *tx, key).await? {
            Some(stored) => stored.to_record()?,
            None => return Err(Error::RecordNotFound(key.to_string())),
        };
        if record.deleted {
            return Err(Error::RecordNotFound(key.to_string()));
        }

        record.edit_local(payload, now_millis());
        record.validate_shape()?;
        entries::upsert_entry(&mut *tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    /// Delete an entry locally, leaving a tombstone to sync.
    pub async fn delete_local(&self, key: &str) -> Result<Record> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut record = match entries::fetch_entry(&mut *tx, key).await? {
            Some(stored) => stored.to_record()?,
            None => return Err(Error::RecordNotFound(key.to_string())),
        };
        if record.deleted {
            return Ok(record);
        }

        record.delete_local(now_millis());
        entries::upsert_entry(&mut *tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    /// Store a record adopted from the remote and advance the checkpoint,
    /// atomically.
    ///
    /// `base` is the local row the record was planned against. If the row
    /// changed since, it is left alone and `false` is returned; the checkpoint
    /// still advances.
    pub async fn apply_remote(
        &self,
        record: &Record,
        base: Option<&Record>,
        checkpoint: &Checkpoint,
    ) -> Result<bool> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let current = entries::fetch_entry(&mut *tx, &record.key).await?;
        let unchanged = match (&current, base) {
            (None, None) => true,
            (Some(stored), Some(base)) => stored.is_revision_of(base),
            // Planned against a row that could not be decoded
            (Some(stored), None) => stored.to_record().is_err(),
            (None, Some(_)) => false,
        };

        if unchanged {
            entries::upsert_entry(&mut *tx, record).await?;
        }
        entries::save_checkpoint(&mut *tx, &checkpoint.to_string()).await?;
        tx.commit().await?;

        Ok(unchanged)
    }

    /// Mark a pushed record as synced at the acknowledged version.
    ///
    /// Returns `false` if the entry was edited again after the push.
    pub async fn mark_synced(&self, record: &Record, ack: &PushAck) -> Result<bool> {
        let pool = self.pool().await?;
        let updated = entries::mark_synced(
            &pool,
            &record.key,
            record.metadata.updated_at as i64,
            ack.version as i64,
        )
        .await?;
        Ok(updated)
    }

    /// Entries with unpushed local edits, oldest first.
    pub async fn pending(&self) -> Result<Vec<Record>> {
        let pool = self.pool().await?;
        let rows = entries::fetch_pending(&pool).await?;
        Ok(rows.iter().filter_map(decode_or_warn).collect())
    }

    /// The persisted checkpoint. A corrupt token restarts from the beginning.
    pub async fn checkpoint(&self) -> Result<Checkpoint> {
        let pool = self.pool().await?;
        let Some(token) = entries::load_checkpoint(&pool).await? else {
            return Ok(Checkpoint::initial());
        };

        let (checkpoint, err) = Checkpoint::parse_lenient(&token);
        if let Some(err) = err {
            tracing::warn!("Ignoring persisted checkpoint: {}", err);
        }
        Ok(checkpoint)
    }

    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let pool = self.pool().await?;
        entries::save_checkpoint(&pool, &checkpoint.to_string()).await?;
        Ok(())
    }

    /// Every active row, read in one transaction.
    pub async fn snapshot(&self) -> Result<Vec<StoredEntry>> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let rows = entries::fetch_active(&mut *tx).await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Number of active entries.
    pub async fn count(&self) -> Result<u64> {
        let pool = self.pool().await?;
        Ok(entries::count_active(&pool).await?.max(0) as u64)
    }

    /// Number of entries with unpushed local edits.
    pub async fn pending_count(&self) -> Result<u64> {
        let pool = self.pool().await?;
        Ok(entries::count_pending(&pool).await?.max(0) as u64)
    }
}

fn decode_or_warn(stored: &StoredEntry) -> Option<Record> {
    match stored.to_record() {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(key = %stored.key, "Skipping undecodable entry: {}", err);
            None
        }
    }
}

async fn remove_if_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        },
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
