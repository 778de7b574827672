//! Database operations for the entries and checkpoint tables.

use lexicon_engine::{Metadata, Origin, Record, SyncStatus};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row};

const ENTRY_COLUMNS: &str =
    "key, version, payload, deleted, origin, sync_status, created_at, updated_at";

/// A stored entry row from the database.
///
/// Columns are kept raw so a row with a corrupt payload can still be read,
/// counted, and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub version: i64,
    pub payload: String,
    pub deleted: bool,
    pub origin: String,
    pub sync_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntry {
            key: row.try_get("key")?,
            version: row.try_get("version")?,
            payload: row.try_get("payload")?,
            deleted: row.try_get("deleted")?,
            origin: row.try_get("origin")?,
            sync_status: row.try_get("sync_status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredEntry {
    /// Convert a database row to an engine record.
    pub fn to_record(&self) -> Result<Record, lexicon_engine::Error> {
        let invalid = |reason: String| lexicon_engine::Error::InvalidRecord {
            key: self.key.clone(),
            reason,
        };

        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| invalid(format!("malformed payload: {}", e)))?;
        let origin: Origin = self.origin.parse().map_err(invalid)?;
        let sync_status: SyncStatus = self.sync_status.parse().map_err(invalid)?;
        if self.version < 0 || self.created_at < 0 || self.updated_at < 0 {
            return Err(invalid("negative version or timestamp".into()));
        }

        Ok(Record {
            key: self.key.clone(),
            version: self.version as u64,
            payload,
            metadata: Metadata {
                created_at: self.created_at as u64,
                updated_at: self.updated_at as u64,
                origin,
                sync_status,
            },
            deleted: self.deleted,
        })
    }

    /// Whether this row still holds the given revision.
    pub fn is_revision_of(&self, record: &Record) -> bool {
        self.version == record.version as i64
            && self.updated_at == record.metadata.updated_at as i64
            && self.sync_status == record.metadata.sync_status.as_str()
    }
}

/// Insert or replace an entry.
pub async fn upsert_entry<'e, E>(executor: E, record: &Record) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO entries (
            key, version, payload, deleted, origin, sync_status, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET
            version = excluded.version,
            payload = excluded.payload,
            deleted = excluded.deleted,
            origin = excluded.origin,
            sync_status = excluded.sync_status,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.key)
    .bind(record.version as i64)
    .bind(record.payload.to_string())
    .bind(record.deleted)
    .bind(record.metadata.origin.as_str())
    .bind(record.metadata.sync_status.as_str())
    .bind(record.metadata.created_at as i64)
    .bind(record.metadata.updated_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}

/// Get an entry by key, tombstones included.
pub async fn fetch_entry<'e, E>(executor: E, key: &str) -> Result<Option<StoredEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, StoredEntry>(&format!(
        "SELECT {} FROM entries WHERE key = ?",
        ENTRY_COLUMNS
    ))
    .bind(key)
    .fetch_optional(executor)
    .await
}

/// Get entries for a set of keys. Missing keys are left out.
pub async fn fetch_entries<'e, E>(
    executor: E,
    keys: &[String],
) -> Result<Vec<StoredEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM entries WHERE key IN (",
        ENTRY_COLUMNS
    ));
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push_bind(key.clone());
    }
    separated.push_unseparated(")");

    query.build_query_as::<StoredEntry>().fetch_all(executor).await
}

/// Get entries with unpushed local edits, oldest first.
pub async fn fetch_pending<'e, E>(executor: E) -> Result<Vec<StoredEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, StoredEntry>(&format!(
        "SELECT {} FROM entries WHERE sync_status = 'pending' ORDER BY updated_at, key",
        ENTRY_COLUMNS
    ))
    .fetch_all(executor)
    .await
}

/// Get all active (non-deleted) entries.
pub async fn fetch_active<'e, E>(executor: E) -> Result<Vec<StoredEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, StoredEntry>(&format!(
        "SELECT {} FROM entries WHERE deleted = 0 ORDER BY key",
        ENTRY_COLUMNS
    ))
    .fetch_all(executor)
    .await
}

/// Count active entries.
pub async fn count_active<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE deleted = 0")
        .fetch_one(executor)
        .await
}

/// Count entries with unpushed local edits.
pub async fn count_pending<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE sync_status = 'pending'")
        .fetch_one(executor)
        .await
}

/// Mark a pushed entry as synced, unless it was edited again since.
///
/// Returns whether the row was updated.
pub async fn mark_synced<'e, E>(
    executor: E,
    key: &str,
    pushed_updated_at: i64,
    version: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE entries
        SET version = ?, sync_status = 'synced'
        WHERE key = ? AND updated_at = ? AND sync_status = 'pending'
        "#,
    )
    .bind(version)
    .bind(key)
    .bind(pushed_updated_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load the persisted checkpoint token, if any.
pub async fn load_checkpoint<'e, E>(executor: E) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT token FROM sync_checkpoint WHERE id = 1")
        .fetch_optional(executor)
        .await
}

/// Persist the checkpoint token.
pub async fn save_checkpoint<'e, E>(executor: E, token: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO sync_checkpoint (id, token) VALUES (1, ?)
        ON CONFLICT (id) DO UPDATE SET token = excluded.token
        "#,
    )
    .bind(token)
    .execute(executor)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(payload: &str, status: &str) -> StoredEntry {
        StoredEntry {
            key: "e1".into(),
            version: 2,
            payload: payload.into(),
            deleted: false,
            origin: "remote".into(),
            sync_status: status.into(),
            created_at: 1000,
            updated_at: 2000,
        }
    }

    #[test]
    fn decodes_valid_row() {
        let record = row(r#"{"headword":"tree"}"#, "synced").to_record().unwrap();
        assert_eq!(record.payload, json!({"headword": "tree"}));
        assert_eq!(record.version, 2);
        assert_eq!(record.metadata.origin, Origin::Remote);
        assert!(!record.is_pending());
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(matches!(
            row("{not json", "synced").to_record(),
            Err(lexicon_engine::Error::InvalidRecord { .. })
        ));
        assert!(row("{}", "dirty").to_record().is_err());

        let mut negative = row("{}", "synced");
        negative.version = -1;
        assert!(negative.to_record().is_err());
    }

    #[test]
    fn revision_check() {
        let stored = row(r#"{"headword":"tree"}"#, "synced");
        let mut record = stored.to_record().unwrap();
        assert!(stored.is_revision_of(&record));

        record.edit_local(json!({"headword": "oak"}), 3000);
        assert!(!stored.is_revision_of(&record));
    }
}
