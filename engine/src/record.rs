//! Record types for dictionary entries.

use crate::{error::Result, Checkpoint, EntryKey, Error, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Origin of the last write to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or modified locally
    Local,
    /// Received from the remote authority
    Remote,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Remote => "remote",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Origin::Local),
            "remote" => Ok(Origin::Remote),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// Whether the remote authority has seen the current local value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local value matches what the remote acknowledged
    Synced,
    /// Local edit not yet pushed
    Pending,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Metadata associated with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the record was first created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last updated (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Whether the last write happened locally or came from remote
    pub origin: Origin,
    /// Push state of the last write
    pub sync_status: SyncStatus,
}

impl Metadata {
    /// Metadata for a record created on this device.
    pub fn new_local(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Local,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Metadata for a record received from the remote authority.
    pub fn new_remote(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Remote,
            sync_status: SyncStatus::Synced,
        }
    }

    fn touch_local(&mut self, timestamp: Timestamp) {
        // Keep updated_at monotonic even if the wall clock steps back.
        self.updated_at = timestamp.max(self.updated_at.saturating_add(1));
        self.origin = Origin::Local;
        self.sync_status = SyncStatus::Pending;
    }
}

/// A dictionary entry held in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier
    pub key: EntryKey,
    /// Version number, incremented on each write
    pub version: Version,
    /// Entry body (JSON object shaped by the entry schema)
    pub payload: serde_json::Value,
    /// Record metadata
    pub metadata: Metadata,
    /// Soft delete flag (tombstone)
    pub deleted: bool,
}

impl Record {
    /// Create a new locally authored record.
    pub fn new_local(
        key: impl Into<EntryKey>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            version: 1,
            payload,
            metadata: Metadata::new_local(timestamp),
            deleted: false,
        }
    }

    /// Build a synced record from a remote change.
    pub fn from_remote(remote: &RemoteRecord) -> Self {
        Self {
            key: remote.key.clone(),
            version: remote.version,
            payload: remote.payload.clone(),
            metadata: Metadata::new_remote(remote.updated_at),
            deleted: remote.deleted,
        }
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Check if the record carries a local edit the remote has not acknowledged.
    pub fn is_pending(&self) -> bool {
        self.metadata.sync_status == SyncStatus::Pending
    }

    /// Replace the payload with a local edit.
    pub fn edit_local(&mut self, payload: serde_json::Value, timestamp: Timestamp) {
        self.payload = payload;
        self.version += 1;
        self.metadata.touch_local(timestamp);
    }

    /// Mark record as deleted locally (tombstone).
    pub fn delete_local(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.version += 1;
        self.metadata.touch_local(timestamp);
    }

    /// Overwrite local state with the remote value.
    pub fn adopt_remote(&mut self, remote: &RemoteRecord) {
        self.version = remote.version;
        self.payload = remote.payload.clone();
        self.deleted = remote.deleted;
        self.metadata.updated_at = remote.updated_at;
        self.metadata.origin = Origin::Remote;
        self.metadata.sync_status = SyncStatus::Synced;
    }

    /// Record that the remote accepted this value at `version`.
    pub fn mark_synced(&mut self, version: Version) {
        self.version = version;
        self.metadata.sync_status = SyncStatus::Synced;
    }

    /// Check that the payload has the basic shape every entry needs.
    pub fn validate_shape(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::InvalidRecord {
                key: self.key.clone(),
                reason: "empty key".into(),
            });
        }
        if !self.deleted && !self.payload.is_object() {
            return Err(Error::InvalidRecord {
                key: self.key.clone(),
                reason: "payload must be an object".into(),
            });
        }
        Ok(())
    }
}

/// A changed record as reported by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub key: EntryKey,
    pub version: Version,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Server-side modification time (milliseconds since epoch)
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecord {
    pub fn new(
        key: impl Into<EntryKey>,
        version: Version,
        payload: serde_json::Value,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            key: key.into(),
            version,
            payload,
            updated_at,
            deleted: false,
        }
    }

    /// A remote deletion.
    pub fn tombstone(key: impl Into<EntryKey>, version: Version, updated_at: Timestamp) -> Self {
        Self {
            key: key.into(),
            version,
            payload: serde_json::Value::Null,
            updated_at,
            deleted: true,
        }
    }

    /// Position of this change in the remote change feed.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::at(self.updated_at, self.key.clone())
    }

    /// Whether the local record already holds exactly this value.
    pub fn matches(&self, local: &Record) -> bool {
        local.version == self.version
            && local.deleted == self.deleted
            && (self.deleted || local.payload == self.payload)
    }
}
