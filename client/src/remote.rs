//! Interface to the remote source of truth.
//!
//! Transport is not part of this crate. Whatever talks to the server
//! implements [`RemoteAuthority`]; the sync coordinator only sees this trait.

use futures::future::BoxFuture;
use lexicon_engine::{Checkpoint, EntryKey, Record, RemoteRecord, Version};
use serde::{Deserialize, Serialize};

/// One page of the remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBatch {
    /// Changes after the requested checkpoint, in feed order
    pub records: Vec<RemoteRecord>,
    /// Position to request the next page from
    pub checkpoint: Checkpoint,
    /// Whether more changes are waiting
    pub has_more: bool,
}

impl ChangeBatch {
    /// A page with nothing new.
    pub fn empty(checkpoint: Checkpoint) -> Self {
        Self {
            records: Vec::new(),
            checkpoint,
            has_more: false,
        }
    }
}

/// Remote acknowledgement of a pushed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub key: EntryKey,
    /// Version the remote assigned to the pushed value
    pub version: Version,
}

/// Remote failures. All are worth retrying on a later pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("remote rejected {key}: {reason}")]
    Rejected { key: EntryKey, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The remote authority the local store is reconciled against.
pub trait RemoteAuthority: Send + Sync {
    /// Fetch up to `limit` changes after `checkpoint`.
    fn fetch_changes_since<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
        limit: u32,
    ) -> BoxFuture<'a, Result<ChangeBatch, RemoteError>>;

    /// Push a local record and return the version the remote stored.
    fn push_record<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, Result<PushAck, RemoteError>>;
}
