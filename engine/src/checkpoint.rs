//! Sync checkpoints.
//!
//! A checkpoint marks how far the local store has consumed the remote change
//! feed. The feed is ordered by `(updated_at, key)`, so the checkpoint is the
//! position of the last consumed change. It travels as the token
//! `"{timestamp}_{key}"`; the empty token means "from the beginning".

use crate::{error::Result, EntryKey, Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position in the remote change feed.
///
/// Ordering is by timestamp, then key. Field order matters for the derived `Ord`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub timestamp: Timestamp,
    pub key: EntryKey,
}

impl Checkpoint {
    /// The checkpoint before any change.
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn at(timestamp: Timestamp, key: impl Into<EntryKey>) -> Self {
        Self {
            timestamp,
            key: key.into(),
        }
    }

    pub fn is_initial(&self) -> bool {
        self.timestamp == 0 && self.key.is_empty()
    }

    /// Move forward to `other` if it is later. Returns whether it moved.
    pub fn advance(&mut self, other: &Checkpoint) -> bool {
        if *other > *self {
            *self = other.clone();
            true
        } else {
            false
        }
    }

    /// Parse a persisted token, falling back to the initial checkpoint.
    pub fn parse_lenient(token: &str) -> (Self, Option<Error>) {
        match token.parse() {
            Ok(checkpoint) => (checkpoint, None),
            Err(err) => (Self::initial(), Some(err)),
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            Ok(())
        } else {
            write!(f, "{}_{}", self.timestamp, self.key)
        }
    }
}

impl FromStr for Checkpoint {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::initial());
        }

        // Keys may contain '_', the timestamp never does.
        let (timestamp, key) = token
            .split_once('_')
            .ok_or_else(|| Error::InvalidCheckpoint(token.to_string()))?;
        let timestamp = timestamp
            .parse()
            .map_err(|_| Error::InvalidCheckpoint(token.to_string()))?;

        Ok(Self::at(timestamp, key))
    }
}
