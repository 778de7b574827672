//! Reconciliation of remote changes against the local store.
//!
//! The remote authority is the source of truth, but local edits that it has
//! not seen yet must never be silently overwritten. Given a page of remote
//! changes and the matching local rows, the [`Reconciler`] decides per record
//! what the sync pass should do. It performs no I/O; the caller applies the
//! plan.
//!
//! # Algorithm
//!
//! 1. Sort remote changes by feed position `(updated_at, key)`
//! 2. Resolve each change against the current local row
//! 3. Fold adopted values into the working set so a later change to the same
//!    key is resolved against what will actually be stored
//! 4. Report every pending local edit that met a remote change as a conflict

use crate::{Checkpoint, EntryKey, Error, Record, RemoteRecord, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// How a pending local edit competes with a remote change to the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Remote wins, except that local edits made after the checkpoint are
    /// pushed before the remote value is adopted (default)
    #[default]
    RemoteAuthoritative,
    /// The later `updated_at` wins (use with caution - clock skew issues)
    LastWriterWins,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::RemoteAuthoritative => "remote-authoritative",
            ConflictPolicy::LastWriterWins => "last-writer-wins",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote-authoritative" | "remote" => Ok(ConflictPolicy::RemoteAuthoritative),
            "last-writer-wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            other => Err(Error::UnknownPolicy(other.to_string())),
        }
    }
}

/// What a sync pass should do with one remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Replace the local value with the remote one
    Adopt,
    /// Push the pending local edit, then fetch again
    PushLocalFirst,
    /// Local already holds this value
    Unchanged,
    /// Remote value is older than the synced local one; ignore it
    Stale,
}

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// Local edit goes to the remote before anything is adopted
    LocalPushed,
    /// Remote value replaced the local edit
    RemoteWins,
}

/// A pending local edit that met a remote change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub key: EntryKey,
    pub local_version: Version,
    pub remote_version: Version,
    pub resolution: ConflictResolution,
}

/// One remote change with its resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub remote: RemoteRecord,
    pub resolution: Resolution,
    /// For `Adopt`, the record to store. For `PushLocalFirst`, the local
    /// record to push. `None` otherwise.
    pub record: Option<Record>,
}

/// Resolutions for a page of remote changes, in feed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub steps: Vec<PlannedStep>,
    pub conflicts: Vec<Conflict>,
}

impl ReconcilePlan {
    /// Local records that must be pushed before this page can be applied.
    pub fn push_first(&self) -> impl Iterator<Item = &Record> {
        self.steps
            .iter()
            .filter(|s| s.resolution == Resolution::PushLocalFirst)
            .filter_map(|s| s.record.as_ref())
    }

    pub fn needs_push(&self) -> bool {
        self.push_first().next().is_some()
    }

    /// Number of steps with the given resolution.
    pub fn count(&self, resolution: Resolution) -> usize {
        self.steps
            .iter()
            .filter(|s| s.resolution == resolution)
            .count()
    }

    /// Feed position of the last change in the page.
    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.steps.last().map(|s| s.remote.checkpoint())
    }
}

/// Decides how remote changes merge into local state.
#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: ConflictPolicy,
    checkpoint: Checkpoint,
}

impl Reconciler {
    /// Create a reconciler for changes after `checkpoint`.
    pub fn new(policy: ConflictPolicy, checkpoint: Checkpoint) -> Self {
        Self { policy, checkpoint }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve a single remote change against the local row, if any.
    pub fn resolve(&self, local: Option<&Record>, remote: &RemoteRecord) -> Resolution {
        self.decide(local, remote).0
    }

    fn decide(
        &self,
        local: Option<&Record>,
        remote: &RemoteRecord,
    ) -> (Resolution, Option<ConflictResolution>) {
        let Some(local) = local else {
            // Nothing to delete locally.
            return if remote.deleted {
                (Resolution::Unchanged, None)
            } else {
                (Resolution::Adopt, None)
            };
        };

        if local.is_pending() {
            return match self.policy {
                ConflictPolicy::RemoteAuthoritative => {
                    if local.metadata.updated_at > self.checkpoint.timestamp {
                        (Resolution::PushLocalFirst, Some(ConflictResolution::LocalPushed))
                    } else {
                        (Resolution::Adopt, Some(ConflictResolution::RemoteWins))
                    }
                }
                ConflictPolicy::LastWriterWins => {
                    if local.metadata.updated_at >= remote.updated_at {
                        (Resolution::PushLocalFirst, Some(ConflictResolution::LocalPushed))
                    } else {
                        (Resolution::Adopt, Some(ConflictResolution::RemoteWins))
                    }
                }
            };
        }

        if local.version > remote.version {
            (Resolution::Stale, None)
        } else if remote.matches(local) {
            (Resolution::Unchanged, None)
        } else {
            (Resolution::Adopt, None)
        }
    }

    /// Plan a page of remote changes against the current local rows.
    ///
    /// `local` only needs to contain rows for keys present in `remote`.
    pub fn plan(&self, remote: &[RemoteRecord], local: &HashMap<EntryKey, Record>) -> ReconcilePlan {
        let mut changes: Vec<&RemoteRecord> = remote.iter().collect();
        changes.sort_by_key(|r| r.checkpoint());

        // Local rows as they will look after earlier steps are applied
        let mut working: HashMap<&str, Record> = HashMap::new();
        let mut plan = ReconcilePlan::default();

        for change in changes {
            let current = working
                .get(change.key.as_str())
                .or_else(|| local.get(&change.key));
            let (resolution, conflict) = self.decide(current, change);

            if let (Some(resolution), Some(current)) = (conflict, current) {
                plan.conflicts.push(Conflict {
                    key: change.key.clone(),
                    local_version: current.version,
                    remote_version: change.version,
                    resolution,
                });
            }

            let record = match resolution {
                Resolution::Adopt => {
                    let adopted = match current {
                        Some(existing) => {
                            let mut adopted = existing.clone();
                            adopted.adopt_remote(change);
                            adopted
                        }
                        None => Record::from_remote(change),
                    };
                    working.insert(change.key.as_str(), adopted.clone());
                    Some(adopted)
                }
                Resolution::PushLocalFirst => current.cloned(),
                Resolution::Unchanged | Resolution::Stale => None,
            };

            plan.steps.push(PlannedStep {
                remote: change.clone(),
                resolution,
                record,
            });
        }

        plan
    }
}
