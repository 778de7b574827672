//! # Lexicon Engine
//!
//! Deterministic core of the Lexicon local-first dictionary.
//!
//! This crate holds the logic that decides how remote changes merge into the
//! local copy and how dictionary entries become a searchable index. The async
//! client crate drives it against a real database and remote authority.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform; the
//!   search index lives in memory
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Each dictionary entry is a [`Record`] with:
//! - Stable key
//! - Version number
//! - JSON payload shaped by the [`EntrySchema`]
//! - Metadata (timestamps, origin, sync status)
//! - Soft delete flag (tombstone)
//!
//! ### Checkpoints
//!
//! A [`Checkpoint`] marks how far the local copy has consumed the remote
//! change feed. It is persisted as the token `"{timestamp}_{key}"`.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] plans a page of remote changes against local rows.
//! Each change resolves to one [`Resolution`]:
//! - [`Resolution::Adopt`] - remote value replaces the local one
//! - [`Resolution::PushLocalFirst`] - an unpushed local edit goes out first
//! - [`Resolution::Unchanged`] - nothing to do
//! - [`Resolution::Stale`] - remote value is older than local
//!
//! ### Search
//!
//! [`IndexBuilder`] turns records into a [`SearchIndex`], an in-memory tantivy
//! index. Records that do not fit the schema are rejected one at a time so the
//! caller can skip them.
//!
//! ## Quick Start
//!
//! ```rust
//! use lexicon_engine::{EntrySchema, IndexBuilder, Record};
//! use serde_json::json;
//!
//! let mut builder = IndexBuilder::new(EntrySchema::dictionary());
//! builder
//!     .insert(Record::new_local(
//!         "entry_1",
//!         json!({"headword": "tree", "senses": ["a woody perennial plant"]}),
//!         1706745600000,
//!     ))
//!     .unwrap();
//!
//! // Malformed entries are rejected without affecting the rest
//! assert!(builder
//!     .insert(Record::new_local("entry_2", json!({"senses": []}), 1706745600000))
//!     .is_err());
//!
//! let index = builder.build()?;
//! let hits = index.search("tre", 10)?;
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].record.key, "entry_1");
//! # Ok::<(), lexicon_engine::Error>(())
//! ```

pub mod checkpoint;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod text;

// Re-export main types at crate root
pub use checkpoint::Checkpoint;
pub use error::Error;
pub use index::{IndexBuilder, IndexDocument, SearchHit, SearchIndex};
pub use reconcile::{
    Conflict, ConflictPolicy, ConflictResolution, PlannedStep, ReconcilePlan, Reconciler,
    Resolution,
};
pub use record::{Metadata, Origin, Record, RemoteRecord, SyncStatus};
pub use schema::{EntrySchema, FieldDef, FieldType};

/// Type aliases for clarity
pub type EntryKey = String;
pub type Version = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
