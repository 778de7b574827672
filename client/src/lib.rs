//! # Lexicon Client
//!
//! Local-first store, sync and search hydration for the Lexicon dictionary.
//!
//! Every read and write goes to a SQLite database on the device. A
//! [`SyncCoordinator`] reconciles that database with a [`RemoteAuthority`]
//! in the background, and a [`SearchIndexHydrator`] rebuilds the in-memory
//! search index from it. The [`SessionController`] opens all of this on login
//! and wipes it on logout.
//!
//! ## Components
//!
//! - [`LocalStoreManager`] - pool lifecycle and entry storage
//! - [`SyncCoordinator`] - pull, reconcile, push; one pass at a time
//! - [`SearchIndexHydrator`] - builds the index, skipping bad entries
//! - [`UiState`] - observable progress for the UI
//! - [`Lexicon`] - everything above, wired from a [`Config`]
//!
//! The transport to the server is not part of this crate. Callers provide a
//! [`RemoteAuthority`] implementation.

pub mod app;
pub mod cancel;
pub mod config;
pub mod error;
pub mod hydrate;
pub mod remote;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;

pub use app::Lexicon;
pub use cancel::CancellationToken;
pub use config::{Config, ConfigError};
pub use error::{Error, ErrorKind, Result, UserFacingError};
pub use hydrate::{HydrationReport, SearchIndexHydrator};
pub use remote::{ChangeBatch, PushAck, RemoteAuthority, RemoteError};
pub use session::{
    IndexLifecycle, SessionController, SessionEvent, SessionState, StoreLifecycle, SyncLifecycle,
};
pub use state::{HydrationState, SyncState, UiState};
pub use store::{LocalStoreManager, StoreState};
pub use sync::{PeriodicSync, SyncCoordinator, SyncReport};
