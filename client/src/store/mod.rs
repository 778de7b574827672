//! Local SQLite persistence.

mod entries;
mod manager;

pub use entries::StoredEntry;
pub use manager::{now_millis, LocalStoreManager, StoreState};
