//! Observable state published to the UI.
//!
//! Each value lives in a `watch` channel. The core is the only writer; the UI
//! subscribes and renders whatever the latest value is.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Progress of the sync coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// True only while a pass is running
    pub is_syncing: bool,
    /// Records applied by the current (or last) pass
    pub completed_count: u64,
}

/// Progress of the search index hydrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationState {
    pub is_hydrating: bool,
    /// Records left out of the current (or last) index
    pub skipped_count: u64,
    /// Records in the current (or last) index
    pub indexed_count: u64,
}

/// Handle to the UI state channels. Clones share the same channels.
#[derive(Debug, Clone)]
pub struct UiState {
    sync: Arc<watch::Sender<SyncState>>,
    hydration: Arc<watch::Sender<HydrationState>>,
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

impl UiState {
    pub fn new() -> Self {
        let (sync, _) = watch::channel(SyncState::default());
        let (hydration, _) = watch::channel(HydrationState::default());
        Self {
            sync: Arc::new(sync),
            hydration: Arc::new(hydration),
        }
    }

    pub fn subscribe_sync(&self) -> watch::Receiver<SyncState> {
        self.sync.subscribe()
    }

    pub fn subscribe_hydration(&self) -> watch::Receiver<HydrationState> {
        self.hydration.subscribe()
    }

    pub fn sync(&self) -> SyncState {
        *self.sync.borrow()
    }

    pub fn hydration(&self) -> HydrationState {
        *self.hydration.borrow()
    }

    /// Return every value to its initial state.
    pub fn reset(&self) {
        self.reset_sync();
        self.reset_hydration();
    }

    pub(crate) fn reset_sync(&self) {
        self.sync.send_replace(SyncState::default());
    }

    pub(crate) fn reset_hydration(&self) {
        self.hydration.send_replace(HydrationState::default());
    }

    /// Mark a sync pass as running until the guard is dropped.
    pub(crate) fn begin_sync(&self) -> SyncingGuard {
        self.sync.send_modify(|s| {
            s.is_syncing = true;
            s.completed_count = 0;
        });
        SyncingGuard {
            sync: Arc::clone(&self.sync),
        }
    }

    pub(crate) fn record_applied(&self) {
        self.sync.send_modify(|s| s.completed_count += 1);
    }

    /// Mark a hydration pass as running until the guard is dropped.
    pub(crate) fn begin_hydration(&self) -> HydratingGuard {
        self.hydration.send_modify(|h| {
            h.is_hydrating = true;
            h.skipped_count = 0;
            h.indexed_count = 0;
        });
        HydratingGuard {
            hydration: Arc::clone(&self.hydration),
        }
    }

    pub(crate) fn record_skipped(&self) {
        self.hydration.send_modify(|h| h.skipped_count += 1);
    }

    pub(crate) fn set_indexed(&self, count: u64) {
        self.hydration.send_modify(|h| h.indexed_count = count);
    }
}

/// Clears `is_syncing` on drop, whichever way the pass ends.
#[derive(Debug)]
pub(crate) struct SyncingGuard {
    sync: Arc<watch::Sender<SyncState>>,
}

impl Drop for SyncingGuard {
    fn drop(&mut self) {
        self.sync.send_modify(|s| s.is_syncing = false);
    }
}

/// Clears `is_hydrating` on drop.
#[derive(Debug)]
pub(crate) struct HydratingGuard {
    hydration: Arc<watch::Sender<HydrationState>>,
}

impl Drop for HydratingGuard {
    fn drop(&mut self) {
        self.hydration.send_modify(|h| h.is_hydrating = false);
    }
}
