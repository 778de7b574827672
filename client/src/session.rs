//! Session transition hooks.
//!
//! Login opens the store and builds the search index before the authorized
//! area is entered. Logout tears everything down in a fixed order through
//! [`SessionController::teardown_session`]; nothing else resets components.

use crate::error::{Result, UserFacingError};
use crate::hydrate::{HydrationReport, SearchIndexHydrator};
use crate::state::UiState;
use crate::store::LocalStoreManager;
use crate::sync::SyncCoordinator;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Where the user is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Unauthenticated,
    /// Login hooks are running
    Entering,
    Authenticated,
    /// Logout teardown is running
    Leaving,
}

/// Signals from the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Login,
    Logout,
}

/// Store side of the session lifecycle.
pub trait StoreLifecycle: Send + Sync {
    fn init(&self) -> BoxFuture<'_, Result<()>>;
    fn reset(&self) -> BoxFuture<'_, Result<()>>;
}

/// Index side of the session lifecycle.
pub trait IndexLifecycle: Send + Sync {
    /// Re-enable hydration after a previous session's reset.
    fn arm(&self);
    fn hydrate(&self) -> BoxFuture<'_, Result<HydrationReport>>;
    fn reset(&self) -> BoxFuture<'_, ()>;
}

/// Sync side of the session lifecycle.
pub trait SyncLifecycle: Send + Sync {
    fn halt(&self) -> BoxFuture<'_, ()>;
}

impl StoreLifecycle for LocalStoreManager {
    fn init(&self) -> BoxFuture<'_, Result<()>> {
        LocalStoreManager::init(self).boxed()
    }

    fn reset(&self) -> BoxFuture<'_, Result<()>> {
        LocalStoreManager::reset(self).boxed()
    }
}

impl IndexLifecycle for SearchIndexHydrator {
    fn arm(&self) {
        SearchIndexHydrator::arm(self)
    }

    fn hydrate(&self) -> BoxFuture<'_, Result<HydrationReport>> {
        SearchIndexHydrator::hydrate(self).boxed()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        SearchIndexHydrator::reset(self).boxed()
    }
}

impl SyncLifecycle for SyncCoordinator {
    fn halt(&self) -> BoxFuture<'_, ()> {
        SyncCoordinator::halt(self).boxed()
    }
}

/// Runs the login and logout hooks.
pub struct SessionController {
    store: Arc<dyn StoreLifecycle>,
    index: Arc<dyn IndexLifecycle>,
    sync: Arc<dyn SyncLifecycle>,
    ui: UiState,
    state: watch::Sender<SessionState>,
    /// Serializes transitions
    transition: Mutex<()>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        store: Arc<dyn StoreLifecycle>,
        index: Arc<dyn IndexLifecycle>,
        sync: Arc<dyn SyncLifecycle>,
        ui: UiState,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            store,
            index,
            sync,
            ui,
            state,
            transition: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Dispatch an event from the authentication layer.
    pub async fn handle(&self, event: SessionEvent) -> std::result::Result<(), UserFacingError> {
        match event {
            SessionEvent::Login => self.enter_authorized().await,
            SessionEvent::Logout => self.teardown_session().await,
        }
    }

    /// Open the store and hydrate the index, then enter the authorized area.
    ///
    /// On failure the session stays unauthenticated and a store opened on
    /// the way is closed again.
    pub async fn enter_authorized(&self) -> std::result::Result<(), UserFacingError> {
        let _transition = self.transition.lock().await;
        if self.state() == SessionState::Authenticated {
            return Ok(());
        }

        self.state.send_replace(SessionState::Entering);
        match self.run_login_hooks().await {
            Ok(report) => {
                self.state.send_replace(SessionState::Authenticated);
                tracing::info!(
                    indexed = report.indexed,
                    skipped = report.skipped,
                    "Session entered"
                );
                Ok(())
            }
            Err(err) => {
                self.state.send_replace(SessionState::Unauthenticated);
                tracing::warn!("Session entry failed: {}", err);
                Err(err.to_user_facing())
            }
        }
    }

    async fn run_login_hooks(&self) -> Result<HydrationReport> {
        self.store.init().await?;
        self.index.arm();

        match self.index.hydrate().await {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(reset_err) = self.store.reset().await {
                    tracing::warn!("Store reset failed after blocked login: {}", reset_err);
                }
                Err(err)
            }
        }
    }

    /// Tear the session down: halt sync, drop the index, wipe the store,
    /// clear the UI state.
    ///
    /// Every step runs even if wiping the store fails; that failure is
    /// returned afterwards.
    pub async fn teardown_session(&self) -> std::result::Result<(), UserFacingError> {
        let _transition = self.transition.lock().await;
        self.state.send_replace(SessionState::Leaving);

        self.sync.halt().await;
        self.index.reset().await;
        let store_reset = self.store.reset().await;
        self.ui.reset();

        self.state.send_replace(SessionState::Unauthenticated);
        match store_reset {
            Ok(()) => {
                tracing::info!("Session torn down");
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Store reset failed during logout: {}", err);
                Err(err.to_user_facing())
            }
        }
    }
}
