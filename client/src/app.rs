//! Application facade wiring the store, sync, index and session together.

use crate::config::Config;
use crate::error::{Error, Result, UserFacingError};
use crate::hydrate::SearchIndexHydrator;
use crate::remote::RemoteAuthority;
use crate::session::{SessionController, SessionEvent, SessionState};
use crate::state::UiState;
use crate::store::LocalStoreManager;
use crate::sync::{SyncCoordinator, SyncReport};
use lexicon_engine::{EntrySchema, SearchHit};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The local-first core of the app for one device.
#[derive(Debug)]
pub struct Lexicon {
    config: Config,
    ui: UiState,
    store: Arc<LocalStoreManager>,
    hydrator: Arc<SearchIndexHydrator>,
    sync: Arc<SyncCoordinator>,
    session: SessionController,
    /// Re-hydrates the index after sync passes that applied changes
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl Lexicon {
    pub fn new(config: Config, remote: Arc<dyn RemoteAuthority>) -> Self {
        let ui = UiState::new();
        let store = Arc::new(LocalStoreManager::new(
            config.db_path.clone(),
            config.max_connections,
        ));
        let hydrator = Arc::new(SearchIndexHydrator::new(
            Arc::clone(&store),
            ui.clone(),
            EntrySchema::dictionary(),
            config.hydrate_yield_every,
        ));
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            remote,
            ui.clone(),
            config.conflict_policy,
            config.pull_limit,
        ));
        let session = SessionController::new(
            store.clone(),
            hydrator.clone(),
            sync.clone(),
            ui.clone(),
        );

        Self {
            config,
            ui,
            store,
            hydrator,
            sync,
            session,
            follower: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn store(&self) -> &Arc<LocalStoreManager> {
        &self.store
    }

    pub fn hydrator(&self) -> &Arc<SearchIndexHydrator> {
        &self.hydrator
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Dispatch an event from the authentication layer.
    pub async fn handle(&self, event: SessionEvent) -> std::result::Result<(), UserFacingError> {
        match event {
            SessionEvent::Login => self.login().await,
            SessionEvent::Logout => self.logout().await,
        }
    }

    /// Run the login hooks, then start background sync.
    pub async fn login(&self) -> std::result::Result<(), UserFacingError> {
        self.session.enter_authorized().await?;

        let mut follower = self.follower.lock().await;
        if follower.is_none() {
            *follower = Some(self.spawn_follower());
        }
        drop(follower);

        self.sync.start_periodic(self.config.sync_interval).await;
        Ok(())
    }

    /// Stop background work and tear the session down.
    pub async fn logout(&self) -> std::result::Result<(), UserFacingError> {
        if let Some(follower) = self.follower.lock().await.take() {
            follower.abort();
            let _ = follower.await;
        }
        self.session.teardown_session().await
    }

    /// Run a sync pass now, joining one that is already running.
    ///
    /// The index follows in the background once the pass applied changes.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.sync.sync().await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.hydrator.search(query, limit).await
    }

    fn spawn_follower(&self) -> JoinHandle<()> {
        let mut applied = self.sync.subscribe_applied();
        let hydrator = Arc::clone(&self.hydrator);

        tokio::spawn(async move {
            while applied.changed().await.is_ok() {
                match hydrator.hydrate().await {
                    Ok(report) => tracing::debug!(
                        indexed = report.indexed,
                        skipped = report.skipped,
                        "Index refreshed after sync"
                    ),
                    Err(Error::Cancelled) => {}
                    Err(err) => tracing::warn!("Index refresh after sync failed: {}", err),
                }
            }
        })
    }
}
