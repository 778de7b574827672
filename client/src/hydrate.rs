//! Search index hydration.
//!
//! The index is derived data. Each pass reads one consistent snapshot of the
//! local store and builds a fresh index; entries that fail to decode or do not
//! fit the schema are counted and left out, never fatal.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::state::UiState;
use crate::store::LocalStoreManager;
use lexicon_engine::{EntrySchema, IndexBuilder, SearchHit, SearchIndex};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Outcome of a hydration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationReport {
    pub indexed: u64,
    pub skipped: u64,
}

/// Builds and serves the search index.
#[derive(Debug)]
pub struct SearchIndexHydrator {
    store: Arc<LocalStoreManager>,
    ui: UiState,
    schema: EntrySchema,
    yield_every: usize,
    index: RwLock<Option<Arc<SearchIndex>>>,
    /// Serializes passes
    pass: Mutex<()>,
    cancel: CancellationToken,
}

impl SearchIndexHydrator {
    pub fn new(
        store: Arc<LocalStoreManager>,
        ui: UiState,
        schema: EntrySchema,
        yield_every: usize,
    ) -> Self {
        Self {
            store,
            ui,
            schema,
            yield_every: yield_every.max(1),
            index: RwLock::new(None),
            pass: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Rebuild the index from the current contents of the local store.
    ///
    /// The previous index stays in place until the new one is complete.
    pub async fn hydrate(&self) -> Result<HydrationReport> {
        let _pass = self.pass.lock().await;
        self.cancel.check()?;

        let _hydrating = self.ui.begin_hydration();
        tracing::info!("Hydrating search index");

        let rows = self.store.snapshot().await?;
        let mut builder = IndexBuilder::new(self.schema.clone());
        let mut skipped = 0u64;

        for (i, row) in rows.iter().enumerate() {
            if i > 0 && i % self.yield_every == 0 {
                tokio::task::yield_now().await;
                self.cancel.check()?;
            }

            let added = row.to_record().and_then(|record| builder.insert(record));
            if let Err(err) = added {
                skipped += 1;
                self.ui.record_skipped();
                tracing::warn!(key = %row.key, "Skipping entry during hydration: {}", err);
            }
        }
        self.cancel.check()?;

        let index = builder.build()?;
        let indexed = index.len() as u64;
        *self.index.write().await = Some(Arc::new(index));
        self.ui.set_indexed(indexed);

        tracing::info!(indexed, skipped, "Search index ready");
        Ok(HydrationReport { indexed, skipped })
    }

    /// Stop any running pass and drop the index.
    ///
    /// The hydrator stays disarmed afterwards: every pass fails with
    /// [`Error::Cancelled`] until [`arm`](Self::arm) is called for the next
    /// session.
    pub async fn reset(&self) {
        self.cancel.cancel();
        let _pass = self.pass.lock().await;

        *self.index.write().await = None;
        self.ui.reset_hydration();
        tracing::info!("Search index discarded");
    }

    /// Allow passes again after a [`reset`](Self::reset).
    pub fn arm(&self) {
        self.cancel.reset();
    }

    /// Ranked entries matching `query`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let index = self.index().await.ok_or(Error::IndexNotReady)?;
        Ok(index.search(query, limit)?)
    }

    /// The current index, if one has been built.
    pub async fn index(&self) -> Option<Arc<SearchIndex>> {
        self.index.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.index.read().await.is_some()
    }

    pub fn schema(&self) -> &EntrySchema {
        &self.schema
    }
}
