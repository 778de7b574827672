//! Sync coordinator - reconciles the local store with the remote authority.
//!
//! A pass pulls the remote change feed page by page from the persisted
//! checkpoint, plans each page with the engine's [`Reconciler`], pushes local
//! edits that must go out first, applies adopted records, and finally pushes
//! whatever local edits remain.
//!
//! Only one pass runs at a time. [`SyncCoordinator::sync`] joins a running
//! pass and returns its outcome; [`SyncCoordinator::try_sync`] refuses instead.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::remote::{ChangeBatch, RemoteAuthority};
use crate::state::UiState;
use crate::store::LocalStoreManager;
use lexicon_engine::{
    Checkpoint, Conflict, ConflictPolicy, EntryKey, Record, ReconcilePlan, Reconciler, Resolution,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What a sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Remote changes written to the local store
    pub applied: u64,
    /// Remote changes the local store already held
    pub unchanged: u64,
    /// Remote changes older than the local value
    pub stale: u64,
    /// Remote changes skipped in favour of an unpushed local edit
    pub deferred: u64,
    /// Local records sent to the remote
    pub pushed: u64,
    pub conflicts: Vec<Conflict>,
    /// Checkpoint after the pass
    pub checkpoint: Checkpoint,
}

/// Outcome of the last pass, kept for callers that joined it.
/// `None` means the pass did not finish.
#[derive(Debug, Default)]
struct PassSlot {
    last: Option<Result<SyncReport>>,
}

/// Coordinates sync passes between the local store and the remote authority.
pub struct SyncCoordinator {
    store: Arc<LocalStoreManager>,
    remote: Arc<dyn RemoteAuthority>,
    ui: UiState,
    policy: ConflictPolicy,
    pull_limit: u32,
    pass: Mutex<PassSlot>,
    periodic: Mutex<Option<PeriodicSync>>,
    /// Bumped after every pass that applied remote changes
    applied: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("policy", &self.policy)
            .field("pull_limit", &self.pull_limit)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStoreManager>,
        remote: Arc<dyn RemoteAuthority>,
        ui: UiState,
        policy: ConflictPolicy,
        pull_limit: u32,
    ) -> Self {
        Self {
            store,
            remote,
            ui,
            policy,
            pull_limit: pull_limit.max(1),
            pass: Mutex::new(PassSlot::default()),
            periodic: Mutex::new(None),
            applied: watch::channel(0).0,
            cancel: CancellationToken::new(),
        }
    }

    /// Changes whenever a finished pass wrote remote changes to the store.
    pub fn subscribe_applied(&self) -> watch::Receiver<u64> {
        self.applied.subscribe()
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Run a sync pass, or wait for the running one and return its outcome.
    pub async fn sync(&self) -> Result<SyncReport> {
        if let Ok(mut slot) = self.pass.try_lock() {
            return self.run_and_record(&mut slot).await;
        }

        tracing::debug!("Joining in-flight sync pass");
        let slot = self.pass.lock().await;
        slot.last.clone().unwrap_or(Err(Error::Cancelled))
    }

    /// Run a sync pass unless one is already running.
    pub async fn try_sync(&self) -> Result<SyncReport> {
        match self.pass.try_lock() {
            Ok(mut slot) => self.run_and_record(&mut slot).await,
            Err(_) => Err(Error::SyncInProgress),
        }
    }

    async fn run_and_record(&self, slot: &mut PassSlot) -> Result<SyncReport> {
        slot.last = None;
        let result = self.run_pass().await;
        if matches!(&result, Ok(report) if report.applied > 0) {
            self.applied.send_modify(|generation| *generation += 1);
        }
        slot.last = match &result {
            Err(Error::Cancelled) => None,
            other => Some(other.clone()),
        };
        result
    }

    /// Stop periodic syncing, cancel the running pass and wait for it to
    /// unwind, then clear the sync state.
    pub async fn halt(&self) {
        let periodic = self.periodic.lock().await.take();
        self.cancel.cancel();
        if let Some(periodic) = periodic {
            periodic.stop().await;
        }

        let mut slot = self.pass.lock().await;
        slot.last = None;
        self.cancel.reset();
        drop(slot);

        self.ui.reset_sync();
        tracing::info!("Sync halted");
    }

    /// Spawn a task that runs [`try_sync`](Self::try_sync) every `interval`.
    ///
    /// The first pass starts immediately. The caller owns the returned handle.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> PeriodicSync {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }

                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                tracing::debug!("Periodic sync tick");
                match coordinator.try_sync().await {
                    Ok(report) => tracing::debug!(applied = report.applied, pushed = report.pushed, "Periodic sync done"),
                    Err(Error::SyncInProgress) | Err(Error::Cancelled) => {}
                    Err(err) => tracing::warn!("Periodic sync failed: {}", err),
                }
            }
            tracing::debug!("Periodic sync stopped");
        });

        PeriodicSync { shutdown, handle }
    }

    /// Start periodic syncing owned by the coordinator; [`halt`](Self::halt)
    /// stops it. Replaces a previously started task.
    pub async fn start_periodic(self: &Arc<Self>, interval: Duration) {
        let previous = self
            .periodic
            .lock()
            .await
            .replace(self.spawn_periodic(interval));
        if let Some(previous) = previous {
            previous.stop().await;
        }
        tracing::info!(interval_secs = interval.as_secs(), "Periodic sync started");
    }

    // ------------------------------------------------------------------------
    // Pass
    // ------------------------------------------------------------------------

    async fn run_pass(&self) -> Result<SyncReport> {
        self.cancel.check()?;
        let _syncing = self.ui.begin_sync();

        let mut checkpoint = self.store.checkpoint().await?;
        let mut report = SyncReport::default();
        tracing::info!(checkpoint = %checkpoint, "Sync pass started");

        loop {
            let (batch, plan, local) = self.fetch_and_plan(&checkpoint, &mut report).await?;
            if !batch.records.is_empty() {
                self.apply_page(&plan, local, &mut checkpoint, &mut report)
                    .await?;
            }

            if checkpoint.advance(&batch.checkpoint) {
                self.store.save_checkpoint(&checkpoint).await?;
            }
            if !batch.has_more || batch.records.is_empty() {
                break;
            }
        }

        for record in self.store.pending().await? {
            self.push(&record, &mut report).await?;
        }

        report.checkpoint = checkpoint;
        tracing::info!(
            applied = report.applied,
            pushed = report.pushed,
            deferred = report.deferred,
            conflicts = report.conflicts.len(),
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Fetch a page and plan it. Local edits that must go out first are
    /// pushed, then the same page is fetched and planned again once.
    async fn fetch_and_plan(
        &self,
        checkpoint: &Checkpoint,
        report: &mut SyncReport,
    ) -> Result<(ChangeBatch, ReconcilePlan, HashMap<EntryKey, Record>)> {
        let reconciler = Reconciler::new(self.policy, checkpoint.clone());
        let mut pushed_first = false;

        loop {
            let batch = self.fetch(checkpoint).await?;
            let mut keys: Vec<EntryKey> = batch.records.iter().map(|r| r.key.clone()).collect();
            keys.sort();
            keys.dedup();

            let local = self.store.get_many(&keys).await?;
            let plan = reconciler.plan(&batch.records, &local);

            for conflict in &plan.conflicts {
                tracing::warn!(
                    key = %conflict.key,
                    local_version = conflict.local_version,
                    remote_version = conflict.remote_version,
                    resolution = ?conflict.resolution,
                    "Sync conflict"
                );
            }
            report.conflicts.extend(plan.conflicts.iter().cloned());

            if pushed_first || !plan.needs_push() {
                return Ok((batch, plan, local));
            }

            for record in plan.push_first() {
                self.push(record, report).await?;
            }
            pushed_first = true;
        }
    }

    async fn apply_page(
        &self,
        plan: &ReconcilePlan,
        mut local: HashMap<EntryKey, Record>,
        checkpoint: &mut Checkpoint,
        report: &mut SyncReport,
    ) -> Result<()> {
        for step in &plan.steps {
            self.cancel.check()?;
            let position = step.remote.checkpoint();

            match (step.resolution, &step.record) {
                (Resolution::Adopt, Some(record)) => {
                    let applied = self
                        .store
                        .apply_remote(record, local.get(&record.key), &position)
                        .await?;
                    if applied {
                        report.applied += 1;
                        self.ui.record_applied();
                        local.insert(record.key.clone(), record.clone());
                    } else {
                        report.deferred += 1;
                        tracing::warn!(key = %record.key, "Entry edited during sync, keeping local edit");
                    }
                }
                (Resolution::PushLocalFirst, _) | (Resolution::Adopt, None) => {
                    report.deferred += 1;
                    tracing::warn!(key = %step.remote.key, "Local edit still unpushed, deferring remote change");
                }
                (Resolution::Unchanged, _) => report.unchanged += 1,
                (Resolution::Stale, _) => report.stale += 1,
            }

            checkpoint.advance(&position);
            tokio::task::yield_now().await;
        }

        self.store.save_checkpoint(checkpoint).await
    }

    async fn fetch(&self, checkpoint: &Checkpoint) -> Result<ChangeBatch> {
        self.cancel.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            batch = self.remote.fetch_changes_since(checkpoint, self.pull_limit) => Ok(batch?),
        }
    }

    async fn push(&self, record: &Record, report: &mut SyncReport) -> Result<()> {
        self.cancel.check()?;
        let ack = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            ack = self.remote.push_record(record) => ack?,
        };

        report.pushed += 1;
        if !self.store.mark_synced(record, &ack).await? {
            tracing::debug!(key = %record.key, "Entry edited again after push, staying pending");
        }
        Ok(())
    }
}

/// Handle to a periodic sync task.
#[derive(Debug)]
pub struct PeriodicSync {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicSync {
    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            tracing::error!("Periodic sync task failed: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
