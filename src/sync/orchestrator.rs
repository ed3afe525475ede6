use super::{
    PendingChange, ReplayReport, SlotChange, SyncOutcome, SyncState, SyncStatus, SyncTrigger,
    WriteOutcome,
};
use crate::activity::{ActivityEntry, ActivityLevel, ActivitySink};
use crate::config::SyncConfig;
use crate::error::ScheduleError;
use crate::multiplexer::FeedHandle;
use crate::persistence::SlotStore;
use crate::scheduler::SlotService;
use crate::session::Session;
use crate::snapshot::{SchoolSnapshot, SnapshotLoader};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Holds the "syncing" flag for the duration of one or more episodes.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the snapshot, the sync state and the pending-change queue of one session.
///
/// Feed events, the timer and manual requests all go through one trigger queue
/// consumed by a single driver task. At most one reload runs at a time: a trigger
/// arriving mid-reload is deferred and the running episode reloads once more.
pub struct SyncOrchestrator {
    session: RwLock<Arc<Session>>,
    loader: Arc<dyn SnapshotLoader>,
    service: SlotService,
    activity: Arc<dyn ActivitySink>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    snapshot: RwLock<Arc<SchoolSnapshot>>,
    syncing: AtomicBool,
    rerun_requested: AtomicBool,
    online: AtomicBool,
    replay_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    feed: Mutex<Option<FeedHandle>>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncTrigger>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        session: Arc<Session>,
        loader: Arc<dyn SnapshotLoader>,
        store: Arc<dyn SlotStore>,
        activity: Arc<dyn ActivitySink>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let snapshot = SchoolSnapshot::empty(session.scope());
        Arc::new(Self {
            session: RwLock::new(session),
            loader,
            service: SlotService::new(store),
            activity,
            config,
            state: Mutex::new(SyncState::default()),
            snapshot: RwLock::new(Arc::new(snapshot)),
            syncing: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            online: AtomicBool::new(true),
            replay_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            feed: Mutex::new(None),
            triggers,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.read().clone()
    }

    /// Swaps in a refreshed session. The user and scope must stay the same; only
    /// permissions and role may change.
    pub fn replace_session(&self, session: Arc<Session>) -> Result<(), ScheduleError> {
        let mut current = self.session.write();
        if session.user_id != current.user_id || session.scope() != current.scope() {
            return Err(ScheduleError::auth("refreshed session changed scope"));
        }
        *current = session;
        Ok(())
    }

    pub fn service(&self) -> &SlotService {
        &self.service
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<SchoolSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> SyncState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.lock().status
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_sync_time
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.state.lock().pending_changes.iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending_changes.len()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ties reload cancellation to a feed handle: once the handle is closed no
    /// reload of this scope may complete. The orchestrator closes it on shutdown.
    pub fn bind_feed(&self, handle: FeedHandle) {
        if let Some(previous) = self.feed.lock().replace(handle) {
            previous.close();
        }
    }

    fn feed_token(&self) -> Option<CancellationToken> {
        self.feed.lock().as_ref().map(FeedHandle::cancellation_token)
    }

    fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .feed
                .lock()
                .as_ref()
                .is_some_and(FeedHandle::is_closed)
    }

    async fn torn_down(cancel: CancellationToken, feed: Option<CancellationToken>) {
        match feed {
            Some(feed) => tokio::select! {
                _ = cancel.cancelled() => {}
                _ = feed.cancelled() => {}
            },
            None => cancel.cancelled().await,
        }
    }

    fn entry(&self, action: &str, entity_type: &str, level: ActivityLevel) -> ActivityEntry {
        let session = self.session();
        ActivityEntry::new(session.school_id.clone(), action, entity_type, level)
            .with_user(session.user_id.clone())
    }

    fn watches(&self, trigger: SyncTrigger) -> bool {
        match trigger {
            SyncTrigger::ChangeFeed(table) => self.config.watched_tables.contains(&table),
            _ => true,
        }
    }

    /// Queues a trigger for the driver task. Returns false when it was dropped.
    pub fn request(&self, trigger: SyncTrigger) -> bool {
        if !self.watches(trigger) || self.is_torn_down() {
            return false;
        }
        self.triggers.send(trigger).is_ok()
    }

    /// Spawns the driver and the reconciliation timer. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Some(mut rx) = self.trigger_rx.lock().take() else {
            tracing::warn!("sync orchestrator already started");
            return;
        };

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let driver = tokio::spawn(async move {
            loop {
                let trigger = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(trigger) => trigger,
                        None => break,
                    },
                };
                // A burst of events needs one reload, not one per event.
                let mut coalesced = 0usize;
                while rx.try_recv().is_ok() {
                    coalesced += 1;
                }
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                tracing::debug!(%trigger, coalesced, "sync trigger received");
                if let Err(err) = orchestrator.sync(trigger).await {
                    tracing::debug!(%trigger, error = %err, "triggered sync failed");
                }
            }
        });

        let period = self.config.interval;
        let cancel = self.cancel.clone();
        let triggers = self.triggers.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if triggers.send(SyncTrigger::Timer).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.tasks.lock().extend([driver, timer]);
    }

    /// Runs a reload now, or defers it when one is already running.
    ///
    /// A reload that completes while the orchestrator is offline proves the store is
    /// reachable again, so it also counts as a reconnect: queued changes are replayed
    /// and the snapshot is reloaded once more.
    pub async fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome, ScheduleError> {
        let result = self.sync_once(trigger).await;
        if matches!(result, Ok(SyncOutcome::Completed { .. })) && !self.is_online() {
            self.reconnect().await;
        }
        result
    }

    async fn sync_once(&self, trigger: SyncTrigger) -> Result<SyncOutcome, ScheduleError> {
        if !self.watches(trigger) {
            return Ok(SyncOutcome::Ignored);
        }
        if self.is_torn_down() {
            return Ok(SyncOutcome::Cancelled);
        }
        let Some(guard) = SyncGuard::acquire(&self.syncing) else {
            self.rerun_requested.store(true, Ordering::SeqCst);
            tracing::debug!(%trigger, "sync already running, deferred");
            return Ok(SyncOutcome::Deferred);
        };

        let mut result = self.run_episode(trigger).await;
        let mut guard = Some(guard);
        loop {
            while self.rerun_requested.swap(false, Ordering::SeqCst) && !self.is_torn_down() {
                result = self.run_episode(trigger).await;
            }
            drop(guard.take());
            // A trigger may have been deferred between the last check and the release.
            if !self.rerun_requested.load(Ordering::SeqCst) || self.is_torn_down() {
                break;
            }
            match SyncGuard::acquire(&self.syncing) {
                Some(next) => guard = Some(next),
                None => break,
            }
        }
        result
    }

    async fn run_episode(&self, trigger: SyncTrigger) -> Result<SyncOutcome, ScheduleError> {
        let previous_status = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.status, SyncStatus::Syncing)
        };
        let session = self.session();
        tracing::debug!(%trigger, school_id = %session.school_id, "sync started");

        let loaded = tokio::select! {
            biased;
            _ = Self::torn_down(self.cancel.clone(), self.feed_token()) => None,
            result = self.loader.load(&session) => Some(result),
        };
        let loaded = match loaded {
            Some(loaded) if !self.is_torn_down() => loaded,
            _ => {
                self.state.lock().status = previous_status;
                tracing::debug!(%trigger, "sync cancelled by teardown");
                return Ok(SyncOutcome::Cancelled);
            }
        };

        match loaded {
            Ok(snapshot) => {
                let slot_count = snapshot.slots.len();
                *self.snapshot.write() = Arc::new(snapshot);
                let synced_at = Utc::now();
                {
                    let mut state = self.state.lock();
                    state.status = SyncStatus::Success;
                    state.last_sync_time = Some(synced_at);
                    state.last_error = None;
                }
                tracing::info!(%trigger, slots = slot_count, "snapshot synced");
                self.activity.record(
                    self.entry("sync", "school", ActivityLevel::Success)
                        .with_entity_id(session.school_id.clone())
                        .with_details(json!({
                            "trigger": trigger.to_string(),
                            "slots": slot_count,
                        })),
                );
                Ok(SyncOutcome::Completed { trigger, synced_at })
            }
            Err(err) => {
                {
                    let mut state = self.state.lock();
                    state.status = SyncStatus::Error;
                    state.last_error = Some(err.to_string());
                }
                tracing::error!(%trigger, error = %err, "sync failed, keeping previous snapshot");
                self.activity.record(
                    self.entry("sync", "school", ActivityLevel::Error)
                        .with_entity_id(session.school_id.clone())
                        .with_details(json!({
                            "trigger": trigger.to_string(),
                            "kind": err.kind(),
                            "error": err.to_string(),
                        })),
                );
                Err(err)
            }
        }
    }

    /// Applies a write, or queues it when offline. Only connectivity failures are
    /// queued; conflicts and validation errors go straight back to the caller.
    pub async fn submit(&self, change: SlotChange) -> Result<WriteOutcome, ScheduleError> {
        if self.is_torn_down() {
            return Err(ScheduleError::auth("session has been closed"));
        }
        SlotService::validate_change(&change)?;
        if !self.is_online() {
            return Ok(WriteOutcome::Queued(self.enqueue(change)));
        }
        match self.service.apply(&change).await {
            Ok(slot) => Ok(WriteOutcome::Applied(slot)),
            Err(err) if err.is_connectivity() => {
                self.online.store(false, Ordering::SeqCst);
                tracing::warn!(op = change.label(), error = %err, "write failed offline, queued");
                Ok(WriteOutcome::Queued(self.enqueue(change)))
            }
            Err(err) => Err(err),
        }
    }

    fn enqueue(&self, change: SlotChange) -> Uuid {
        let pending = PendingChange::new(change);
        let id = pending.id;
        let mut state = self.state.lock();
        state.pending_changes.push_back(pending);
        tracing::debug!(%id, queued = state.pending_changes.len(), "change queued");
        id
    }

    /// Drops a queued change without replaying it.
    pub fn discard_pending(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let before = state.pending_changes.len();
        state.pending_changes.retain(|pending| pending.id != id);
        before != state.pending_changes.len()
    }

    /// Replays the queue in enqueue order. Successful entries are removed; failed
    /// ones stay queued, in order, without blocking the entries after them.
    pub async fn replay_pending(&self) -> ReplayReport {
        let _replaying = self.replay_lock.lock().await;
        let batch = self.pending_changes();
        let mut report = ReplayReport::default();

        for pending in batch {
            if self.is_torn_down() {
                break;
            }
            report.attempted.push(pending.id);
            match self.service.apply(&pending.payload).await {
                Ok(slot) => {
                    self.state
                        .lock()
                        .pending_changes
                        .retain(|queued| queued.id != pending.id);
                    report.replayed.push(pending.id);
                    let mut entry = self
                        .entry("replay_pending_change", "schedule_slot", ActivityLevel::Success)
                        .with_details(json!({
                            "change_id": pending.id,
                            "op": pending.payload.label(),
                        }));
                    if let Some(id) = slot.map(|s| s.id).or(pending.payload.target()) {
                        entry = entry.with_entity_id(id.to_string());
                    }
                    self.activity.record(entry);
                }
                Err(err) => {
                    tracing::warn!(change_id = %pending.id, error = %err, "replay failed, change stays queued");
                    self.activity.record(
                        self.entry("replay_pending_change", "schedule_slot", ActivityLevel::Warning)
                            .with_details(json!({
                                "change_id": pending.id,
                                "op": pending.payload.label(),
                                "kind": err.kind(),
                                "error": err.to_string(),
                            })),
                    );
                    report.failed.push((pending.id, err.to_string()));
                }
            }
        }

        if report.is_partial_failure() {
            tracing::warn!(
                replayed = report.replayed.len(),
                failed = report.failed.len(),
                "pending replay partially failed"
            );
        }
        report
    }

    /// Records a connectivity change. Going back online with queued changes replays
    /// them and then reloads the snapshot.
    pub async fn set_online(&self, online: bool) -> Option<ReplayReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return None;
        }
        if !online {
            tracing::warn!(school_id = %self.session().school_id, "connectivity lost");
            return None;
        }
        self.replay_after_reconnect().await
    }

    async fn reconnect(&self) {
        if self.is_torn_down() || self.online.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(report) = self.replay_after_reconnect().await {
            tracing::debug!(
                replayed = report.replayed.len(),
                failed = report.failed.len(),
                "replayed queue after reload succeeded offline"
            );
        }
    }

    async fn replay_after_reconnect(&self) -> Option<ReplayReport> {
        tracing::info!(school_id = %self.session().school_id, "connectivity restored");
        if self.pending_count() == 0 {
            return None;
        }
        let report = self.replay_pending().await;
        if let Err(err) = self.sync_once(SyncTrigger::Reconnect).await {
            tracing::warn!(error = %err, "reload after reconnect failed");
        }
        Some(report)
    }

    /// Cancels in-flight reloads, stops background tasks, closes the bound feeds and
    /// discards the sync state along with any unreplayed changes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(feed) = self.feed.lock().take() {
            feed.close();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let mut state = self.state.lock();
        let discarded = state.pending_changes.len();
        *state = SyncState::default();
        if discarded > 0 {
            tracing::warn!(discarded, "discarding unreplayed changes on shutdown");
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
