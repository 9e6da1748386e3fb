// crates/sync-engine/src/engine.rs
//! Background sync manager
//!
//! One `SyncManager` owns the in-memory settings of one user. It is built
//! once at application start and handed to whatever needs the settings.
//!
//! A cycle runs on every poll tick, after a debounced local edit, when the
//! network comes back, on a scheduled retry, or on `force_sync`:
//!
//! 1. skip if offline (or if a cycle is already running)
//! 2. persist unsaved local edits
//! 3. fetch the server document and analyze it against the local copy
//! 4. resolve; apply when confidence clears the threshold, else hold the
//!    resolution for review
//!
//! I/O failures move the manager to `Error` and schedule a bounded number
//! of retries. Corruption resets the local copy to defaults instead.

use crate::confidence::CONFIDENCE_HIGH;
use crate::conflict::{ConflictAnalyzer, ConflictReport, CorruptedSide};
use crate::connectivity::NetworkMonitor;
use crate::error::{SyncError, SyncResult};
use crate::notify::{NotificationSink, Notifier};
use crate::protocol::RemoteStore;
use crate::resolution::{ResolutionAction, ResolutionEngine, ResolutionStrategy};
use crate::scheduler::DelayedTask;
use crate::tracker::{ChangeTracker, SettingsPatch};
use crate::types::{PendingConflict, SkipReason, SyncDirection, SyncOutcome, SyncState, SyncStatus};
use chrono::Utc;
use kpiboard_persistence::{PersistenceAdapter, StorageErrorKind};
use kpiboard_resilience::{retry_async_if, with_timeout, RetryPolicy, Timeout};
use kpiboard_settings::{to_backend, to_user_settings, BackendDocument, UserSettings};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Tunables for the sync manager
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Resolution strategy for conflicting snapshots
    pub strategy: ResolutionStrategy,
    /// Time between background cycles
    pub poll_interval: Duration,
    /// Quiet period after the last edit before it is persisted and synced
    pub debounce: Duration,
    /// Minimum confidence for applying a resolution without review
    pub auto_apply_threshold: f64,
    /// Deadline for each remote call
    pub remote_timeout: Duration,
    /// Backoff between failed cycles; `max_attempts` bounds the retries
    pub retry_policy: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            poll_interval: Duration::from_secs(30),
            debounce: Duration::from_millis(1500),
            auto_apply_threshold: CONFIDENCE_HIGH,
            remote_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::new(3),
        }
    }
}

impl SyncOptions {
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_auto_apply_threshold(mut self, threshold: f64) -> Self {
        self.auto_apply_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

struct Inner {
    user_id: String,
    options: SyncOptions,
    local: PersistenceAdapter,
    remote: Arc<dyn RemoteStore>,
    notifier: Notifier,
    network: NetworkMonitor,
    tracker: ChangeTracker,
    settings: Mutex<Option<UserSettings>>,
    /// Last snapshot both stores agreed on
    base: Mutex<Option<UserSettings>>,
    pending: Mutex<Option<PendingConflict>>,
    state: watch::Sender<SyncState>,
    cycle_active: AtomicBool,
    /// Bumped by every start/stop; a cycle whose generation changed is stale
    generation: AtomicU64,
    running: AtomicBool,
    unsaved: AtomicBool,
    /// Local copy is first-load defaults created without reaching the server
    placeholder: AtomicBool,
    trigger: Notify,
    debounce: DelayedTask,
    retry: DelayedTask,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Releases the re-entrancy flag when a cycle ends, however it ends
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps one user's settings in sync between the local store and the server
pub struct SyncManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl SyncManager {
    /// Creates a manager for the user behind `local`
    pub fn new(local: PersistenceAdapter, remote: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        let network = NetworkMonitor::default();
        let (state, _rx) = watch::channel(SyncState::new(!network.is_online()));
        Self {
            inner: Arc::new(Inner {
                user_id: local.user_id().to_string(),
                options,
                local,
                remote,
                notifier: Notifier::default(),
                network,
                tracker: ChangeTracker::new(),
                settings: Mutex::new(None),
                base: Mutex::new(None),
                pending: Mutex::new(None),
                state,
                cycle_active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                unsaved: AtomicBool::new(false),
                placeholder: AtomicBool::new(false),
                trigger: Notify::new(),
                debounce: DelayedTask::new(),
                retry: DelayedTask::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Routes user-facing notifications to `sink`
    ///
    /// Must be called before the manager is started.
    pub fn with_notifier(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.notifier = Notifier::new(Some(sink)),
            None => log::warn!("Notifier ignored: sync manager already running"),
        }
        self
    }

    /// Shares an existing network monitor with the manager
    ///
    /// Must be called before the manager is started.
    pub fn with_network(mut self, network: NetworkMonitor) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                let offline = !network.is_online();
                inner.network = network;
                inner.state.send_modify(|s| s.offline = offline);
            }
            None => log::warn!("Network monitor ignored: sync manager already running"),
        }
        self
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    /// Loads the settings for this user
    ///
    /// Uses the local copy when there is a readable one. Otherwise the
    /// server copy is adopted, and if the server has none (or cannot be
    /// reached) first-load defaults are created.
    pub async fn initialize(&self) -> SyncResult<UserSettings> {
        let inner = &self.inner;
        let loaded = inner.local.load();

        if let Some(settings) = loaded.settings {
            log::info!("Loaded local settings for {} (v{})", inner.user_id, settings.metadata.version);
            inner.install_memory(settings.clone(), false)?;
            return Ok(settings);
        }

        match loaded.error {
            Some(StorageErrorKind::Corrupted) => {
                inner
                    .notifier
                    .error("Saved settings were corrupted and have been discarded");
            }
            Some(kind) => log::warn!("Local settings unavailable ({}); continuing in memory", kind),
            None => log::debug!("No local settings for {}", inner.user_id),
        }

        let mut placeholder = true;
        if inner.network.is_online() {
            match inner.fetch_remote().await {
                Ok(Some(raw)) => {
                    placeholder = false;
                    match decode_remote(raw) {
                        Some(remote) => {
                            log::info!("Adopting server settings for {}", inner.user_id);
                            if let Err(e) = inner.install(remote.clone()) {
                                inner.report_flush_error(&e);
                            }
                            inner.mark_synced(&remote)?;
                            return Ok(remote);
                        }
                        None => log::warn!("Server settings unreadable; starting from defaults"),
                    }
                }
                Ok(None) => placeholder = false,
                Err(e) => log::warn!("Could not fetch server settings: {}", e),
            }
        }

        let defaults = UserSettings::new_default(inner.user_id.as_str());
        inner.install_memory(defaults.clone(), placeholder)?;
        inner.unsaved.store(true, Ordering::SeqCst);
        if let Err(e) = inner.flush() {
            inner.report_flush_error(&e);
        }
        Ok(defaults)
    }

    /// Gets the current in-memory settings
    pub fn settings(&self) -> SyncResult<UserSettings> {
        self.inner.current()?.ok_or(SyncError::NotInitialized)
    }

    /// Applies a shallow update to the in-memory settings
    ///
    /// The edit is stamped immediately and persisted (then synced) once
    /// edits have been quiet for the debounce period.
    pub fn update_settings(&self, patch: SettingsPatch) -> SyncResult<UserSettings> {
        let inner = &self.inner;
        let updated = {
            let mut guard = inner.settings.lock().map_err(|_| SyncError::lock_poisoned())?;
            let current = guard.as_ref().ok_or(SyncError::NotInitialized)?;

            let mut next = current.clone();
            patch.apply_to(&mut next);
            next.validate().map_err(|errors| {
                SyncError::Invalid(
                    errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            })?;

            let changed = inner.tracker.record(current, &mut next, Utc::now())?;
            if changed.is_empty() {
                return Ok(next);
            }
            *guard = Some(next.clone());
            next
        };

        inner.unsaved.store(true, Ordering::SeqCst);
        inner.placeholder.store(false, Ordering::SeqCst);
        let pending = inner.tracker.pending_count();
        inner.update_state(|s| s.pending_changes = pending);
        inner.schedule_flush();
        Ok(updated)
    }

    /// Persists unsaved edits now instead of waiting for the debounce
    pub fn flush(&self) -> SyncResult<()> {
        self.inner.debounce.cancel();
        self.inner.flush()
    }

    /// Starts background syncing; the first cycle runs immediately
    pub fn start(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock().map_err(|_| SyncError::lock_poisoned())?;
        if worker.is_some() {
            return Ok(());
        }
        let runtime = Handle::try_current()
            .map_err(|_| SyncError::Custom("Sync manager needs a tokio runtime".to_string()))?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.running.store(true, Ordering::SeqCst);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run_loop(self.inner.clone(), generation, shutdown_rx));
        *worker = Some(Worker { handle, shutdown });

        log::info!(
            "Sync manager started for {} (poll every {:?}, strategy {})",
            self.inner.user_id,
            self.inner.options.poll_interval,
            self.inner.options.strategy
        );
        Ok(())
    }

    /// Stops background syncing
    ///
    /// Cancels the poll timer, the debounce and any scheduled retry. A
    /// cycle already in flight runs to completion but its result is
    /// discarded. Unsaved edits are persisted.
    pub fn stop(&self) {
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.retry.cancel();
        if self.inner.debounce.cancel() {
            if let Err(e) = self.inner.flush() {
                self.inner.report_flush_error(&e);
            }
        }

        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            drop(worker.handle);
            log::info!("Sync manager stopped for {}", self.inner.user_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Runs one cycle now, bypassing the timer
    pub async fn force_sync(&self) -> SyncOutcome {
        self.inner.run_cycle().await
    }

    /// Feeds a connectivity change in
    pub fn set_online(&self, online: bool) {
        self.inner.network.set_online(online);
        self.inner.update_state(|s| s.offline = !online);
    }

    pub fn network(&self) -> NetworkMonitor {
        self.inner.network.clone()
    }

    /// Gets the current sync state
    pub fn status(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to sync state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Gets the resolution waiting for the user, if any
    pub fn pending_resolution(&self) -> Option<PendingConflict> {
        self.inner.pending.lock().ok().and_then(|p| p.clone())
    }

    /// Applies the pending resolution as proposed
    ///
    /// Accepting a proposal to keep the current copies keeps the local copy
    /// and pushes it, which settles the conflict.
    pub async fn accept_pending(&self) -> SyncResult<SyncOutcome> {
        let pending = self.inner.take_pending()?;
        let action = match pending.resolution.action {
            ResolutionAction::MaintainCurrent => ResolutionAction::ApplyLocal,
            action => action,
        };
        let merged = pending.resolution.merged_settings.clone();
        self.inner.apply_reviewed(pending, action, merged).await
    }

    /// Declines the pending resolution, keeping the local copy
    pub async fn reject_pending(&self) -> SyncResult<SyncOutcome> {
        let pending = self.inner.take_pending()?;
        self.inner
            .apply_reviewed(pending, ResolutionAction::ApplyLocal, None)
            .await
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(inner: Arc<Inner>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let mut online = inner.network.subscribe();
    let period = inner.options.poll_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => log::debug!("Poll tick"),
            _ = inner.trigger.notified() => log::debug!("Sync requested"),
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_online = *online.borrow_and_update();
                inner.update_state(|s| s.offline = !is_online);
                if !is_online {
                    continue;
                }
                log::info!("Back online; syncing now");
            }
        }

        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        let outcome = inner.run_cycle().await;
        log::debug!("Cycle finished: {:?}", outcome);
    }

    log::debug!("Sync loop for {} exited", inner.user_id);
}

fn decode_remote(raw: serde_json::Value) -> Option<UserSettings> {
    let document = BackendDocument::from_json(raw).ok()?;
    let mut settings = to_user_settings(&document);
    settings.sanitize().ok()?;
    Some(settings)
}

impl Inner {
    fn current(&self) -> SyncResult<Option<UserSettings>> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| SyncError::lock_poisoned())
    }

    fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        self.state.send_modify(f);
    }

    fn ensure_live(&self, generation: u64) -> SyncResult<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(SyncError::Stopped)
        }
    }

    fn install_memory(&self, settings: UserSettings, placeholder: bool) -> SyncResult<()> {
        let mut guard = self.settings.lock().map_err(|_| SyncError::lock_poisoned())?;
        *guard = Some(settings);
        self.placeholder.store(placeholder, Ordering::SeqCst);
        Ok(())
    }

    /// Makes `settings` the local copy, in memory and in the store
    fn install(&self, settings: UserSettings) -> SyncResult<()> {
        let mut guard = self.settings.lock().map_err(|_| SyncError::lock_poisoned())?;
        let outcome = self.local.save(&settings);
        *guard = Some(settings);
        self.placeholder.store(false, Ordering::SeqCst);
        self.unsaved.store(!outcome.is_ok(), Ordering::SeqCst);
        match outcome.error {
            None => Ok(()),
            Some(kind) => Err(kind.into()),
        }
    }

    /// Like `install`, unless the local copy moved past `expected`
    fn install_if_unchanged(&self, expected: &UserSettings, settings: UserSettings) -> SyncResult<bool> {
        let mut guard = self.settings.lock().map_err(|_| SyncError::lock_poisoned())?;
        let unchanged = guard
            .as_ref()
            .is_some_and(|current| current.metadata.version == expected.metadata.version);
        if !unchanged {
            return Ok(false);
        }

        let outcome = self.local.save(&settings);
        *guard = Some(settings);
        self.unsaved.store(!outcome.is_ok(), Ordering::SeqCst);
        match outcome.error {
            None => Ok(true),
            Some(kind) => Err(kind.into()),
        }
    }

    fn local_changed_since(&self, snapshot: &UserSettings) -> SyncResult<bool> {
        Ok(self
            .current()?
            .is_some_and(|current| current.metadata.version != snapshot.metadata.version))
    }

    /// Writes the in-memory copy to the local store if it has unsaved edits
    fn flush(&self) -> SyncResult<()> {
        if !self.unsaved.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(settings) = self.current()? else {
            return Ok(());
        };

        let outcome = self.local.save(&settings);
        match outcome.error {
            None => {
                log::debug!("Persisted settings v{}", settings.metadata.version);
                Ok(())
            }
            Some(kind) => {
                self.unsaved.store(true, Ordering::SeqCst);
                Err(kind.into())
            }
        }
    }

    /// Reports a full local store without failing the cycle
    ///
    /// The in-memory copy stays authoritative and `unsaved` stays set, so
    /// the next flush retries the write.
    fn tolerate_full_store<T>(&self, result: SyncResult<T>, stored: T) -> SyncResult<T> {
        match result {
            Err(SyncError::QuotaExceeded) => {
                self.report_flush_error(&SyncError::QuotaExceeded);
                Ok(stored)
            }
            other => other,
        }
    }

    fn report_flush_error(&self, err: &SyncError) {
        match err {
            SyncError::QuotaExceeded => self
                .notifier
                .warning("Local storage is full; recent changes are kept in memory only"),
            other => log::warn!("Could not persist settings: {}", other),
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.debounce.schedule(self.options.debounce, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.flush() {
                Ok(()) => {
                    if inner.running.load(Ordering::SeqCst) {
                        inner.trigger.notify_one();
                    }
                }
                Err(e) => inner.report_flush_error(&e),
            }
        });
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        log::info!("Retrying sync in {:?}", delay);
        self.retry.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                inner.trigger.notify_one();
            }
        });
    }

    fn base_snapshot(&self) -> SyncResult<Option<UserSettings>> {
        self.base
            .lock()
            .map(|b| b.clone())
            .map_err(|_| SyncError::lock_poisoned())
    }

    /// Records `settings` as agreed by both stores
    fn mark_synced(&self, settings: &UserSettings) -> SyncResult<()> {
        {
            let mut base = self.base.lock().map_err(|_| SyncError::lock_poisoned())?;
            *base = Some(settings.clone());
        }
        {
            let mut pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
            *pending = None;
        }
        self.tracker.clear()?;
        self.placeholder.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn take_pending(&self) -> SyncResult<PendingConflict> {
        let mut pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
        let taken = pending
            .take()
            .ok_or_else(|| SyncError::Custom("No conflict awaiting review".to_string()))?;
        self.update_state(|s| s.awaiting_review = false);
        Ok(taken)
    }

    async fn fetch_remote(&self) -> SyncResult<Option<serde_json::Value>> {
        let fetch = with_timeout(
            self.options.remote_timeout,
            self.remote.get_preferences(&self.user_id),
        )
        .await?;

        if !fetch.success {
            return Err(SyncError::Network(
                fetch
                    .error
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        if fetch.is_new {
            return Ok(None);
        }
        Ok(fetch.data)
    }

    /// Writes `settings` to the server, retrying retryable failures with backoff
    async fn push_remote(&self, settings: &UserSettings, create: bool) -> SyncResult<()> {
        let document = to_backend(settings);
        let timeout = Timeout::new(self.options.remote_timeout);
        let remote = &self.remote;
        let user_id = self.user_id.as_str();
        let document = &document;

        retry_async_if(
            &self.options.retry_policy,
            || async move {
                let write = timeout
                    .execute(async {
                        if create {
                            remote.create_preferences(document).await
                        } else {
                            remote.save_preferences(user_id, document).await
                        }
                    })
                    .await?;
                if write.success {
                    Ok(())
                } else {
                    Err(SyncError::Network(
                        write.error.unwrap_or_else(|| "Save rejected".to_string()),
                    ))
                }
            },
            SyncError::is_retryable,
        )
        .await
        .map_err(|exhausted| {
            log::warn!("Push to server failed: {}", exhausted);
            exhausted.into_inner()
        })?;

        log::debug!("Pushed settings v{} to server", settings.metadata.version);
        Ok(())
    }

    async fn run_cycle(self: &Arc<Self>) -> SyncOutcome {
        if !self.network.is_online() {
            self.update_state(|s| s.offline = true);
            log::debug!("Offline; skipping sync");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        if self.cycle_active.swap(true, Ordering::SeqCst) {
            log::debug!("Sync already running; ignoring trigger");
            return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
        }
        let _guard = CycleGuard(&self.cycle_active);

        let generation = self.generation.load(Ordering::SeqCst);
        self.update_state(|s| {
            s.status = SyncStatus::Syncing;
            s.offline = false;
        });

        match self.sync_once(generation).await {
            Ok(outcome) => {
                self.finish(&outcome);
                outcome
            }
            Err(SyncError::Stopped) => {
                log::info!("Manager stopped during sync; result discarded");
                self.finish(&SyncOutcome::Discarded);
                SyncOutcome::Discarded
            }
            Err(err) => self.fail(err),
        }
    }

    async fn sync_once(self: &Arc<Self>, generation: u64) -> SyncResult<SyncOutcome> {
        let Some(local) = self.current()? else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotInitialized));
        };
        self.tolerate_full_store(self.flush(), ())?;

        let fetched = self.fetch_remote().await?;
        self.ensure_live(generation)?;

        let Some(raw) = fetched else {
            self.push_remote(&local, true).await?;
            self.ensure_live(generation)?;
            self.mark_synced(&local)?;
            self.notifier.success("Settings saved to the server");
            return Ok(SyncOutcome::Propagated(SyncDirection::ToRemote));
        };

        let base = self.base_snapshot()?;
        let (report, remote) =
            ConflictAnalyzer::analyze_raw_remote(base.as_ref(), Some(&local), &raw);

        if report.is_corruption() {
            return self.reset_corrupted(&report, remote, generation).await;
        }
        let Some(remote) = remote else {
            return Err(SyncError::Corruption("remote document missing".to_string()));
        };

        if self.placeholder.load(Ordering::SeqCst) {
            self.ensure_live(generation)?;
            let resolution = ResolutionEngine::resolve(None, Some(&remote), &report, self.options.strategy);
            log::info!("{}", resolution.reasoning);
            let installed = self.install_if_unchanged(&local, remote.clone());
            if !self.tolerate_full_store(installed, true)? {
                self.trigger.notify_one();
                return Ok(SyncOutcome::Discarded);
            }
            self.mark_synced(&remote)?;
            return Ok(SyncOutcome::Propagated(SyncDirection::ToLocal));
        }

        if !report.has_conflict {
            self.mark_synced(&local)?;
            return Ok(SyncOutcome::InSync);
        }

        let resolution =
            ResolutionEngine::resolve(Some(&local), Some(&remote), &report, self.options.strategy);
        log::info!(
            "{:?} ({:?}, severity {:?}): {:?} at confidence {:.2}: {}",
            report.conflict_type,
            self.options.strategy,
            report.severity,
            resolution.action,
            resolution.confidence,
            resolution.reasoning
        );

        if resolution.can_auto_apply(self.options.auto_apply_threshold) {
            let outcome = self
                .apply(
                    resolution.action,
                    resolution.confidence,
                    resolution.merged_settings.clone(),
                    &local,
                    &remote,
                    generation,
                )
                .await?;
            if matches!(outcome, SyncOutcome::Applied { .. })
                && resolution.action != ResolutionAction::ApplyLocal
            {
                self.notifier
                    .success(format!("Settings synchronized: {}", resolution.reasoning));
            }
            return Ok(outcome);
        }

        self.ensure_live(generation)?;
        let action = resolution.action;
        let confidence = resolution.confidence;
        let reasoning = resolution.reasoning.clone();
        let already_pending = {
            let mut pending = self.pending.lock().map_err(|_| SyncError::lock_poisoned())?;
            let same = pending.as_ref().is_some_and(|p| p.report == report);
            if !same {
                *pending = Some(PendingConflict::new(report, resolution, local, remote));
            }
            same
        };
        if !already_pending {
            self.notifier
                .warning(format!("Conflicting settings changes need review: {}", reasoning));
        }
        Ok(SyncOutcome::AwaitingReview { action, confidence })
    }

    /// Applies a decision computed from `local` and `remote`
    async fn apply(
        &self,
        action: ResolutionAction,
        confidence: f64,
        merged: Option<UserSettings>,
        local: &UserSettings,
        remote: &UserSettings,
        generation: u64,
    ) -> SyncResult<SyncOutcome> {
        self.ensure_live(generation)?;
        if self.local_changed_since(local)? {
            log::info!("Local settings changed during sync; re-running");
            self.trigger.notify_one();
            return Ok(SyncOutcome::Discarded);
        }

        match action {
            ResolutionAction::ApplyLocal => {
                self.push_remote(local, false).await?;
                self.mark_synced(local)?;
            }
            ResolutionAction::ApplyServer => {
                let installed = self.install_if_unchanged(local, remote.clone());
                if !self.tolerate_full_store(installed, true)? {
                    self.trigger.notify_one();
                    return Ok(SyncOutcome::Discarded);
                }
                self.mark_synced(remote)?;
            }
            ResolutionAction::ApplyMerge | ResolutionAction::ApplyMergeWithReview => {
                let mut merged = merged
                    .ok_or_else(|| SyncError::Custom("Merge resolution without a document".to_string()))?;
                merged.metadata.last_modified = Some(Utc::now());
                let installed = self.install_if_unchanged(local, merged.clone());
                if !self.tolerate_full_store(installed, true)? {
                    self.trigger.notify_one();
                    return Ok(SyncOutcome::Discarded);
                }
                self.push_remote(&merged, false).await?;
                self.mark_synced(&merged)?;
            }
            ResolutionAction::MaintainCurrent => {}
        }

        Ok(SyncOutcome::Applied { action, confidence })
    }

    async fn apply_reviewed(
        self: &Arc<Self>,
        pending: PendingConflict,
        action: ResolutionAction,
        merged: Option<UserSettings>,
    ) -> SyncResult<SyncOutcome> {
        if self.cycle_active.swap(true, Ordering::SeqCst) {
            // Put it back; the running cycle may replace it
            if let Ok(mut slot) = self.pending.lock() {
                slot.get_or_insert(pending);
            }
            self.update_state(|s| s.awaiting_review = true);
            return Err(SyncError::AlreadySyncing);
        }
        let _guard = CycleGuard(&self.cycle_active);

        let generation = self.generation.load(Ordering::SeqCst);
        self.update_state(|s| s.status = SyncStatus::Syncing);
        log::info!("Applying reviewed resolution {} as {:?}", pending.id, action);

        let confidence = pending.resolution.confidence;
        match self
            .apply(action, confidence, merged, &pending.local, &pending.remote, generation)
            .await
        {
            Ok(outcome) => {
                if outcome.is_settled() {
                    self.notifier.success("Reviewed settings changes applied");
                }
                self.finish(&outcome);
                Ok(outcome)
            }
            Err(SyncError::Stopped) => {
                self.finish(&SyncOutcome::Discarded);
                Ok(SyncOutcome::Discarded)
            }
            Err(err) => Ok(self.fail(err)),
        }
    }

    /// Replaces a corrupted document
    ///
    /// A corrupted local copy is restored from a readable server copy.
    /// Otherwise the local copy falls back to defaults, which are also
    /// written to the server so the next poll does not reset again.
    async fn reset_corrupted(
        &self,
        report: &ConflictReport,
        remote: Option<UserSettings>,
        generation: u64,
    ) -> SyncResult<SyncOutcome> {
        self.ensure_live(generation)?;
        log::error!(
            "Corruption detected ({:?}): {}",
            report.corrupted,
            report.issues.join("; ")
        );

        if report.corrupted == Some(CorruptedSide::Local) {
            if let Some(remote) = remote {
                self.tolerate_full_store(self.install(remote.clone()), ())?;
                self.mark_synced(&remote)?;
                self.notifier
                    .warning("Local settings were corrupted and have been restored from the server");
                return Ok(SyncOutcome::CorruptionReset);
            }
        }

        let defaults = UserSettings::new_default(self.user_id.as_str());
        if let Err(e) = self.install(defaults.clone()) {
            self.report_flush_error(&e);
        }
        self.tracker.clear()?;
        self.notifier
            .error("Settings were corrupted and have been reset to defaults");

        match self.push_remote(&defaults, false).await {
            Ok(()) => self.mark_synced(&defaults)?,
            Err(e) => log::warn!("Server copy is still corrupted: {}", e),
        }
        Ok(SyncOutcome::CorruptionReset)
    }

    fn finish(&self, outcome: &SyncOutcome) {
        let settled = outcome.is_settled();
        if settled {
            self.retry.cancel();
        }
        let pending_changes = self.tracker.pending_count();
        let awaiting_review = self.pending.lock().map(|p| p.is_some()).unwrap_or(false);
        self.update_state(|s| {
            s.status = SyncStatus::Idle;
            s.pending_changes = pending_changes;
            s.awaiting_review = awaiting_review;
            if settled || matches!(outcome, SyncOutcome::AwaitingReview { .. }) {
                s.retry_count = 0;
                s.last_error = None;
            }
            if settled {
                s.last_sync = Some(Utc::now());
            }
        });
    }

    /// Converts a cycle error into state and a scheduled retry
    fn fail(self: &Arc<Self>, err: SyncError) -> SyncOutcome {
        let kind = err.kind();
        log::warn!("Sync cycle failed: {}", err);

        match &err {
            SyncError::QuotaExceeded => self
                .notifier
                .warning("Local storage is full; recent changes are kept in memory only"),
            SyncError::Network(_) | SyncError::Timeout(_) => self
                .notifier
                .warning("Could not reach the settings server; will retry"),
            SyncError::Unavailable(_) => self
                .notifier
                .warning("Local settings storage is unavailable"),
            other => self
                .notifier
                .error(format!("Settings sync failed: {}", other)),
        }

        let attempts = self.state.borrow().retry_count + 1;
        let policy = &self.options.retry_policy;

        if !err.is_retryable() || policy.is_exhausted(attempts) {
            if err.is_retryable() {
                log::warn!("Giving up after {} attempts until the next poll", attempts);
            }
            self.update_state(|s| {
                s.status = SyncStatus::Idle;
                s.retry_count = 0;
                s.last_error = Some(kind);
            });
        } else {
            self.update_state(|s| {
                s.status = SyncStatus::Error;
                s.retry_count = attempts;
                s.last_error = Some(kind);
            });
            self.schedule_retry(policy.delay_for_attempt(attempts));
        }

        SyncOutcome::Failed(kind)
    }
}
