//! Remote sync client
//!
//! Single point of contact with the remote document store. Writes go
//! straight to the store when online and nothing is pending; otherwise they
//! are appended to the durable write queue and replayed later, oldest
//! first, with exponential backoff between failed attempts.
//!
//! ## Drain cycle
//!
//! ```text
//! Idle -> Draining -> Idle                       (every entry replayed)
//!                  -> ScheduledRetry -> Draining (an entry failed)
//! ```
//!
//! Only one drain runs at a time. A drain requested while another is in
//! flight is dropped. The running drain lists the queue again after each
//! pass, so writes queued behind it are replayed in the same cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::identity::UserIdentity;
use crate::models::Garage;
use crate::remote::{self, DocumentStore, RemoteResult};
use crate::storage::{QueueAction, QueueEntry, QueuePayload, StorageResult, WriteQueue};

use super::connectivity::Connectivity;
use super::scheduler::{backoff_delay, Scheduler, TaskHandle};

/// Produces the current local garage, photos inlined, for replay
pub type SnapshotProvider = Arc<dyn Fn() -> BoxFuture<'static, Garage> + Send + Sync>;

/// Builds the remote store on (lazy) initialization
pub type Connector = Box<dyn Fn() -> RemoteResult<Arc<dyn DocumentStore>> + Send + Sync>;

/// Where the client is in its drain cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Draining,
    /// An entry failed; another drain runs after `delay`
    ScheduledRetry { attempt: u32, delay: Duration },
}

/// Commands handled by the auto-sync worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Drain the queue now
    Drain,
    /// Stop the worker
    Shutdown,
}

/// What happened to a save or remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Delivered to the remote store
    Pushed,
    /// Appended to the write queue
    Queued,
    /// Remote sync is not configured; nothing was recorded
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
    NotConfigured,
}

/// Result of one drain cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    /// Nothing was pending
    Empty,
    Completed { replayed: usize },
    RetryScheduled { replayed: usize, delay: Duration },
    /// The queue itself could not be read
    Failed,
}

/// Timing knobs for the sync client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub startup_drain_delay: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
            startup_drain_delay: config.startup_drain_delay(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(2000),
            retry_max_delay: Duration::from_millis(30000),
            startup_drain_delay: Duration::from_millis(3000),
        }
    }
}

struct Inner {
    queue: Arc<WriteQueue>,
    identity: Arc<UserIdentity>,
    connectivity: Connectivity,
    scheduler: Arc<dyn Scheduler>,
    settings: SyncSettings,
    connector: Connector,
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    syncing: AtomicBool,
    attempt: AtomicU32,
    state_tx: watch::Sender<SyncState>,
    command_tx: mpsc::UnboundedSender<SyncCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncCommand>>>,
    retry: Mutex<Option<TaskHandle>>,
    startup: Mutex<Option<TaskHandle>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    snapshot: Mutex<Option<SnapshotProvider>>,
}

/// Clears the in-flight flag when a drain cycle ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client for the remote document store, backed by the write queue
#[derive(Clone)]
pub struct RemoteSyncClient {
    inner: Arc<Inner>,
}

impl RemoteSyncClient {
    pub fn new(
        queue: Arc<WriteQueue>,
        identity: Arc<UserIdentity>,
        connectivity: Connectivity,
        scheduler: Arc<dyn Scheduler>,
        settings: SyncSettings,
        connector: Connector,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                queue,
                identity,
                connectivity,
                scheduler,
                settings,
                connector,
                store: RwLock::new(None),
                syncing: AtomicBool::new(false),
                attempt: AtomicU32::new(0),
                state_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                retry: Mutex::new(None),
                startup: Mutex::new(None),
                worker: Mutex::new(None),
                snapshot: Mutex::new(None),
            }),
        }
    }

    /// Client whose store is chosen by `config`'s remote backend
    pub fn from_config(
        config: &Config,
        queue: Arc<WriteQueue>,
        identity: Arc<UserIdentity>,
        connectivity: Connectivity,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let remote_config = config.clone();
        Self::new(
            queue,
            identity,
            connectivity,
            scheduler,
            SyncSettings::from_config(config),
            Box::new(move || remote::connect(&remote_config)),
        )
    }

    /// Connect to the remote store
    ///
    /// Returns immediately when already connected. Failure leaves the client
    /// usable; later calls try again.
    pub fn init(&self) -> RemoteResult<()> {
        if self.current_store().is_some() {
            return Ok(());
        }

        let store = (self.inner.connector)()?;
        tracing::info!(backend = store.name(), "Remote store initialized");
        match self.inner.store.write() {
            Ok(mut slot) => *slot = Some(store),
            Err(poisoned) => *poisoned.into_inner() = Some(store),
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.current_store().is_some()
    }

    /// Name of the connected backend, if any
    pub fn backend_name(&self) -> Option<&'static str> {
        self.current_store().map(|s| s.name())
    }

    fn current_store(&self) -> Option<Arc<dyn DocumentStore>> {
        match self.inner.store.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn ensure_store(&self) -> Option<Arc<dyn DocumentStore>> {
        if let Some(store) = self.current_store() {
            return Some(store);
        }
        match self.init() {
            Ok(()) => self.current_store(),
            Err(e) => {
                tracing::debug!(error = %e, "Remote store unavailable");
                None
            }
        }
    }

    pub fn user_id(&self) -> String {
        self.inner.identity.user_id()
    }

    /// Replace the user id; blank ids are rejected with `Ok(false)`
    pub fn set_user_id(&self, id: &str) -> StorageResult<bool> {
        self.inner.identity.set_user_id(id)
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Whether queued writes are waiting for replay
    ///
    /// An unreadable queue counts as pending so remote data never
    /// overwrites local edits by accident.
    pub fn is_pending(&self) -> bool {
        match self.inner.queue.is_empty() {
            Ok(empty) => !empty,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read write queue");
                true
            }
        }
    }

    /// Number of queued writes
    pub fn pending_count(&self) -> StorageResult<usize> {
        self.inner.queue.len().map_err(|e| {
            tracing::warn!(error = %e, "Could not count queued writes");
            e
        })
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive failed replays since the last success
    pub fn attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        self.inner.state_tx.send_replace(state);
    }

    /// Push the garage to the remote store, queueing it if that fails
    pub async fn save(&self, data: &Garage) -> StorageResult<SaveOutcome> {
        self.submit(QueueAction::Upsert, Some(data)).await
    }

    /// Delete the user's remote garage, queueing the delete if that fails
    pub async fn remove(&self) -> StorageResult<SaveOutcome> {
        self.submit(QueueAction::Delete, None).await
    }

    async fn submit(&self, action: QueueAction, data: Option<&Garage>) -> StorageResult<SaveOutcome> {
        let Some(store) = self.ensure_store() else {
            tracing::warn!(%action, "Remote store not configured, write not recorded");
            return Ok(SaveOutcome::Skipped);
        };
        let user_id = self.user_id();
        let online = self.inner.connectivity.is_online();

        // Direct writes would jump ahead of queued ones
        let behind_queue = online && self.is_pending();
        if online && !behind_queue {
            match apply(store.as_ref(), action, &user_id, data).await {
                Ok(()) => {
                    tracing::debug!(%action, backend = store.name(), "Remote write delivered");
                    return Ok(SaveOutcome::Pushed);
                }
                Err(e) => tracing::warn!(%action, error = %e, "Remote write failed, queueing"),
            }
        }

        let payload = QueuePayload {
            user_id,
            data: data.cloned(),
        };
        if let Err(e) = self.inner.queue.enqueue(action, &payload) {
            tracing::error!(%action, error = %e, "Could not queue remote write");
            return Err(e);
        }
        if behind_queue {
            self.request_drain();
        }
        Ok(SaveOutcome::Queued)
    }

    /// Fetch the user's remote garage
    ///
    /// `None` when writes are pending, when offline, when the store is
    /// unavailable, or on any error. Never fails.
    pub async fn load(&self) -> Option<Garage> {
        if self.is_pending() {
            tracing::debug!("Writes pending, keeping local data");
            return None;
        }
        if !self.inner.connectivity.is_online() {
            return None;
        }
        let store = self.ensure_store()?;

        match store.get_by_id(&self.user_id()).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Remote load failed");
                None
            }
        }
    }

    /// Replay queued writes, oldest first
    pub async fn drain_queue(&self) -> DrainOutcome {
        self.clone().drain_task().await
    }

    /// Ask the auto-sync worker to drain
    pub fn request_drain(&self) {
        if self.inner.command_tx.send(SyncCommand::Drain).is_err() {
            tracing::debug!("Auto-sync worker not running");
        }
    }

    fn drain_task(self) -> BoxFuture<'static, DrainOutcome> {
        async move {
            if !self.inner.connectivity.is_online() {
                return DrainOutcome::Skipped(SkipReason::Offline);
            }
            if self
                .inner
                .syncing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!("Drain already in progress");
                return DrainOutcome::Skipped(SkipReason::AlreadyRunning);
            }
            let guard = DrainGuard(&self.inner.syncing);

            let Some(store) = self.ensure_store() else {
                return DrainOutcome::Skipped(SkipReason::NotConfigured);
            };

            let mut replayed = 0;
            let mut last_id = None;
            loop {
                let entries = match self.entries_after(last_id) {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::error!(error = %e, "Could not read write queue");
                        self.set_state(SyncState::Idle);
                        return DrainOutcome::Failed;
                    }
                };
                if entries.is_empty() {
                    break;
                }
                if last_id.is_none() {
                    tracing::info!(pending = entries.len(), "Replaying queued writes");
                    self.set_state(SyncState::Draining);
                }

                for entry in entries {
                    match replay(store.as_ref(), &entry).await {
                        Ok(()) => {
                            if let Err(e) = self.inner.queue.remove_by_id(entry.id) {
                                // Replays again next cycle; the store upserts idempotently
                                tracing::warn!(id = entry.id, error = %e, "Could not dequeue replayed write");
                            }
                            self.inner.attempt.store(0, Ordering::SeqCst);
                            last_id = Some(entry.id);
                            replayed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(id = entry.id, action = %entry.action, error = %e, "Replay failed");
                            let delay = self.schedule_retry();
                            return DrainOutcome::RetryScheduled { replayed, delay };
                        }
                    }
                }
            }

            self.set_state(SyncState::Idle);
            drop(guard);

            // A write queued after the last pass saw the flag still set
            if matches!(self.entries_after(last_id), Ok(rest) if !rest.is_empty()) {
                self.request_drain();
            }

            if last_id.is_none() {
                return DrainOutcome::Empty;
            }
            tracing::info!(replayed, "Write queue drained");
            DrainOutcome::Completed { replayed }
        }
        .boxed()
    }

    /// Queued entries newer than `last_id`, oldest first
    fn entries_after(&self, last_id: Option<i64>) -> StorageResult<Vec<QueueEntry>> {
        let mut entries = self.inner.queue.list()?;
        if let Some(last_id) = last_id {
            entries.retain(|entry| entry.id > last_id);
        }
        Ok(entries)
    }

    /// Schedule the next drain after the current backoff delay
    fn schedule_retry(&self) -> Duration {
        let attempt = self.inner.attempt.fetch_add(1, Ordering::SeqCst);
        let delay = backoff_delay(
            attempt,
            self.inner.settings.retry_base_delay,
            self.inner.settings.retry_max_delay,
        );

        let task = self.clone().drain_task().map(|_| ()).boxed();
        let handle = self.inner.scheduler.schedule(delay, task);
        if let Some(previous) = replace_handle(&self.inner.retry, Some(handle)) {
            previous.cancel();
        }

        tracing::info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        self.set_state(SyncState::ScheduledRetry {
            attempt: attempt + 1,
            delay,
        });
        delay
    }

    /// Reset backoff and replay, after connectivity comes back
    pub async fn on_connectivity_restored(&self) -> DrainOutcome {
        self.inner.attempt.store(0, Ordering::SeqCst);

        if self.is_pending() {
            let provider = lock_slot(&self.inner.snapshot).clone();
            if let Some(provider) = provider {
                let snapshot = provider().await;
                let payload = QueuePayload::upsert(self.user_id(), snapshot);
                if let Err(e) = self.inner.queue.enqueue(QueueAction::Upsert, &payload) {
                    tracing::warn!(error = %e, "Could not queue local snapshot");
                }
            }
        }

        self.drain_queue().await
    }

    /// Start automatic replay
    ///
    /// Spawns a worker that drains whenever connectivity returns or a drain
    /// is requested, and schedules one drain after the startup delay. The
    /// snapshot provider, if given, supplies the freshest local garage to
    /// replay after reconnecting while writes are pending. Calling this
    /// again only replaces the provider.
    pub fn setup_auto_sync(&self, snapshot: Option<SnapshotProvider>) {
        *lock_slot(&self.inner.snapshot) = snapshot;

        let Some(mut command_rx) = lock_slot(&self.inner.command_rx).take() else {
            return;
        };
        let mut online_rx = self.inner.connectivity.subscribe();
        online_rx.borrow_and_update();

        let startup = self.clone().drain_task().map(|_| ()).boxed();
        let handle = self
            .inner
            .scheduler
            .schedule(self.inner.settings.startup_drain_delay, startup);
        replace_handle(&self.inner.startup, Some(handle));

        let client = self.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        if online {
                            tracing::info!("Connection restored, replaying queue");
                            client.on_connectivity_restored().await;
                        }
                    }
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(SyncCommand::Drain) => {
                                client.drain_queue().await;
                            }
                            Some(SyncCommand::Shutdown) | None => break,
                        }
                    }
                }
            }
            tracing::debug!("Auto-sync worker stopped");
        });
        *lock_slot(&self.inner.worker) = Some(worker);
    }

    /// Stop the worker and cancel pending timers
    pub async fn shutdown(&self) {
        for slot in [&self.inner.retry, &self.inner.startup] {
            if let Some(handle) = replace_handle(slot, None) {
                handle.cancel();
            }
        }

        let worker = lock_slot(&self.inner.worker).take();
        if let Some(worker) = worker {
            let _ = self.inner.command_tx.send(SyncCommand::Shutdown);
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Auto-sync worker ended abnormally");
            }
        }
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn replace_handle(slot: &Mutex<Option<TaskHandle>>, handle: Option<TaskHandle>) -> Option<TaskHandle> {
    std::mem::replace(&mut *lock_slot(slot), handle)
}

async fn apply(
    store: &dyn DocumentStore,
    action: QueueAction,
    user_id: &str,
    data: Option<&Garage>,
) -> RemoteResult<()> {
    match (action, data) {
        (QueueAction::Upsert, Some(data)) => store.upsert(user_id, data).await,
        (QueueAction::Upsert, None) => Ok(()),
        (QueueAction::Delete, _) => store.delete_by_id(user_id).await,
    }
}

async fn replay(store: &dyn DocumentStore, entry: &QueueEntry) -> RemoteResult<()> {
    apply(
        store,
        entry.action,
        &entry.payload.user_id,
        entry.payload.data.as_ref(),
    )
    .await
}
