//! Resilient collection subscription.
//!
//! [`ResilientCollectionSync`] keeps a typed, validated view of one backend
//! collection and never leaves its owner without data to render:
//!
//! ```text
//!                ┌──────────────────── driver task ─────────────────────┐
//! backend ──────►│ listener ─► validate ─► decode ─► publish (Live)     │
//!                │     │ error                                          │
//!                │     ▼                                                │
//!                │ SyncMachine ─► sleep(base × n) ─► resubscribe        │──► watch<SyncView<T>>
//!                │     │ exhausted / fatal                              │
//!                │     ▼                                                │
//! OnlineSignal ─►│ publish fallback (Degraded / Disconnected)           │
//!                └──────────────────────────────────────────────────────┘
//! ```
//!
//! One instance owns at most one driver task, so at most one open listener
//! and at most one armed retry timer. Teardown bumps a generation counter
//! under the view channel's lock before aborting the task: once
//! [`teardown`](ResilientCollectionSync::teardown) returns, nothing the old
//! driver does can reach the published view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use folio_core::{
    decode_records, AcceptAll, CollectionEntity, Entity, FallbackDataset, SnapshotSource,
    Validator,
};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{BackendEvent, CollectionBackend, Listener};
use crate::config::SyncConfig;
use crate::connectivity::OnlineSignal;
use crate::error::{BackendError, SyncError};
use crate::query::Query;
use crate::state::{FailureStep, SyncMachine, SyncState};

/// What the owner renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView<T> {
    /// Current snapshot. Ids are unique; sources are never mixed.
    pub data: Arc<Vec<Entity<T>>>,
    pub loading: bool,
    /// Advisory message after a failure. The view still has data.
    pub error: Option<String>,
    pub state: SyncState,
    pub source: SnapshotSource,
}

impl<T> SyncView<T> {
    fn initial() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            loading: true,
            error: None,
            state: SyncState::Disconnected,
            source: SnapshotSource::Empty,
        }
    }

    fn begin_connecting(&mut self) {
        self.loading = true;
        self.state = SyncState::Connecting;
    }

    fn serve_live(&mut self, entities: Vec<Entity<T>>) {
        self.data = Arc::new(entities);
        self.source = SnapshotSource::Live;
        self.loading = false;
        self.error = None;
        self.state = SyncState::Live;
    }

    fn serve_fallback(
        &mut self,
        fallback: &Arc<Vec<Entity<T>>>,
        state: SyncState,
        error: Option<String>,
    ) {
        self.data = fallback.clone();
        self.source = SnapshotSource::Fallback;
        self.loading = false;
        self.error = error;
        self.state = state;
    }

    /// Setup failures keep whatever snapshot is already shown.
    fn keep_with_error(&mut self, error: String) {
        self.loading = false;
        self.error = Some(error);
        self.state = SyncState::Failed;
    }
}

/// What to watch and what to show when the watch fails.
pub struct SyncOptions<T> {
    pub collection: String,
    pub query: Option<Query>,
    pub fallback: Vec<T>,
    pub validator: Arc<dyn Validator>,
    /// Singular entity name for diagnostics and fallback ids.
    pub label: String,
}

impl<T> SyncOptions<T> {
    pub fn new(collection: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            query: None,
            fallback: Vec::new(),
            validator: Arc::new(AcceptAll),
            label: label.into(),
        }
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn fallback(mut self, items: Vec<T>) -> Self {
        self.fallback = items;
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }
}

impl<T: CollectionEntity> SyncOptions<T> {
    /// Collection, label and schema taken from the entity type.
    pub fn for_entity() -> Self {
        Self::new(T::COLLECTION, T::LABEL).validator(T::schema())
    }
}

struct Shared<T> {
    tx: watch::Sender<SyncView<T>>,
    generation: AtomicU64,
}

/// Write handle for one driver generation.
struct Publisher<T> {
    shared: Arc<Shared<T>>,
    generation: u64,
}

impl<T> Publisher<T> {
    /// Apply `f` to the view unless this generation was torn down.
    fn publish(&self, f: impl FnOnce(&mut SyncView<T>)) -> bool {
        self.shared.tx.send_if_modified(|view| {
            if self.shared.generation.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            f(view);
            true
        })
    }
}

struct DriverContext<T> {
    backend: Arc<dyn CollectionBackend>,
    online: OnlineSignal,
    config: SyncConfig,
    collection: String,
    query: Option<Query>,
    validator: Arc<dyn Validator>,
    label: String,
    fallback: Arc<Vec<Entity<T>>>,
}

enum ListenOutcome {
    Failed(BackendError),
    Offline,
}

impl<T> DriverContext<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn open_listener(&self) -> Result<Listener, SyncError> {
        if self.collection.trim().is_empty() {
            return Err(SyncError::EmptyCollection);
        }
        if let Some(query) = &self.query {
            query.validate()?;
        }
        Ok(self.backend.subscribe(&self.collection, self.query.as_ref())?)
    }

    async fn listen(
        &self,
        mut listener: Listener,
        machine: &mut SyncMachine,
        publisher: &Publisher<T>,
        online_rx: &mut watch::Receiver<bool>,
    ) -> ListenOutcome {
        loop {
            tokio::select! {
                event = listener.next() => match event {
                    Some(BackendEvent::Snapshot(records)) => {
                        let entities: Vec<Entity<T>> =
                            decode_records(&records, self.validator.as_ref());
                        let dropped = records.len() - entities.len();
                        if dropped > 0 {
                            log::debug!(
                                "Dropped {dropped} of {} {} records that failed validation",
                                records.len(),
                                self.label
                            );
                        }
                        if machine.state() != SyncState::Live {
                            log::info!(
                                "Live on '{}': {} {} records",
                                self.collection,
                                entities.len(),
                                self.label
                            );
                        }
                        machine.on_snapshot();
                        publisher.publish(|view| view.serve_live(entities));
                    }
                    Some(BackendEvent::Error(error)) => return ListenOutcome::Failed(error),
                    None => {
                        return ListenOutcome::Failed(BackendError::unavailable(format!(
                            "listener on '{}' closed",
                            self.collection
                        )));
                    }
                },
                _ = wait_for_online(online_rx, false) => return ListenOutcome::Offline,
            }
        }
    }

    fn go_offline(&self, machine: &mut SyncMachine, publisher: &Publisher<T>) {
        machine.on_offline();
        log::info!("Offline: serving fallback {} data", self.label);
        publisher.publish(|view| view.serve_fallback(&self.fallback, SyncState::Disconnected, None));
    }

    /// Main loop of one driver generation. Runs until aborted.
    async fn drive(self: Arc<Self>, mut machine: SyncMachine, publisher: Publisher<T>) {
        let mut online_rx = self.online.watch();

        loop {
            match machine.state() {
                SyncState::Disconnected => {
                    wait_for_online(&mut online_rx, true).await;
                    machine.on_online(self.config.backend_enabled);
                    log::info!("Back online: resubscribing to '{}'", self.collection);
                    publisher.publish(|view| view.begin_connecting());
                }

                SyncState::Degraded | SyncState::Failed => {
                    // Parked until connectivity drops; coming back online
                    // then starts a fresh subscription.
                    wait_for_online(&mut online_rx, false).await;
                    self.go_offline(&mut machine, &publisher);
                }

                SyncState::Connecting | SyncState::Live | SyncState::Retrying { .. } => {
                    let failure = match self.open_listener() {
                        Ok(listener) => {
                            match self.listen(listener, &mut machine, &publisher, &mut online_rx).await {
                                ListenOutcome::Failed(error) => error,
                                ListenOutcome::Offline => {
                                    self.go_offline(&mut machine, &publisher);
                                    continue;
                                }
                            }
                        }
                        Err(SyncError::Backend(error)) if error.is_transient() => error,
                        Err(error) => {
                            machine.on_setup_failure();
                            let message = format!(
                                "Unable to subscribe to {} data: {error}",
                                self.label
                            );
                            log::error!("{message}");
                            publisher.publish(|view| view.keep_with_error(message));
                            continue;
                        }
                    };

                    match machine.on_failure(failure.is_transient()) {
                        FailureStep::Retry { attempt, delay } => {
                            log::warn!(
                                "Sync of '{}' failed ({failure}); retry {attempt}/{} in {}ms",
                                self.collection,
                                self.config.retry.max_retries,
                                delay.as_millis()
                            );
                            publisher.publish(|view| view.state = SyncState::Retrying { attempt });

                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {
                                    machine.on_retry_elapsed();
                                    publisher.publish(|view| view.begin_connecting());
                                }
                                _ = wait_for_online(&mut online_rx, false) => {
                                    self.go_offline(&mut machine, &publisher);
                                }
                            }
                        }
                        FailureStep::Degrade { retries } => {
                            let message = if retries > 0 {
                                format!(
                                    "Unable to load {} data after {retries} retries: {failure}",
                                    self.label
                                )
                            } else {
                                format!("Unable to load {} data: {failure}", self.label)
                            };
                            log::error!("{message}; serving fallback data");
                            publisher.publish(|view| {
                                view.serve_fallback(&self.fallback, SyncState::Degraded, Some(message))
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Resolve once the signal equals `want`. Never resolves if the signal's
/// sender is gone.
async fn wait_for_online(rx: &mut watch::Receiver<bool>, want: bool) {
    loop {
        if *rx.borrow_and_update() == want {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A live view over one backend collection with automatic degradation to
/// static data.
///
/// Dropping the instance tears the subscription down.
pub struct ResilientCollectionSync<T> {
    shared: Arc<Shared<T>>,
    ctx: Arc<DriverContext<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T> ResilientCollectionSync<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Begin watching.
    ///
    /// With the backend disabled or the signal offline, the fallback
    /// dataset is published before this returns. Otherwise a driver task is
    /// spawned on the current tokio runtime.
    pub fn start(
        backend: Arc<dyn CollectionBackend>,
        online: OnlineSignal,
        config: SyncConfig,
        options: SyncOptions<T>,
    ) -> Self {
        let fallback = FallbackDataset::new(options.label.clone(), options.fallback).entities();
        let ctx = Arc::new(DriverContext {
            backend,
            online,
            config,
            collection: options.collection,
            query: options.query,
            validator: options.validator,
            label: options.label,
            fallback: Arc::new(fallback),
        });
        let (tx, _) = watch::channel(SyncView::initial());
        let shared = Arc::new(Shared {
            tx,
            generation: AtomicU64::new(0),
        });

        let mut sync = Self {
            shared,
            ctx,
            task: None,
        };
        sync.launch();
        sync
    }

    fn launch(&mut self) {
        let publisher = Publisher {
            shared: self.shared.clone(),
            generation: self.shared.generation.load(Ordering::SeqCst),
        };
        let ctx = self.ctx.clone();
        let enabled = ctx.config.backend_enabled;

        let mut machine = SyncMachine::new(ctx.config.retry.clone());
        match machine.start(enabled, ctx.online.is_online()) {
            SyncState::Disconnected => {
                log::info!(
                    "Serving fallback {} data ({})",
                    ctx.label,
                    if enabled { "offline" } else { "backend disabled" }
                );
                publisher.publish(|view| {
                    view.serve_fallback(&ctx.fallback, SyncState::Disconnected, None)
                });
                if !enabled {
                    // Nothing can move a disabled backend out of Disconnected.
                    return;
                }
            }
            _ => {
                log::info!("Subscribing to '{}'", ctx.collection);
                publisher.publish(|view| view.begin_connecting());
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.task = Some(handle.spawn(ctx.drive(machine, publisher)));
            }
            Err(e) => {
                let message = format!("Unable to load {} data: {e}", self.ctx.label);
                log::error!("{message}");
                publisher.publish(|view| {
                    view.serve_fallback(&self.ctx.fallback, SyncState::Degraded, Some(message))
                });
            }
        }
    }

    /// Tear down the current subscription and any pending retry, then
    /// subscribe again from scratch.
    pub fn refetch(&mut self) {
        log::debug!("Refetching '{}'", self.ctx.collection);
        self.teardown();
        self.launch();
    }

    /// Whether a driver task is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn view(&self) -> SyncView<T> {
        self.shared.tx.borrow().clone()
    }

    pub fn data(&self) -> Arc<Vec<Entity<T>>> {
        self.shared.tx.borrow().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.tx.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.shared.tx.borrow().error.clone()
    }

    pub fn state(&self) -> SyncState {
        self.shared.tx.borrow().state
    }

    /// Receiver woken on every view change.
    pub fn subscribe(&self) -> watch::Receiver<SyncView<T>> {
        self.shared.tx.subscribe()
    }

    pub fn collection(&self) -> &str {
        &self.ctx.collection
    }
}

impl<T> ResilientCollectionSync<T> {
    /// Cancel the open listener and any armed retry timer. The view keeps
    /// its last value and receives no further updates.
    pub fn teardown(&mut self) {
        let generation = &self.shared.generation;
        self.shared.tx.send_if_modified(|_| {
            generation.fetch_add(1, Ordering::SeqCst);
            false
        });
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for ResilientCollectionSync<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
