// ── Generic entity store ──
//
// One store per entity kind: an ordered local mirror of one remote
// collection (front = newest), fed by a bulk load plus the multiplexer's
// change feed, with optimistic create/delete and remote-first update.
//
// State machine: UNINITIALIZED -> LOADING -> READY <-> DEGRADED, with a
// terminal DISCONNECTED reached only through `disconnect()`. In DEGRADED
// the last-known data stays visible while a bounded backoff sequence
// tries to recover; if it runs dry the store waits for an external
// forced re-initialize.

mod retry;

pub use retry::RetryPolicy;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use polis_api::{ChangeMessage, ChangeOp, FeedStatus, RestClient, Row};

use crate::error::CoreError;
use crate::model::{Entity, RecordId};
use crate::multiplexer::{ChangeFeedMultiplexer, FeedSubscription};
use crate::stream::ItemsStream;

// ── StoreState ───────────────────────────────────────────────────────

/// Lifecycle state of one store, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No data loaded, no subscription.
    Uninitialized,
    /// Bulk read in flight.
    Loading,
    /// Loaded and live.
    Ready,
    /// Live connection lost; stale-but-usable data remains visible.
    Degraded,
    /// Explicitly shut down. Terminal.
    Disconnected,
}

// ── Backend seam ─────────────────────────────────────────────────────

/// Row operations a store needs from the backend.
///
/// Implemented by [`RestClient`] for production and by scriptable mocks
/// in tests. Static dispatch; the futures are `Send` so stores can drive
/// them from spawned tasks.
pub trait TableOps: Clone + Send + Sync + 'static {
    fn fetch_all(
        &self,
        table: &'static str,
        order_field: &'static str,
        descending: bool,
    ) -> impl Future<Output = Result<Vec<Row>, polis_api::Error>> + Send;

    fn insert_row(
        &self,
        table: &'static str,
        row: Row,
    ) -> impl Future<Output = Result<Row, polis_api::Error>> + Send;

    fn update_row(
        &self,
        table: &'static str,
        id: &str,
        fields: Row,
    ) -> impl Future<Output = Result<Row, polis_api::Error>> + Send;

    fn delete_row(
        &self,
        table: &'static str,
        id: &str,
    ) -> impl Future<Output = Result<(), polis_api::Error>> + Send;
}

impl TableOps for RestClient {
    fn fetch_all(
        &self,
        table: &'static str,
        order_field: &'static str,
        descending: bool,
    ) -> impl Future<Output = Result<Vec<Row>, polis_api::Error>> + Send {
        let client = self.clone();
        async move { client.select_all(table, order_field, descending).await }
    }

    fn insert_row(
        &self,
        table: &'static str,
        row: Row,
    ) -> impl Future<Output = Result<Row, polis_api::Error>> + Send {
        let client = self.clone();
        async move { client.insert(table, row).await }
    }

    fn update_row(
        &self,
        table: &'static str,
        id: &str,
        fields: Row,
    ) -> impl Future<Output = Result<Row, polis_api::Error>> + Send {
        let client = self.clone();
        let id = id.to_owned();
        async move { client.update(table, &id, fields).await }
    }

    fn delete_row(
        &self,
        table: &'static str,
        id: &str,
    ) -> impl Future<Output = Result<(), polis_api::Error>> + Send {
        let client = self.clone();
        let id = id.to_owned();
        async move { client.delete(table, &id).await }
    }
}

// ── EntityStore ──────────────────────────────────────────────────────

/// Local mirror of one remote collection with CRUD and live updates.
///
/// Cheaply cloneable via `Arc`; every clone shares the same state. No
/// two stores ever share a record sequence -- each instance owns its own.
#[derive(Clone)]
pub struct EntityStore<T: Entity, C: TableOps> {
    inner: Arc<StoreInner<T, C>>,
}

struct StoreInner<T: Entity, C: TableOps> {
    api: C,
    mux: Arc<ChangeFeedMultiplexer>,
    subscriber_id: String,
    retry: RetryPolicy,
    state: watch::Sender<StoreState>,
    items: watch::Sender<Arc<Vec<Arc<T>>>>,
    connected: watch::Sender<bool>,
    error: watch::Sender<Option<String>>,
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
    /// Cancel handle of the current event pump; replaced on re-initialize.
    pump_cancel: Mutex<Option<CancellationToken>>,
    /// Serializes concurrent `initialize` calls.
    init_lock: Mutex<()>,
}

impl<T: Entity, C: TableOps> EntityStore<T, C> {
    pub fn new(api: C, mux: Arc<ChangeFeedMultiplexer>) -> Self {
        Self::with_retry(api, mux, RetryPolicy::default())
    }

    pub fn with_retry(api: C, mux: Arc<ChangeFeedMultiplexer>, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(StoreState::Uninitialized);
        let (items, _) = watch::channel(Arc::new(Vec::new()));
        let (connected, _) = watch::channel(false);
        let (error, _) = watch::channel(None);
        let (last_sync, _) = watch::channel(None);

        Self {
            inner: Arc::new(StoreInner {
                api,
                mux,
                subscriber_id: format!("{}:{}", T::COLLECTION, Uuid::new_v4()),
                retry,
                state,
                items,
                connected,
                error,
                last_sync,
                cancel: CancellationToken::new(),
                pump_cancel: Mutex::new(None),
                init_lock: Mutex::new(()),
            }),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    /// Current ordered snapshot (cheap `Arc` clone).
    pub fn items(&self) -> Arc<Vec<Arc<T>>> {
        self.inner.items.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> ItemsStream<T> {
        ItemsStream::new(self.inner.items.subscribe())
    }

    /// Synchronous local lookup by server id. Never touches the network.
    pub fn get_item(&self, id: &str) -> Option<Arc<T>> {
        self.inner
            .items
            .borrow()
            .iter()
            .find(|r| r.id().matches(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    // ── Status accessors ─────────────────────────────────────────────

    pub fn state(&self) -> StoreState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state() == StoreState::Loading
    }

    /// Mirrors the underlying collection's connection status.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn connected_changes(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Latest recorded failure, if any. At most one outstanding message.
    pub fn error(&self) -> Option<String> {
        self.inner.error.borrow().clone()
    }

    /// Dismiss the error indicator.
    pub fn clear_error(&self) {
        let _ = self.inner.error.send(None);
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_sync.borrow()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bulk-load the collection and go live.
    ///
    /// Idempotent: a second call while `LOADING` or already `READY` is a
    /// no-op unless `force` is set (which bypasses the `READY` guard
    /// only). On bulk-read failure the store returns to `UNINITIALIZED`
    /// so a later call can retry from scratch.
    pub async fn initialize(&self, force: bool) -> Result<(), CoreError> {
        let _init = self.inner.init_lock.lock().await;

        match *self.inner.state.borrow() {
            StoreState::Disconnected => return Err(CoreError::StoreDisconnected),
            StoreState::Loading => return Ok(()),
            StoreState::Ready if !force => return Ok(()),
            _ => {}
        }

        self.set_state(StoreState::Loading);
        debug!(collection = T::COLLECTION, force, "loading collection");

        let rows = match self
            .inner
            .api
            .fetch_all(T::COLLECTION, T::ORDER_FIELD, true)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                let _ = self.inner.error.send(Some(e.to_string()));
                self.set_state(StoreState::Uninitialized);
                return Err(e.into());
            }
        };

        if self.state() == StoreState::Disconnected {
            return Err(CoreError::StoreDisconnected);
        }

        let records: Vec<Arc<T>> = rows.iter().map(|row| Arc::new(T::from_row(row))).collect();
        let count = records.len();
        self.inner.items.send_replace(Arc::new(records));
        let _ = self.inner.last_sync.send(Some(Utc::now()));
        let _ = self.inner.error.send(None);

        let sub = self
            .inner
            .mux
            .subscribe(T::COLLECTION, &self.inner.subscriber_id);

        if self.state() == StoreState::Disconnected {
            self.inner
                .mux
                .unsubscribe(T::COLLECTION, &self.inner.subscriber_id);
            return Err(CoreError::StoreDisconnected);
        }

        let _ = self.inner.connected.send(sub.status.borrow().is_connected());

        let pump_cancel = self.inner.cancel.child_token();
        {
            let mut slot = self.inner.pump_cancel.lock().await;
            if let Some(old) = slot.take() {
                old.cancel();
            }
            *slot = Some(pump_cancel.clone());
        }
        // Boxed: the pump's reconnect path re-enters initialize(), and one
        // type-erased edge keeps the future types finite.
        let pump: std::pin::Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(run_pump(self.clone(), sub, pump_cancel));
        tokio::spawn(pump);

        self.set_state(StoreState::Ready);
        info!(collection = T::COLLECTION, count, "store ready");
        Ok(())
    }

    /// Tear the store down for good. Results of in-flight calls arriving
    /// afterwards are ignored.
    pub async fn disconnect(&self) {
        let _ = self.inner.state.send(StoreState::Disconnected);
        let _ = self.inner.connected.send(false);
        self.inner.cancel.cancel();

        if let Some(pump) = self.inner.pump_cancel.lock().await.take() {
            pump.cancel();
        }

        self.inner
            .mux
            .unsubscribe(T::COLLECTION, &self.inner.subscriber_id);
        debug!(collection = T::COLLECTION, "store disconnected");
    }


    // ── CRUD ─────────────────────────────────────────────────────────

    /// Create a record optimistically.
    ///
    /// A placeholder with a pending id appears at the front of the
    /// sequence before the network round-trip; on success it is replaced
    /// by the server's row, on failure it is removed and the error both
    /// recorded and returned. The collection never retains a phantom
    /// record after a failed create.
    pub async fn add_item(&self, draft: T::Draft) -> Result<Arc<T>, CoreError> {
        if self.state() == StoreState::Disconnected {
            return Err(CoreError::StoreDisconnected);
        }

        let placeholder_id = RecordId::pending();
        let placeholder = Arc::new(T::placeholder(&draft, placeholder_id.clone(), Utc::now()));
        self.prepend(placeholder);

        match self
            .inner
            .api
            .insert_row(T::COLLECTION, T::draft_row(&draft))
            .await
        {
            Ok(row) => {
                let record = Arc::new(T::from_row(&row));
                if self.state() != StoreState::Disconnected {
                    self.reconcile_create(&placeholder_id, Arc::clone(&record));
                    let _ = self.inner.last_sync.send(Some(Utc::now()));
                }
                Ok(record)
            }
            Err(e) => {
                if self.state() != StoreState::Disconnected {
                    self.remove_record_id(&placeholder_id);
                    let _ = self.inner.error.send(Some(e.to_string()));
                }
                Err(e.into())
            }
        }
    }

    /// Update the given fields remotely.
    ///
    /// Deliberately not optimistic: the live update event reconciles
    /// local state, which avoids duplicate-patch races between the echo
    /// and a local patch.
    pub async fn update_item(&self, id: &str, patch: T::Patch) -> Result<(), CoreError> {
        if self.state() == StoreState::Disconnected {
            return Err(CoreError::StoreDisconnected);
        }

        match self
            .inner
            .api
            .update_row(T::COLLECTION, id, T::patch_row(&patch))
            .await
        {
            Ok(_row) => Ok(()),
            Err(e) => {
                if self.state() != StoreState::Disconnected {
                    let _ = self.inner.error.send(Some(e.to_string()));
                }
                Err(e.into())
            }
        }
    }

    /// Delete a record optimistically.
    ///
    /// The record disappears immediately; a failed remote delete puts it
    /// back (at the front -- original position is not guaranteed) and
    /// records the error.
    pub async fn delete_item(&self, id: &str) -> Result<(), CoreError> {
        if self.state() == StoreState::Disconnected {
            return Err(CoreError::StoreDisconnected);
        }

        let removed = self.take_matching(id);

        match self.inner.api.delete_row(T::COLLECTION, id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.state() != StoreState::Disconnected {
                    if let Some(record) = removed {
                        self.prepend(record);
                    }
                    let _ = self.inner.error.send(Some(e.to_string()));
                }
                Err(e.into())
            }
        }
    }

    // ── Event application ────────────────────────────────────────────

    fn apply_change(&self, change: &ChangeMessage) {
        if self.state() == StoreState::Disconnected {
            return;
        }

        let Some(id) = change.row.get("id").and_then(Value::as_str) else {
            warn!(
                collection = T::COLLECTION,
                op = ?change.op,
                "dropping change event without id"
            );
            return;
        };

        match change.op {
            ChangeOp::Insert => {
                let record = Arc::new(T::from_row(&change.row));
                self.inner.items.send_modify(|snap| {
                    // An optimistic create's own echo must not duplicate.
                    if snap.iter().any(|r| r.id().matches(id)) {
                        return;
                    }
                    let mut next = Vec::with_capacity(snap.len() + 1);
                    next.push(record);
                    next.extend(snap.iter().cloned());
                    *snap = Arc::new(next);
                });
            }
            ChangeOp::Update => {
                let record = Arc::new(T::from_row(&change.row));
                self.inner.items.send_modify(|snap| {
                    if let Some(pos) = snap.iter().position(|r| r.id().matches(id)) {
                        let mut next: Vec<Arc<T>> = snap.as_ref().clone();
                        next[pos] = record;
                        *snap = Arc::new(next);
                    } else {
                        debug!(
                            collection = T::COLLECTION,
                            id, "update event for unknown record; dropping"
                        );
                    }
                });
            }
            ChangeOp::Delete => {
                self.inner.items.send_modify(|snap| {
                    if snap.iter().any(|r| r.id().matches(id)) {
                        let next: Vec<Arc<T>> = snap
                            .iter()
                            .filter(|r| !r.id().matches(id))
                            .cloned()
                            .collect();
                        *snap = Arc::new(next);
                    }
                });
            }
        }

        let _ = self.inner.last_sync.send(Some(Utc::now()));
    }

    // ── Internal helpers ─────────────────────────────────────────────

    /// Refuses transitions out of the terminal `Disconnected` state.
    fn set_state(&self, next: StoreState) {
        self.inner.state.send_if_modified(|current| {
            if *current == StoreState::Disconnected || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn prepend(&self, record: Arc<T>) {
        self.inner.items.send_modify(|snap| {
            let mut next = Vec::with_capacity(snap.len() + 1);
            next.push(record);
            next.extend(snap.iter().cloned());
            *snap = Arc::new(next);
        });
    }

    /// Swap a confirmed create in for its placeholder.
    ///
    /// The placeholder is matched by its pending id; the server record is
    /// inserted only if its id is not already present (the live insert
    /// event may have landed first).
    fn reconcile_create(&self, placeholder_id: &RecordId, record: Arc<T>) {
        self.inner.items.send_modify(|snap| {
            let server_id = record.id().clone();
            let mut next: Vec<Arc<T>> = snap.as_ref().clone();
            let placeholder_pos = next.iter().position(|r| r.id() == placeholder_id);
            let echo_present = next.iter().any(|r| *r.id() == server_id);

            match (placeholder_pos, echo_present) {
                (Some(pos), false) => next[pos] = record,
                (Some(pos), true) => {
                    next.remove(pos);
                }
                (None, false) => next.insert(0, record),
                (None, true) => {}
            }
            *snap = Arc::new(next);
        });
    }

    fn remove_record_id(&self, id: &RecordId) {
        self.inner.items.send_modify(|snap| {
            if snap.iter().any(|r| r.id() == id) {
                let next: Vec<Arc<T>> = snap.iter().filter(|r| r.id() != id).cloned().collect();
                *snap = Arc::new(next);
            }
        });
    }

    /// Remove and return the record with the given server id, if present.
    fn take_matching(&self, id: &str) -> Option<Arc<T>> {
        let mut removed = None;
        self.inner.items.send_modify(|snap| {
            if let Some(pos) = snap.iter().position(|r| r.id().matches(id)) {
                let mut next: Vec<Arc<T>> = snap.as_ref().clone();
                removed = Some(next.remove(pos));
                *snap = Arc::new(next);
            }
        });
        removed
    }

    /// Record a lost live connection. Returns whether a reconnection
    /// sequence should start (only from `Ready`).
    fn note_feed_down(&self, status: &FeedStatus) -> bool {
        let _ = self.inner.connected.send(false);

        let was_ready = self.state() == StoreState::Ready;
        if was_ready {
            let message = match status {
                FeedStatus::Error(e) => format!("live connection lost: {e}"),
                _ => "live connection closed".to_owned(),
            };
            warn!(collection = T::COLLECTION, %message, "entering degraded state");
            let _ = self.inner.error.send(Some(message));
            self.set_state(StoreState::Degraded);
        }
        was_ready
    }

    /// Bounded backoff recovery. Each attempt is a forced re-initialize;
    /// exhaustion leaves the store degraded until an external re-trigger.
    async fn run_reconnect(&self, cancel: CancellationToken) {
        let policy = self.inner.retry;

        for attempt in 0..policy.max_attempts {
            let delay = policy.backoff_delay(attempt);
            debug!(
                collection = T::COLLECTION,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect attempt"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            if self.state() == StoreState::Disconnected {
                return;
            }

            // Type-erase this recursive edge: `initialize` re-enters the
            // pump, which re-enters `run_reconnect`, which re-enters
            // `initialize`. Boxing the future (from outside `initialize`'s
            // own defining scope) keeps the future types finite and breaks
            // the auto-trait (`Send`) inference cycle.
            match recurse::boxed_initialize(self).await {
                Ok(()) => {
                    info!(collection = T::COLLECTION, attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(
                        collection = T::COLLECTION,
                        attempt,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    // Keep last-known data visible instead of the clean
                    // slate a direct initialize failure would leave.
                    self.set_state(StoreState::Degraded);
                }
            }
        }

        warn!(
            collection = T::COLLECTION,
            "reconnect attempts exhausted; store stays degraded"
        );
    }
}

// ── Event pump ───────────────────────────────────────────────────────

/// Drive one subscription generation: apply events, mirror status, and
/// hand off to the reconnection sequence when the feed dies.
async fn run_pump<T: Entity, C: TableOps>(
    store: EntityStore<T, C>,
    sub: FeedSubscription,
    cancel: CancellationToken,
) {
    let mut events = sub.events;
    let mut status = sub.status;

    let reconnect = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break false,
            changed = status.changed() => {
                match changed {
                    Ok(()) => {
                        let s = status.borrow_and_update().clone();
                        match s {
                            FeedStatus::Connected => {
                                let _ = store.inner.connected.send(true);
                            }
                            FeedStatus::Connecting => {}
                            FeedStatus::Closed | FeedStatus::Error(_) => {
                                break store.note_feed_down(&s);
                            }
                        }
                    }
                    Err(_) => break store.note_feed_down(&FeedStatus::Closed),
                }
            }
            event = events.recv() => {
                match event {
                    Ok(change) => store.apply_change(&change),
                    Err(RecvError::Lagged(n)) => {
                        warn!(
                            collection = T::COLLECTION,
                            skipped = n,
                            "change-feed receiver lagged"
                        );
                    }
                    Err(RecvError::Closed) => break store.note_feed_down(&FeedStatus::Closed),
                }
            }
        }
    };

    if reconnect {
        store.run_reconnect(cancel).await;
    }
}

// ── Recursion break ──────────────────────────────────────────────────

/// Boxes the recursive `initialize` edge from outside `initialize`'s own
/// opaque-type defining scope, so the compiler can check `Send` without
/// hitting the mutual-recursion auto-trait inference cycle between
/// `initialize`, the spawned pump, and `run_reconnect`.
mod recurse {
    use super::{CoreError, Entity, EntityStore, Future, Pin, TableOps};

    pub(super) fn boxed_initialize<T: Entity, C: TableOps>(
        store: &EntityStore<T, C>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + '_>> {
        Box::pin(store.initialize(true))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
