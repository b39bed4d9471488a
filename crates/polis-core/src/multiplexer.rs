// ── Change-feed connection multiplexer ──
//
// Process-wide bookkeeping that guarantees at most one live change-feed
// connection per remote collection, no matter how many stores are
// interested. Stores register interest with `subscribe`; the returned
// handles fan out from a single per-collection connection. When the
// last subscriber leaves, the connection is closed and the bookkeeping
// purged immediately. A periodic sweep guards against subscribe/
// unsubscribe races leaving orphaned connections behind.
//
// The multiplexer never reconnects on its own: status transitions are
// forwarded to subscribers and the collection is marked not-connected.
// Reconnection policy lives in the store (see `store`).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use polis_api::{ChangeMessage, FeedConn, FeedStatus};

use crate::feed::ChangeFeed;

// ── Fan-out channel capacity ─────────────────────────────────────────

const FANOUT_CHANNEL_CAPACITY: usize = 1024;

// ── SweepPolicy ──────────────────────────────────────────────────────

/// Tuning for the passive cleanup sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// How often the sweep runs.
    pub interval: Duration,
    /// A collection idle at least this long with zero subscribers is
    /// closed and purged.
    pub idle_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            idle_after: Duration::from_secs(10 * 60),
        }
    }
}

// ── Subscription handle ──────────────────────────────────────────────

/// What a store receives back from [`ChangeFeedMultiplexer::subscribe`].
///
/// Events arrive on a broadcast receiver shared (via the sender) with
/// every other subscriber of the same collection; `status` reports the
/// current connection status immediately on `borrow()`.
pub struct FeedSubscription {
    pub events: broadcast::Receiver<Arc<ChangeMessage>>,
    pub status: watch::Receiver<FeedStatus>,
}

// ── Internal bookkeeping ─────────────────────────────────────────────

/// One live connection: its cancel handle and the pump forwarding its
/// frames into the collection's fan-out channels.
struct FeedLink {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Bookkeeping for one remote collection.
///
/// The fan-out senders outlive any individual connection, so a
/// subscriber's receivers stay valid across a close-and-reopen cycle.
struct TrackedCollection {
    subscribers: HashSet<String>,
    events: broadcast::Sender<Arc<ChangeMessage>>,
    status: watch::Sender<FeedStatus>,
    link: Option<FeedLink>,
    last_activity_ms: Arc<AtomicI64>,
}

impl TrackedCollection {
    fn new() -> Self {
        let (events, _) = broadcast::channel(FANOUT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(FeedStatus::Connecting);

        Self {
            subscribers: HashSet::new(),
            events,
            status,
            link: None,
            last_activity_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn link_is_live(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.pump.is_finished())
    }
}

// ── Multiplexer ──────────────────────────────────────────────────────

/// One shared instance per process, injected into every store at
/// composition time. The single-connection-per-collection invariant is
/// enforced by this registry, not by caller convention.
pub struct ChangeFeedMultiplexer {
    feed: Arc<dyn ChangeFeed>,
    collections: Arc<DashMap<String, TrackedCollection>>,
    sweep_cancel: CancellationToken,
}

impl ChangeFeedMultiplexer {
    /// Create a multiplexer with default sweep tuning.
    ///
    /// Must be called inside a tokio runtime: the cleanup sweep is
    /// spawned here and runs until [`disconnect_all`](Self::disconnect_all).
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self::with_sweep(feed, SweepPolicy::default())
    }

    pub fn with_sweep(feed: Arc<dyn ChangeFeed>, policy: SweepPolicy) -> Self {
        let collections = Arc::new(DashMap::new());
        let sweep_cancel = CancellationToken::new();

        tokio::spawn(sweep_task(
            Arc::clone(&collections),
            policy,
            sweep_cancel.clone(),
        ));

        Self {
            feed,
            collections,
            sweep_cancel,
        }
    }

    /// Register `subscriber` as interested in `collection`.
    ///
    /// Opens a connection only if none is live for that name; otherwise
    /// the call is pure bookkeeping plus fresh fan-out receivers. A dead
    /// link (the previous connection ended in `Closed`/`Error`) is
    /// replaced here -- this is the reopen path a store's forced
    /// re-initialize goes through.
    pub fn subscribe(&self, collection: &str, subscriber: &str) -> FeedSubscription {
        let mut entry = self
            .collections
            .entry(collection.to_owned())
            .or_insert_with(TrackedCollection::new);

        entry.subscribers.insert(subscriber.to_owned());
        entry.touch();

        if !entry.link_is_live() {
            if let Some(stale) = entry.link.take() {
                stale.cancel.cancel();
            }
            let link = open_link(
                self.feed.as_ref(),
                collection,
                entry.events.clone(),
                entry.status.clone(),
                Arc::clone(&entry.last_activity_ms),
            );
            entry.link = Some(link);
            debug!(collection, "opened change-feed connection");
        }

        FeedSubscription {
            events: entry.events.subscribe(),
            status: entry.status.subscribe(),
        }
    }

    /// Remove `subscriber` from the collection's interest set.
    ///
    /// The last subscriber out closes the connection and purges all
    /// bookkeeping immediately -- no grace period on explicit
    /// unsubscribe.
    pub fn unsubscribe(&self, collection: &str, subscriber: &str) {
        let emptied = match self.collections.get_mut(collection) {
            Some(mut entry) => {
                entry.subscribers.remove(subscriber);
                if entry.subscribers.is_empty() {
                    if let Some(link) = entry.link.take() {
                        link.cancel.cancel();
                    }
                    let _ = entry.status.send(FeedStatus::Closed);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if emptied {
            // Re-checked under the shard lock: a racing subscribe wins.
            self.collections
                .remove_if(collection, |_, t| t.subscribers.is_empty());
            debug!(collection, "closed change-feed connection (no subscribers)");
        }
    }

    /// Close every live connection and halt the cleanup sweep.
    /// Process-shutdown only.
    pub fn disconnect_all(&self) {
        self.sweep_cancel.cancel();

        for mut entry in self.collections.iter_mut() {
            if let Some(link) = entry.link.take() {
                link.cancel.cancel();
            }
            let _ = entry.status.send(FeedStatus::Closed);
        }
        self.collections.clear();

        info!("all change-feed connections closed");
    }

    /// Number of collections with a live connection.
    pub fn live_connections(&self) -> usize {
        self.collections
            .iter()
            .filter(|e| e.link_is_live())
            .count()
    }

    /// Current subscriber count for a collection.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |e| e.subscribers.len())
    }

    /// Whether any bookkeeping exists for a collection.
    pub fn is_tracked(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }
}

// ── Connection pump ──────────────────────────────────────────────────

/// Open one connection and spawn the pump forwarding its frames into the
/// collection's fan-out channels.
fn open_link(
    feed: &dyn ChangeFeed,
    collection: &str,
    events_tx: broadcast::Sender<Arc<ChangeMessage>>,
    status_tx: watch::Sender<FeedStatus>,
    activity: Arc<AtomicI64>,
) -> FeedLink {
    let conn = feed.open(collection);
    let cancel = conn.cancel_token();

    // Forward the connection's current status before the pump starts, so
    // a subscriber returning from `subscribe` immediately sees it.
    let _ = status_tx.send(conn.status.borrow().clone());

    let pump = tokio::spawn(pump_connection(conn, events_tx, status_tx, activity));

    FeedLink { cancel, pump }
}

/// Copy frames and status transitions from one live connection into the
/// collection's fan-out channels until the connection ends.
async fn pump_connection(
    conn: FeedConn,
    events_tx: broadcast::Sender<Arc<ChangeMessage>>,
    status_tx: watch::Sender<FeedStatus>,
    activity: Arc<AtomicI64>,
) {
    let cancel = conn.cancel_token();
    let mut events = conn.events;
    let mut status = conn.status;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = status.changed() => {
                match changed {
                    Ok(()) => {
                        let s = status.borrow_and_update().clone();
                        let terminal = s.is_terminal();
                        if let FeedStatus::Error(ref e) = s {
                            warn!(error = %e, "change-feed connection errored");
                        }
                        let _ = status_tx.send(s);
                        if terminal {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = status_tx.send(FeedStatus::Closed);
                        break;
                    }
                }
            }
            msg = events.recv() => {
                match msg {
                    Some(change) => {
                        activity.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                        // Send errors only mean zero receivers right now.
                        let _ = events_tx.send(Arc::new(change));
                    }
                    None => {
                        // Connection task gone; surface its final status.
                        let s = status.borrow().clone();
                        let _ = status_tx.send(if s.is_terminal() { s } else { FeedStatus::Closed });
                        break;
                    }
                }
            }
        }
    }
}

// ── Cleanup sweep ────────────────────────────────────────────────────

async fn sweep_task(
    collections: Arc<DashMap<String, TrackedCollection>>,
    policy: SweepPolicy,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => sweep_idle(&collections, policy.idle_after),
        }
    }
}

/// One sweep pass: purge collections idle past the threshold with zero
/// subscribers.
fn sweep_idle(collections: &DashMap<String, TrackedCollection>, idle_after: Duration) {
    let now_ms = Utc::now().timestamp_millis();
    let idle_ms = i64::try_from(idle_after.as_millis()).unwrap_or(i64::MAX);

    let stale: Vec<String> = collections
        .iter()
        .filter(|e| {
            e.subscribers.is_empty()
                && now_ms - e.last_activity_ms.load(Ordering::Relaxed) >= idle_ms
        })
        .map(|e| e.key().clone())
        .collect();

    for key in stale {
        // Re-checked under the shard lock: a racing subscribe wins.
        if let Some((name, tracked)) = collections.remove_if(&key, |_, t| t.subscribers.is_empty())
        {
            if let Some(link) = tracked.link {
                link.cancel.cancel();
            }
            let _ = tracked.status.send(FeedStatus::Closed);
            debug!(collection = %name, "swept idle change-feed collection");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use polis_api::ChangeOp;

    use crate::test_support::{StubFeed, change, wait_until};

    fn setup() -> (Arc<StubFeed>, ChangeFeedMultiplexer) {
        let feed = Arc::new(StubFeed::default());
        let mux = ChangeFeedMultiplexer::with_sweep(
            Arc::clone(&feed) as Arc<dyn ChangeFeed>,
            SweepPolicy {
                interval: Duration::from_secs(3600),
                idle_after: Duration::from_secs(600),
            },
        );
        (feed, mux)
    }

    fn insert_event(id: &str) -> ChangeMessage {
        change(ChangeOp::Insert, id)
    }

    // ── Single-connection invariant ─────────────────────────────────

    #[tokio::test]
    async fn many_subscribers_share_one_connection() {
        let (feed, mux) = setup();

        let _a = mux.subscribe("citizens", "store-a");
        let _b = mux.subscribe("citizens", "store-b");
        let _c = mux.subscribe("citizens", "store-c");

        assert_eq!(feed.open_count(), 1);
        assert_eq!(mux.live_connections(), 1);
        assert_eq!(mux.subscriber_count("citizens"), 3);
    }

    #[tokio::test]
    async fn distinct_collections_get_distinct_connections() {
        let (feed, mux) = setup();

        let _a = mux.subscribe("citizens", "store-a");
        let _b = mux.subscribe("requests", "store-b");

        assert_eq!(feed.open_count(), 2);
        assert_eq!(mux.live_connections(), 2);
    }

    // ── Subscriber bookkeeping ──────────────────────────────────────

    #[tokio::test]
    async fn connection_survives_until_last_unsubscribe() {
        let (feed, mux) = setup();

        let _a = mux.subscribe("citizens", "store-a");
        let _b = mux.subscribe("citizens", "store-b");
        let _c = mux.subscribe("citizens", "store-c");

        mux.unsubscribe("citizens", "store-a");
        mux.unsubscribe("citizens", "store-b");
        assert!(mux.is_tracked("citizens"));
        assert!(!feed.conn(0).cancel.is_cancelled());

        mux.unsubscribe("citizens", "store-c");
        assert!(!mux.is_tracked("citizens"));
        assert!(feed.conn(0).cancel.is_cancelled());
        assert_eq!(feed.open_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_subscriber_is_harmless() {
        let (_feed, mux) = setup();
        mux.unsubscribe("citizens", "nobody");
        assert!(!mux.is_tracked("citizens"));
    }

    // ── Fan-out ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let (feed, mux) = setup();

        let mut a = mux.subscribe("citizens", "store-a");
        let mut b = mux.subscribe("citizens", "store-b");

        feed.conn(0).events.send(insert_event("c1")).await.unwrap();

        let got_a = a.events.recv().await.unwrap();
        let got_b = b.events.recv().await.unwrap();
        assert_eq!(got_a.row["id"], "c1");
        assert_eq!(got_b.row["id"], "c1");
    }

    #[tokio::test]
    async fn current_status_visible_immediately_on_subscribe() {
        let (_feed, mux) = setup();

        let sub = mux.subscribe("citizens", "store-a");
        assert_eq!(*sub.status.borrow(), FeedStatus::Connected);
    }


    #[tokio::test]
    async fn status_error_is_forwarded_without_retry() {
        let (feed, mux) = setup();

        let mut sub = mux.subscribe("citizens", "store-a");
        feed.conn(0)
            .status
            .send(FeedStatus::Error("socket reset".into()))
            .unwrap();

        sub.status.changed().await.unwrap();
        assert_eq!(
            *sub.status.borrow(),
            FeedStatus::Error("socket reset".into())
        );

        // The multiplexer does not reconnect on its own.
        wait_until(|| mux.live_connections() == 0).await;
        assert_eq!(feed.open_count(), 1);
    }

    #[tokio::test]
    async fn dead_connection_reopened_on_next_subscribe() {
        let (feed, mux) = setup();

        let mut sub = mux.subscribe("citizens", "store-a");
        feed.conn(0).status.send(FeedStatus::Closed).unwrap();
        sub.status.changed().await.unwrap();
        wait_until(|| mux.live_connections() == 0).await;

        // The store's forced re-initialize lands here.
        let resub = mux.subscribe("citizens", "store-a");
        assert_eq!(feed.open_count(), 2);
        assert_eq!(mux.live_connections(), 1);
        assert_eq!(*resub.status.borrow(), FeedStatus::Connected);
    }

    // ── Sweep ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn sweep_purges_idle_orphans_only() {
        let (_feed, mux) = setup();

        let idle_after = Duration::from_secs(600);
        let old_ms = Utc::now().timestamp_millis() - 2 * 600 * 1000;

        // Orphan: idle past the threshold, zero subscribers.
        let orphan = TrackedCollection::new();
        orphan.last_activity_ms.store(old_ms, Ordering::Relaxed);
        mux.collections.insert("orphan".into(), orphan);

        // Idle but still wanted.
        let mut wanted = TrackedCollection::new();
        wanted.subscribers.insert("store-a".into());
        wanted.last_activity_ms.store(old_ms, Ordering::Relaxed);
        mux.collections.insert("wanted".into(), wanted);

        // Unwanted but recently active.
        mux.collections.insert("recent".into(), TrackedCollection::new());

        sweep_idle(&mux.collections, idle_after);

        assert!(!mux.is_tracked("orphan"));
        assert!(mux.is_tracked("wanted"));
        assert!(mux.is_tracked("recent"));
    }

    #[tokio::test]
    async fn inbound_events_bump_last_activity() {
        let (feed, mux) = setup();

        let mut sub = mux.subscribe("citizens", "store-a");
        let stale_ms = Utc::now().timestamp_millis() - 3_600_000;
        mux.collections
            .get("citizens")
            .unwrap()
            .last_activity_ms
            .store(stale_ms, Ordering::Relaxed);

        feed.conn(0).events.send(insert_event("c1")).await.unwrap();
        let _ = sub.events.recv().await.unwrap();

        let bumped = mux
            .collections
            .get("citizens")
            .unwrap()
            .last_activity_ms
            .load(Ordering::Relaxed);
        assert!(bumped > stale_ms);
    }

    // ── Shutdown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_all_closes_everything() {
        let (feed, mux) = setup();

        let _a = mux.subscribe("citizens", "store-a");
        let _b = mux.subscribe("requests", "store-b");

        mux.disconnect_all();

        assert_eq!(mux.live_connections(), 0);
        assert!(!mux.is_tracked("citizens"));
        assert!(!mux.is_tracked("requests"));
        assert!(feed.conn(0).cancel.is_cancelled());
        assert!(feed.conn(1).cancel.is_cancelled());
        assert!(mux.sweep_cancel.is_cancelled());
    }
}
