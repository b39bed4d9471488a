// ── Shared test doubles ──
//
// A scriptable change-feed opener used by multiplexer and store tests.
// Counts opens (the single-connection invariant is asserted against it)
// and hands out the sender halves of each opened connection so tests can
// script events and status transitions.

#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use polis_api::{ChangeMessage, ChangeOp, FeedConn, FeedStatus, Row};

use crate::feed::ChangeFeed;

/// Sender halves of one stubbed connection.
pub(crate) struct StubConn {
    pub events: mpsc::Sender<ChangeMessage>,
    pub status: watch::Sender<FeedStatus>,
    pub cancel: CancellationToken,
}

/// Counting [`ChangeFeed`] double. Every `open` yields a connection that
/// starts out [`FeedStatus::Connected`].
#[derive(Default)]
pub(crate) struct StubFeed {
    opens: AtomicUsize,
    conns: Mutex<Vec<StubConn>>,
}

impl StubFeed {
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Sender halves of the `index`-th opened connection.
    pub fn conn(&self, index: usize) -> StubConn {
        let conns = self.conns.lock().unwrap();
        let c = &conns[index];
        StubConn {
            events: c.events.clone(),
            status: c.status.clone(),
            cancel: c.cancel.clone(),
        }
    }
}

impl ChangeFeed for StubFeed {
    fn open(&self, _collection: &str) -> FeedConn {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connected);
        let cancel = CancellationToken::new();

        self.conns.lock().unwrap().push(StubConn {
            events: event_tx,
            status: status_tx,
            cancel: cancel.clone(),
        });

        FeedConn::from_parts(event_rx, status_rx, cancel)
    }
}

/// A change message with just an `id` column.
pub(crate) fn change(op: ChangeOp, id: &str) -> ChangeMessage {
    let mut row = Row::new();
    row.insert("id".into(), serde_json::Value::from(id));
    ChangeMessage { op, row }
}

/// A change message with a full row payload.
pub(crate) fn change_with_row(op: ChangeOp, value: serde_json::Value) -> ChangeMessage {
    ChangeMessage {
        op,
        row: value.as_object().unwrap().clone(),
    }
}

/// Poll `check` until it holds, yielding to the runtime in between.
pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
