// ── Change-feed seam ──
//
// The multiplexer opens connections through this trait rather than
// talking to `RealtimeClient` directly. Injecting the opener keeps the
// single-connection-per-collection invariant testable with doubles that
// count opens and script status transitions.

use polis_api::{FeedConn, RealtimeClient};

/// Opens one live change-feed stream per call.
///
/// Implementations spawn whatever background work the stream needs and
/// return immediately; the connection attempt itself is observable
/// through the returned handle's status channel.
pub trait ChangeFeed: Send + Sync + 'static {
    fn open(&self, collection: &str) -> FeedConn;
}

impl ChangeFeed for RealtimeClient {
    fn open(&self, collection: &str) -> FeedConn {
        Self::open(self, collection)
    }
}
