// polis-api: Async Rust client for the hosted data platform (REST rows + realtime change feed)

pub mod error;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use error::Error;
pub use realtime::{ChangeMessage, ChangeOp, FeedConn, FeedStatus, RealtimeClient};
pub use rest::{RestClient, Row};
pub use transport::{TlsMode, TransportConfig};
