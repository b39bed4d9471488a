//! Realtime data synchronization layer between `polis-api` and UI
//! consumers (the dashboard's pages and widgets).
//!
//! This crate owns the domain model and the client-side sync machinery
//! for the polis workspace:
//!
//! - **[`SyncEngine`]** — Composition root. Builds the transport, REST
//!   and realtime clients, and the one shared multiplexer, and vends one
//!   [`EntityStore`] per entity kind. [`SyncEngine::initialize_all()`]
//!   bulk-loads everything; [`SyncEngine::shutdown()`] tears it down.
//!
//! - **[`ChangeFeedMultiplexer`]** — Guarantees at most one live
//!   change-feed connection per remote collection no matter how many
//!   stores subscribe, reference-counts interest, and sweeps idle
//!   orphaned connections on a fixed interval.
//!
//! - **[`EntityStore`]** — Per-entity-kind local mirror: one bulk load,
//!   then a continuous stream of insert/update/delete events merged by
//!   identifier. CRUD with optimistic create/delete (rollback on
//!   failure) and remote-first update. A lost connection degrades the
//!   store -- data stays visible -- while a bounded backoff sequence
//!   tries to recover.
//!
//! - **Domain model** ([`model`]) — Citizens, service requests,
//!   military-service cases, reminders, and notifications, each with the
//!   [`Entity`] transform pair mapping remote rows to local records and
//!   back. [`RecordId`] keeps server-assigned identifiers and optimistic
//!   placeholders in distinct namespaces.

pub mod config;
mod convert;
pub mod engine;
pub mod error;
pub mod feed;
pub mod model;
pub mod multiplexer;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EngineConfig, TlsVerification};
pub use engine::SyncEngine;
pub use error::CoreError;
pub use feed::ChangeFeed;
pub use multiplexer::{ChangeFeedMultiplexer, FeedSubscription, SweepPolicy};
pub use store::{EntityStore, RetryPolicy, StoreState, TableOps};
pub use stream::ItemsStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Citizen,
    CitizenDraft,
    CitizenPatch,
    Entity,
    MilitaryCase,
    MilitaryCaseDraft,
    MilitaryCasePatch,
    MilitaryCaseStatus,
    MilitaryCaseType,
    Notification,
    NotificationDraft,
    NotificationPatch,
    NotificationSeverity,
    RecordId,
    Reminder,
    ReminderDraft,
    ReminderPatch,
    RequestCategory,
    RequestPriority,
    RequestStatus,
    ServiceBranch,
    ServiceRequest,
    ServiceRequestDraft,
    ServiceRequestPatch,
};
