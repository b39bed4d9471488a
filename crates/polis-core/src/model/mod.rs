// ── Domain model & transform layer ──
//
// One module per entity kind. Each implements the `Entity` trait: the
// bidirectional mapping between the remote row shape and the local
// record shape. This is the only layer with schema knowledge -- the
// multiplexer and the store never look inside a row beyond its `id`.

mod citizen;
mod military;
mod notification;
mod record_id;
mod reminder;
mod request;

pub use citizen::{Citizen, CitizenDraft, CitizenPatch};
pub use military::{MilitaryCase, MilitaryCaseDraft, MilitaryCasePatch, MilitaryCaseStatus, MilitaryCaseType, ServiceBranch};
pub use notification::{Notification, NotificationDraft, NotificationPatch, NotificationSeverity};
pub use record_id::RecordId;
pub use reminder::{Reminder, ReminderDraft, ReminderPatch};
pub use request::{RequestCategory, RequestPriority, RequestStatus, ServiceRequest, ServiceRequestDraft, ServiceRequestPatch};

use chrono::{DateTime, Utc};

use polis_api::Row;

/// One synchronized entity kind: its collection name, ordering, and the
/// pure transforms between remote rows and local records.
///
/// `Draft` is the create payload. It deliberately has no id or timestamp
/// fields -- those are server-assigned, so a caller cannot supply them
/// even by accident. `Patch` is the partial-update payload; only the
/// fields it carries are serialized.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Remote collection (table) name.
    const COLLECTION: &'static str;

    /// Sort key for the bulk read. Stores load newest-first.
    const ORDER_FIELD: &'static str = "created_at";

    type Draft: Clone + Send + Sync + 'static;
    type Patch: Clone + Send + Sync + 'static;

    fn id(&self) -> &RecordId;

    /// Remote row -> local record. Total on well-formed input: missing
    /// optional columns become defined defaults, never a panic.
    fn from_row(row: &Row) -> Self;

    /// Create payload -> remote row.
    fn draft_row(draft: &Self::Draft) -> Row;

    /// Partial update -> partial remote row (supplied fields only).
    fn patch_row(patch: &Self::Patch) -> Row;

    /// Tentative local record shown between an optimistic create and the
    /// server's confirmation.
    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self;
}
