// ── Reminder domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use polis_api::Row;

use super::record_id::RecordId;
use super::Entity;
use crate::convert::{bool_field, opt_str, opt_timestamp, put_opt, str_field, timestamp_field};

/// A dated follow-up for the office staff, optionally tied to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: RecordId,
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// Due in the past and still open.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_at.is_some_and(|due| due < now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReminderDraft {
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
}

impl ReminderDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
    pub request_id: Option<String>,
}

impl Entity for Reminder {
    const COLLECTION: &'static str = "reminders";

    type Draft = ReminderDraft;
    type Patch = ReminderPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn from_row(row: &Row) -> Self {
        Self {
            id: RecordId::from(str_field(row, "id")),
            title: str_field(row, "title"),
            notes: opt_str(row, "notes"),
            due_at: opt_timestamp(row, "due_at"),
            completed: bool_field(row, "completed", false),
            request_id: opt_str(row, "request_id"),
            created_at: timestamp_field(row, "created_at"),
            updated_at: timestamp_field(row, "updated_at"),
        }
    }

    fn draft_row(draft: &Self::Draft) -> Row {
        let mut row = Row::new();
        row.insert("title".into(), Value::from(draft.title.clone()));
        put_opt(&mut row, "notes", draft.notes.clone());
        put_opt(&mut row, "due_at", draft.due_at.map(|t| t.to_rfc3339()));
        row.insert("completed".into(), Value::from(false));
        put_opt(&mut row, "request_id", draft.request_id.clone());
        row
    }

    fn patch_row(patch: &Self::Patch) -> Row {
        let mut row = Row::new();
        put_opt(&mut row, "title", patch.title.clone());
        put_opt(&mut row, "notes", patch.notes.clone());
        put_opt(&mut row, "due_at", patch.due_at.map(|t| t.to_rfc3339()));
        put_opt(&mut row, "completed", patch.completed);
        put_opt(&mut row, "request_id", patch.request_id.clone());
        row
    }

    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            notes: draft.notes.clone(),
            due_at: draft.due_at,
            completed: false,
            request_id: draft.request_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn overdue_only_when_open_and_past_due() {
        let now = Utc::now();
        let mut reminder = Reminder::from_row(&row(json!({
            "id": "rm1",
            "title": "Call back",
            "due_at": (now - chrono::Duration::hours(1)).to_rfc3339()
        })));
        assert!(reminder.is_overdue(now));

        reminder.completed = true;
        assert!(!reminder.is_overdue(now));
    }

    #[test]
    fn no_due_date_is_never_overdue() {
        let reminder = Reminder::from_row(&row(json!({ "id": "rm2", "title": "Someday" })));
        assert!(!reminder.is_overdue(Utc::now()));
    }

    #[test]
    fn patch_row_can_mark_completed() {
        let patch = ReminderPatch {
            completed: Some(true),
            ..ReminderPatch::default()
        };
        let row = Reminder::patch_row(&patch);
        assert_eq!(row.len(), 1);
        assert_eq!(row["completed"], true);
    }
}
