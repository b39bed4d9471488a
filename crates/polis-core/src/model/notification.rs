// ── Notification domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use polis_api::Row;

use super::record_id::RecordId;
use super::Entity;
use crate::convert::{bool_field, enum_field, put_opt, str_field, timestamp_field};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationSeverity {
    #[default]
    Info,
    Warning,
    Alert,
}

/// An in-app notification shown to office staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    pub title: String,
    pub body: String,
    pub severity: NotificationSeverity,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationDraft {
    pub title: String,
    pub body: String,
    pub severity: NotificationSeverity,
}

impl NotificationDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: NotificationSeverity::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub severity: Option<NotificationSeverity>,
    pub read: Option<bool>,
}

impl Entity for Notification {
    const COLLECTION: &'static str = "notifications";

    type Draft = NotificationDraft;
    type Patch = NotificationPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn from_row(row: &Row) -> Self {
        Self {
            id: RecordId::from(str_field(row, "id")),
            title: str_field(row, "title"),
            body: str_field(row, "body"),
            severity: enum_field(row, "severity"),
            read: bool_field(row, "read", false),
            created_at: timestamp_field(row, "created_at"),
            updated_at: timestamp_field(row, "updated_at"),
        }
    }

    fn draft_row(draft: &Self::Draft) -> Row {
        let mut row = Row::new();
        row.insert("title".into(), Value::from(draft.title.clone()));
        row.insert("body".into(), Value::from(draft.body.clone()));
        row.insert("severity".into(), Value::from(draft.severity.to_string()));
        row.insert("read".into(), Value::from(false));
        row
    }

    fn patch_row(patch: &Self::Patch) -> Row {
        let mut row = Row::new();
        put_opt(&mut row, "title", patch.title.clone());
        put_opt(&mut row, "body", patch.body.clone());
        put_opt(&mut row, "severity", patch.severity.map(|s| s.to_string()));
        put_opt(&mut row, "read", patch.read);
        row
    }

    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            body: draft.body.clone(),
            severity: draft.severity,
            read: false,
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
    fn severity_defaults_to_info() {
        let n = Notification::from_row(&row(json!({ "id": "n1", "title": "t", "body": "b" })));
        assert_eq!(n.severity, NotificationSeverity::Info);
        assert!(!n.read);
    }

    #[test]
    fn mark_read_patch() {
        let patch = NotificationPatch {
            read: Some(true),
            ..NotificationPatch::default()
        };
        let row = Notification::patch_row(&patch);
        assert_eq!(row.len(), 1);
        assert_eq!(row["read"], true);
    }
}
