// ── Service request domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use polis_api::Row;

use super::record_id::RecordId;
use super::Entity;
use crate::convert::{enum_field, opt_str, put_opt, str_field, timestamp_field};

/// What a service request is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum RequestCategory {
    Employment,
    Health,
    Education,
    Infrastructure,
    Military,
    Pension,
    #[default]
    Other,
}

/// Lifecycle of a service request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Open,
    InProgress,
    Completed,
    Declined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A citizen's service request handled by the office.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RecordId,
    pub title: String,
    pub description: Option<String>,
    pub category: RequestCategory,
    pub status: RequestStatus,
    pub priority: RequestPriority,
    /// Server id of the citizen who filed the request, if linked.
    pub citizen_id: Option<String>,
    /// Staff member the request is assigned to.
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRequestDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: RequestCategory,
    pub priority: RequestPriority,
    pub citizen_id: Option<String>,
    pub assigned_to: Option<String>,
}

impl ServiceRequestDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRequestPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<RequestCategory>,
    pub status: Option<RequestStatus>,
    pub priority: Option<RequestPriority>,
    pub citizen_id: Option<String>,
    pub assigned_to: Option<String>,
}

impl Entity for ServiceRequest {
    const COLLECTION: &'static str = "requests";

    type Draft = ServiceRequestDraft;
    type Patch = ServiceRequestPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn from_row(row: &Row) -> Self {
        Self {
            id: RecordId::from(str_field(row, "id")),
            title: str_field(row, "title"),
            description: opt_str(row, "description"),
            category: enum_field(row, "category"),
            status: enum_field(row, "status"),
            priority: enum_field(row, "priority"),
            citizen_id: opt_str(row, "citizen_id"),
            assigned_to: opt_str(row, "assigned_to"),
            created_at: timestamp_field(row, "created_at"),
            updated_at: timestamp_field(row, "updated_at"),
        }
    }

    fn draft_row(draft: &Self::Draft) -> Row {
        let mut row = Row::new();
        row.insert("title".into(), Value::from(draft.title.clone()));
        put_opt(&mut row, "description", draft.description.clone());
        row.insert("category".into(), Value::from(draft.category.to_string()));
        row.insert("status".into(), Value::from(RequestStatus::Open.to_string()));
        row.insert("priority".into(), Value::from(draft.priority.to_string()));
        put_opt(&mut row, "citizen_id", draft.citizen_id.clone());
        put_opt(&mut row, "assigned_to", draft.assigned_to.clone());
        row
    }

    fn patch_row(patch: &Self::Patch) -> Row {
        let mut row = Row::new();
        put_opt(&mut row, "title", patch.title.clone());
        put_opt(&mut row, "description", patch.description.clone());
        put_opt(&mut row, "category", patch.category.map(|c| c.to_string()));
        put_opt(&mut row, "status", patch.status.map(|s| s.to_string()));
        put_opt(&mut row, "priority", patch.priority.map(|p| p.to_string()));
        put_opt(&mut row, "citizen_id", patch.citizen_id.clone());
        put_opt(&mut row, "assigned_to", patch.assigned_to.clone());
        row
    }

    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            category: draft.category,
            status: RequestStatus::Open,
            priority: draft.priority,
            citizen_id: draft.citizen_id.clone(),
            assigned_to: draft.assigned_to.clone(),
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
    fn from_row_parses_enums() {
        let req = ServiceRequest::from_row(&row(json!({
            "id": "r1",
            "title": "School bus route",
            "category": "education",
            "status": "in_progress",
            "priority": "urgent"
        })));

        assert_eq!(req.category, RequestCategory::Education);
        assert_eq!(req.status, RequestStatus::InProgress);
        assert_eq!(req.priority, RequestPriority::Urgent);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_defaults() {
        let req = ServiceRequest::from_row(&row(json!({
            "id": "r2",
            "title": "x",
            "category": "astral_projection",
            "status": "paused",
            "priority": ""
        })));

        assert_eq!(req.category, RequestCategory::Other);
        assert_eq!(req.status, RequestStatus::Open);
        assert_eq!(req.priority, RequestPriority::Normal);
    }

    #[test]
    fn draft_row_serializes_enums_as_wire_strings() {
        let draft = ServiceRequestDraft {
            category: RequestCategory::Military,
            priority: RequestPriority::High,
            ..ServiceRequestDraft::new("Transfer request")
        };
        let row = ServiceRequest::draft_row(&draft);

        assert_eq!(row["category"], "military");
        assert_eq!(row["status"], "open");
        assert_eq!(row["priority"], "high");
    }

    #[test]
    fn priority_orders() {
        assert!(RequestPriority::Urgent > RequestPriority::Normal);
        assert!(RequestPriority::Low < RequestPriority::High);
    }
}
