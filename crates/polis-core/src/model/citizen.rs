// ── Citizen domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use polis_api::Row;

use super::record_id::RecordId;
use super::Entity;
use crate::convert::{opt_str, put_opt, str_field, timestamp_field};

/// A citizen registered with the constituency office.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citizen {
    pub id: RecordId,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Municipal district the citizen votes in.
    pub district: Option<String>,
    pub occupation: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create payload. Identifier and timestamps are server-assigned.
#[derive(Debug, Clone, Default)]
pub struct CitizenDraft {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub district: Option<String>,
    pub occupation: Option<String>,
    pub notes: Option<String>,
}

impl CitizenDraft {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Self::default()
        }
    }
}

/// Partial update; only supplied fields reach the platform.
#[derive(Debug, Clone, Default)]
pub struct CitizenPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub district: Option<String>,
    pub occupation: Option<String>,
    pub notes: Option<String>,
}

impl Entity for Citizen {
    const COLLECTION: &'static str = "citizens";

    type Draft = CitizenDraft;
    type Patch = CitizenPatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn from_row(row: &Row) -> Self {
        Self {
            id: RecordId::from(str_field(row, "id")),
            full_name: str_field(row, "full_name"),
            email: opt_str(row, "email"),
            phone: opt_str(row, "phone"),
            address: opt_str(row, "address"),
            district: opt_str(row, "district"),
            occupation: opt_str(row, "occupation"),
            notes: opt_str(row, "notes"),
            created_at: timestamp_field(row, "created_at"),
            updated_at: timestamp_field(row, "updated_at"),
        }
    }

    fn draft_row(draft: &Self::Draft) -> Row {
        let mut row = Row::new();
        row.insert("full_name".into(), Value::from(draft.full_name.clone()));
        put_opt(&mut row, "email", draft.email.clone());
        put_opt(&mut row, "phone", draft.phone.clone());
        put_opt(&mut row, "address", draft.address.clone());
        put_opt(&mut row, "district", draft.district.clone());
        put_opt(&mut row, "occupation", draft.occupation.clone());
        put_opt(&mut row, "notes", draft.notes.clone());
        row
    }

    fn patch_row(patch: &Self::Patch) -> Row {
        let mut row = Row::new();
        put_opt(&mut row, "full_name", patch.full_name.clone());
        put_opt(&mut row, "email", patch.email.clone());
        put_opt(&mut row, "phone", patch.phone.clone());
        put_opt(&mut row, "address", patch.address.clone());
        put_opt(&mut row, "district", patch.district.clone());
        put_opt(&mut row, "occupation", patch.occupation.clone());
        put_opt(&mut row, "notes", patch.notes.clone());
        row
    }

    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            full_name: draft.full_name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            address: draft.address.clone(),
            district: draft.district.clone(),
            occupation: draft.occupation.clone(),
            notes: draft.notes.clone(),
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
    fn from_row_full() {
        let citizen = Citizen::from_row(&row(json!({
            "id": "c1",
            "full_name": "Eleni Papadopoulou",
            "email": "eleni@example.org",
            "phone": "+30 210 0000000",
            "district": "Kentro",
            "created_at": "2026-03-01T09:00:00Z",
            "updated_at": "2026-03-02T10:00:00Z"
        })));

        assert_eq!(citizen.id, RecordId::from("c1"));
        assert_eq!(citizen.full_name, "Eleni Papadopoulou");
        assert_eq!(citizen.district.as_deref(), Some("Kentro"));
        assert!(citizen.address.is_none());
        assert_eq!(citizen.updated_at.to_rfc3339(), "2026-03-02T10:00:00+00:00");
    }

    #[test]
    fn from_row_is_total_on_empty_row() {
        let citizen = Citizen::from_row(&Row::new());
        assert_eq!(citizen.full_name, "");
        assert!(citizen.email.is_none());
        assert_eq!(citizen.created_at, chrono::DateTime::UNIX_EPOCH);
    }

    #[test]
    fn draft_row_omits_absent_fields() {
        let draft = CitizenDraft::new("Nikos");
        let row = Citizen::draft_row(&draft);
        assert_eq!(row.len(), 1);
        assert_eq!(row["full_name"], "Nikos");
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("created_at"));
    }

    #[test]
    fn patch_row_carries_only_supplied_fields() {
        let patch = CitizenPatch {
            phone: Some("+30 697 0000000".into()),
            ..CitizenPatch::default()
        };
        let row = Citizen::patch_row(&patch);
        assert_eq!(row.len(), 1);
        assert_eq!(row["phone"], "+30 697 0000000");
    }

    #[test]
    fn placeholder_carries_pending_id() {
        let now = Utc::now();
        let placeholder = Citizen::placeholder(&CitizenDraft::new("A"), RecordId::pending(), now);
        assert!(placeholder.id.is_pending());
        assert_eq!(placeholder.created_at, now);
    }
}
