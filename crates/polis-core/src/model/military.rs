// ── Military-service case domain types ──
//
// Cases the office tracks with the recruitment authorities: deferrals,
// transfers, exemptions, and the like, usually on behalf of a citizen.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use polis_api::Row;

use super::record_id::RecordId;
use super::Entity;
use crate::convert::{enum_field, opt_date, opt_str, put_opt, str_field, timestamp_field};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceBranch {
    Army,
    Navy,
    AirForce,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum MilitaryCaseType {
    Deferral,
    Transfer,
    Exemption,
    Discharge,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MilitaryCaseStatus {
    #[default]
    Submitted,
    InReview,
    Answered,
    Closed,
}

/// A military-service case followed up by the office.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilitaryCase {
    pub id: RecordId,
    /// Conscript the case concerns (not necessarily a registered citizen).
    pub full_name: String,
    pub service_number: Option<String>,
    pub branch: ServiceBranch,
    pub case_type: MilitaryCaseType,
    pub status: MilitaryCaseStatus,
    pub enlistment_date: Option<NaiveDate>,
    pub citizen_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MilitaryCaseDraft {
    pub full_name: String,
    pub service_number: Option<String>,
    pub branch: ServiceBranch,
    pub case_type: MilitaryCaseType,
    pub enlistment_date: Option<NaiveDate>,
    pub citizen_id: Option<String>,
    pub details: Option<String>,
}

impl MilitaryCaseDraft {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MilitaryCasePatch {
    pub full_name: Option<String>,
    pub service_number: Option<String>,
    pub branch: Option<ServiceBranch>,
    pub case_type: Option<MilitaryCaseType>,
    pub status: Option<MilitaryCaseStatus>,
    pub enlistment_date: Option<NaiveDate>,
    pub citizen_id: Option<String>,
    pub details: Option<String>,
}

impl Entity for MilitaryCase {
    const COLLECTION: &'static str = "military_cases";

    type Draft = MilitaryCaseDraft;
    type Patch = MilitaryCasePatch;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn from_row(row: &Row) -> Self {
        Self {
            id: RecordId::from(str_field(row, "id")),
            full_name: str_field(row, "full_name"),
            service_number: opt_str(row, "service_number"),
            branch: enum_field(row, "branch"),
            case_type: enum_field(row, "case_type"),
            status: enum_field(row, "status"),
            enlistment_date: opt_date(row, "enlistment_date"),
            citizen_id: opt_str(row, "citizen_id"),
            details: opt_str(row, "details"),
            created_at: timestamp_field(row, "created_at"),
            updated_at: timestamp_field(row, "updated_at"),
        }
    }

    fn draft_row(draft: &Self::Draft) -> Row {
        let mut row = Row::new();
        row.insert("full_name".into(), Value::from(draft.full_name.clone()));
        put_opt(&mut row, "service_number", draft.service_number.clone());
        row.insert("branch".into(), Value::from(draft.branch.to_string()));
        row.insert("case_type".into(), Value::from(draft.case_type.to_string()));
        row.insert(
            "status".into(),
            Value::from(MilitaryCaseStatus::Submitted.to_string()),
        );
        put_opt(
            &mut row,
            "enlistment_date",
            draft.enlistment_date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
        put_opt(&mut row, "citizen_id", draft.citizen_id.clone());
        put_opt(&mut row, "details", draft.details.clone());
        row
    }

    fn patch_row(patch: &Self::Patch) -> Row {
        let mut row = Row::new();
        put_opt(&mut row, "full_name", patch.full_name.clone());
        put_opt(&mut row, "service_number", patch.service_number.clone());
        put_opt(&mut row, "branch", patch.branch.map(|b| b.to_string()));
        put_opt(&mut row, "case_type", patch.case_type.map(|c| c.to_string()));
        put_opt(&mut row, "status", patch.status.map(|s| s.to_string()));
        put_opt(
            &mut row,
            "enlistment_date",
            patch.enlistment_date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
        put_opt(&mut row, "citizen_id", patch.citizen_id.clone());
        put_opt(&mut row, "details", patch.details.clone());
        row
    }

    fn placeholder(draft: &Self::Draft, id: RecordId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            full_name: draft.full_name.clone(),
            service_number: draft.service_number.clone(),
            branch: draft.branch,
            case_type: draft.case_type,
            status: MilitaryCaseStatus::Submitted,
            enlistment_date: draft.enlistment_date,
            citizen_id: draft.citizen_id.clone(),
            details: draft.details.clone(),
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
    fn from_row_parses_dates_and_enums() {
        let case = MilitaryCase::from_row(&row(json!({
            "id": "m1",
            "full_name": "Giorgos K.",
            "branch": "air_force",
            "case_type": "deferral",
            "status": "in_review",
            "enlistment_date": "2026-09-15"
        })));

        assert_eq!(case.branch, ServiceBranch::AirForce);
        assert_eq!(case.case_type, MilitaryCaseType::Deferral);
        assert_eq!(case.status, MilitaryCaseStatus::InReview);
        assert_eq!(
            case.enlistment_date,
            NaiveDate::from_ymd_opt(2026, 9, 15)
        );
    }

    #[test]
    fn from_row_is_total_on_empty_row() {
        let case = MilitaryCase::from_row(&Row::new());
        assert_eq!(case.branch, ServiceBranch::Unknown);
        assert_eq!(case.status, MilitaryCaseStatus::Submitted);
        assert!(case.enlistment_date.is_none());
    }

    #[test]
    fn draft_row_formats_enlistment_date() {
        let draft = MilitaryCaseDraft {
            enlistment_date: NaiveDate::from_ymd_opt(2026, 9, 15),
            ..MilitaryCaseDraft::new("Giorgos K.")
        };
        let row = MilitaryCase::draft_row(&draft);
        assert_eq!(row["enlistment_date"], "2026-09-15");
        assert_eq!(row["status"], "submitted");
    }
}
