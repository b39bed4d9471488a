// ── Row field extraction helpers ──
//
// The transform layer must be total on well-formed input: a missing or
// null column never panics, it falls back to a defined default. Every
// `Entity::from_row` impl goes through these helpers so the defaulting
// rules live in one place.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use polis_api::Row;

/// Required string column; absent or null becomes `""`.
pub(crate) fn str_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Optional string column; absent, null, or empty becomes `None`.
pub(crate) fn opt_str(row: &Row, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Boolean column with an explicit default.
pub(crate) fn bool_field(row: &Row, key: &str, default: bool) -> bool {
    row.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Required timestamp column; anything unparseable becomes the Unix epoch.
pub(crate) fn timestamp_field(row: &Row, key: &str) -> DateTime<Utc> {
    opt_timestamp(row, key).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Optional RFC 3339 timestamp column.
pub(crate) fn opt_timestamp(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Optional `YYYY-MM-DD` date column.
pub(crate) fn opt_date(row: &Row, key: &str) -> Option<NaiveDate> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Enum column parsed through `FromStr`, falling back to the default
/// variant on unknown or missing values.
pub(crate) fn enum_field<E>(row: &Row, key: &str) -> E
where
    E: std::str::FromStr + Default,
{
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Insert `key` only when a value is present. Patch rows carry exactly
/// the columns the caller supplied.
pub(crate) fn put_opt(row: &mut Row, key: &str, value: Option<impl Into<Value>>) {
    if let Some(v) = value {
        row.insert(key.to_owned(), v.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn missing_fields_default() {
        let r = row(json!({}));
        assert_eq!(str_field(&r, "full_name"), "");
        assert_eq!(opt_str(&r, "email"), None);
        assert!(bool_field(&r, "read", true));
        assert_eq!(timestamp_field(&r, "created_at"), DateTime::UNIX_EPOCH);
        assert_eq!(opt_timestamp(&r, "due_at"), None);
        assert_eq!(opt_date(&r, "enlistment_date"), None);
    }

    #[test]
    fn null_and_empty_strings_are_none() {
        let r = row(json!({ "email": null, "phone": "" }));
        assert_eq!(opt_str(&r, "email"), None);
        assert_eq!(opt_str(&r, "phone"), None);
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let r = row(json!({ "created_at": "2026-03-01T09:30:00+02:00" }));
        let ts = timestamp_field(&r, "created_at");
        assert_eq!(ts.to_rfc3339(), "2026-03-01T07:30:00+00:00");
    }

    #[test]
    fn garbage_timestamp_falls_back_to_epoch() {
        let r = row(json!({ "created_at": "yesterday-ish" }));
        assert_eq!(timestamp_field(&r, "created_at"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn put_opt_skips_none() {
        let mut r = Row::new();
        put_opt(&mut r, "a", Some("x"));
        put_opt(&mut r, "b", None::<&str>);
        assert_eq!(r.len(), 1);
        assert_eq!(r["a"], "x");
    }
}
