// ── Record identity ──
//
// RecordId is the foundation of every domain type. Server-assigned
// identifiers and locally-generated optimistic placeholders live in two
// distinct variants, so reconciliation by identifier can never confuse a
// tentative record with a confirmed one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical identifier for any stored record.
///
/// `Assigned` wraps the identifier the platform issued for a persisted
/// row. `Pending` is a locally-generated placeholder used between an
/// optimistic create and the server's confirmation; it renders with a
/// `pending:` prefix so the two namespaces cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordId {
    Assigned(String),
    Pending(Uuid),
}

impl RecordId {
    /// Fresh placeholder identifier for an optimistic create.
    pub fn pending() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    /// `true` while the record awaits server confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The server-assigned identifier, if any.
    pub fn assigned(&self) -> Option<&str> {
        match self {
            Self::Assigned(s) => Some(s),
            Self::Pending(_) => None,
        }
    }

    /// Identifier equality against a server id string.
    ///
    /// A pending placeholder never matches a server id.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::Assigned(s) => s == id,
            Self::Pending(_) => false,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned(s) => write!(f, "{s}"),
            Self::Pending(u) => write!(f, "pending:{u}"),
        }
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        match s.strip_prefix("pending:").and_then(|rest| Uuid::parse_str(rest).ok()) {
            Some(u) => Self::Pending(u),
            None => Self::Assigned(s),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn assigned_matches_its_string() {
        let id = RecordId::from("c1");
        assert!(id.matches("c1"));
        assert!(!id.matches("c2"));
        assert_eq!(id.assigned(), Some("c1"));
    }

    #[test]
    fn pending_never_matches_server_ids() {
        let id = RecordId::pending();
        assert!(id.is_pending());
        assert!(id.assigned().is_none());
        assert!(!id.matches(&id.to_string()));
    }

    #[test]
    fn display_round_trips_through_from() {
        let pending = RecordId::pending();
        let parsed = RecordId::from(pending.to_string());
        assert_eq!(pending, parsed);

        let assigned = RecordId::from("srv-1");
        assert_eq!(RecordId::from(assigned.to_string()), assigned);
    }

    #[test]
    fn bare_pending_prefix_is_an_assigned_id() {
        // Only a valid UUID after the prefix counts as a placeholder.
        let id = RecordId::from("pending:not-a-uuid");
        assert!(!id.is_pending());
    }
}
