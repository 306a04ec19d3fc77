use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Optimistic-concurrency sequence. Bumped by the store on every commit.
pub type Version = u64;

/// Free-text remarks longer than this are rejected, never truncated.
pub const MAX_REMARKS_LEN: usize = 2000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ─── Roles ────────────────────────────────────────────────────

/// The fixed role enumeration. Roles are the sole authorization axis:
/// a transition names the roles permitted to fire it, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    DeptHead,
    Hr,
    Accounts,
    SalesHead,
    AcademicHead,
    CertDept,
    DispatchHead,
    Executive,
    Admin,
}

impl Role {
    /// Parse a role from its wire string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "dept_head" => Some(Self::DeptHead),
            "hr" => Some(Self::Hr),
            "accounts" => Some(Self::Accounts),
            "sales_head" => Some(Self::SalesHead),
            "academic_head" => Some(Self::AcademicHead),
            "cert_dept" => Some(Self::CertDept),
            "dispatch_head" => Some(Self::DispatchHead),
            "executive" => Some(Self::Executive),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::DeptHead => "dept_head",
            Self::Hr => "hr",
            Self::Accounts => "accounts",
            Self::SalesHead => "sales_head",
            Self::AcademicHead => "academic_head",
            Self::CertDept => "cert_dept",
            Self::DispatchHead => "dispatch_head",
            Self::Executive => "executive",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated principal attempting a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

// ─── History ──────────────────────────────────────────────────

/// One line of the audit trail. Append-only; never mutated or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: Timestamp,
    pub actor_id: String,
    pub actor_role: Role,
    pub action: String,
    pub from_state: String,
    pub to_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

// ─── Entity record ────────────────────────────────────────────

/// The business object under approval. `payload` is opaque to the engine —
/// amounts, dates and names belong to the caller, never to workflow logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub state: String,
    pub payload: serde_json::Value,
    pub history: Vec<HistoryEntry>,
    /// CAS field: two concurrent commits against the same version cannot
    /// both win.
    pub version: Version,
    pub submitted_by: String,
    pub created_at: Timestamp,
}

impl EntityRecord {
    /// Create a record in the workflow's initial state. History starts
    /// empty — it grows only on real transitions.
    pub fn new(
        entity_type: impl Into<String>,
        initial_state: impl Into<String>,
        payload: serde_json::Value,
        submitter: &Actor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            state: initial_state.into(),
            payload,
            history: Vec::new(),
            version: 0,
            submitted_by: submitter.id.clone(),
            created_at: now_ms(),
        }
    }

    /// Timestamp of the most recent history entry, if any.
    pub fn last_transition_at(&self) -> Option<Timestamp> {
        self.history.last().map(|e| e.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_string_round_trip() {
        for role in [
            Role::Employee,
            Role::DeptHead,
            Role::Hr,
            Role::Accounts,
            Role::SalesHead,
            Role::AcademicHead,
            Role::CertDept,
            Role::DispatchHead,
            Role::Executive,
            Role::Admin,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("intern"), None);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Role::parse("SALES_HEAD"), Some(Role::SalesHead));
        assert_eq!(Role::parse("Hr"), Some(Role::Hr));
    }

    #[test]
    fn new_record_starts_clean() {
        let actor = Actor::new("u-17", Role::Employee);
        let record = EntityRecord::new(
            "leave_request",
            "Pending",
            serde_json::json!({"days": 3}),
            &actor,
        );
        assert_eq!(record.state, "Pending");
        assert_eq!(record.version, 0);
        assert!(record.history.is_empty());
        assert_eq!(record.submitted_by, "u-17");
        assert!(record.last_transition_at().is_none());
    }
}
