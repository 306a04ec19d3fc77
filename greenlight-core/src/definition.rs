use crate::types::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─── Transition edge ──────────────────────────────────────────

/// A named, role-gated edge between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub from_state: String,
    pub action: String,
    pub to_state: String,
    /// Non-empty set of roles permitted to fire this action from
    /// `from_state`.
    pub allowed_roles: Vec<Role>,
}

impl TransitionDef {
    pub fn new(
        from_state: impl Into<String>,
        action: impl Into<String>,
        to_state: impl Into<String>,
        allowed_roles: Vec<Role>,
    ) -> Self {
        Self {
            from_state: from_state.into(),
            action: action.into(),
            to_state: to_state.into(),
            allowed_roles,
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

// ─── Workflow definition ──────────────────────────────────────

/// Declarative transition graph for one entity type. Built once, validated
/// at registry construction, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub entity_type: String,
    pub initial_state: String,
    pub states: Vec<String>,
    #[serde(default)]
    pub terminal_states: Vec<String>,
    pub transitions: Vec<TransitionDef>,
}

impl WorkflowDefinition {
    /// The unique edge leaving `from` via `action`, if any. Uniqueness is a
    /// validation invariant (duplicate `(from, action)` pairs are rejected).
    pub fn edge(&self, from: &str, action: &str) -> Option<&TransitionDef> {
        self.transitions
            .iter()
            .find(|t| t.from_state == from && t.action == action)
    }

    /// All edges that land on `state` via `action` — the lookup behind the
    /// idempotent double-submit check.
    pub fn edges_into<'a>(
        &'a self,
        state: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a TransitionDef> {
        self.transitions
            .iter()
            .filter(move |t| t.to_state == state && t.action == action)
    }

    pub fn outgoing<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a TransitionDef> {
        self.transitions.iter().filter(move |t| t.from_state == from)
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.iter().any(|s| s == state)
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Content-addressed version key: SHA-256 over the canonical JSON
    /// serialization, hex-encoded. Two definitions with the same hash are
    /// interchangeable.
    pub fn definition_version(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}
