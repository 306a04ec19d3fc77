use crate::definition::{TransitionDef, WorkflowDefinition};
use crate::error::TransitionError;
use crate::types::Role;
use crate::validate::validate_definition;
use crate::yaml::parse_definition_set_yaml;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Load-once mapping from entity type to its validated transition graph.
///
/// `build` runs every definition through `validate_definition` and fails
/// with the aggregated errors. A malformed definition aborts boot instead
/// of surfacing as a dead-end state in production.
#[derive(Debug)]
pub struct WorkflowRegistry {
    defs: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn build(definitions: Vec<WorkflowDefinition>) -> Result<Self> {
        let mut defs: HashMap<String, WorkflowDefinition> = HashMap::new();
        let mut problems: Vec<String> = Vec::new();

        for def in definitions {
            for e in validate_definition(&def) {
                problems.push(e.to_string());
            }
            if defs.contains_key(&def.entity_type) {
                problems.push(format!("duplicate definition for '{}'", def.entity_type));
                continue;
            }
            defs.insert(def.entity_type.clone(), def);
        }

        if !problems.is_empty() {
            return Err(anyhow!(
                "workflow registry rejected {} problem(s):\n  {}",
                problems.len(),
                problems.join("\n  ")
            ));
        }

        tracing::info!(definitions = defs.len(), "workflow registry built");
        Ok(Self { defs })
    }

    /// Build a registry from a YAML `definitions:` document.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        Self::build(parse_definition_set_yaml(yaml_str)?)
    }

    /// The stock definitions covering the back-office approval flows.
    ///
    /// These are code-reviewed constants; failing to validate them is a
    /// programming error, so the build is unwrapped here to keep the
    /// fail-fast-at-boot contract.
    pub fn builtin() -> Self {
        Self::build(builtin_definitions()).expect("builtin workflow definitions must validate")
    }

    pub fn get(&self, entity_type: &str) -> Result<&WorkflowDefinition, TransitionError> {
        self.defs
            .get(entity_type)
            .ok_or_else(|| TransitionError::Configuration {
                entity_type: entity_type.to_string(),
            })
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.defs.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.defs.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

// ─── Builtin graphs ───────────────────────────────────────────

/// Binary approval: Pending → Approved | Rejected, one approver role.
fn binary_approval(entity_type: &str, approver: Role) -> WorkflowDefinition {
    WorkflowDefinition {
        entity_type: entity_type.to_string(),
        initial_state: "Pending".to_string(),
        states: vec![
            "Pending".to_string(),
            "Approved".to_string(),
            "Rejected".to_string(),
        ],
        terminal_states: vec!["Approved".to_string(), "Rejected".to_string()],
        transitions: vec![
            TransitionDef::new("Pending", "approve", "Approved", vec![approver]),
            TransitionDef::new("Pending", "reject", "Rejected", vec![approver]),
        ],
    }
}

/// Expense claims hop department head → HR → accounts; any hop may reject.
fn expense_claim() -> WorkflowDefinition {
    WorkflowDefinition {
        entity_type: "expense_claim".to_string(),
        initial_state: "PENDING_DEPT_HEAD".to_string(),
        states: vec![
            "PENDING_DEPT_HEAD".to_string(),
            "PENDING_HR".to_string(),
            "PENDING_ACCOUNTS".to_string(),
            "PAID".to_string(),
            "REJECTED".to_string(),
        ],
        terminal_states: vec!["PAID".to_string(), "REJECTED".to_string()],
        transitions: vec![
            TransitionDef::new(
                "PENDING_DEPT_HEAD",
                "approve",
                "PENDING_HR",
                vec![Role::DeptHead],
            ),
            TransitionDef::new(
                "PENDING_DEPT_HEAD",
                "reject",
                "REJECTED",
                vec![Role::DeptHead],
            ),
            TransitionDef::new("PENDING_HR", "approve", "PENDING_ACCOUNTS", vec![Role::Hr]),
            TransitionDef::new("PENDING_HR", "reject", "REJECTED", vec![Role::Hr]),
            TransitionDef::new("PENDING_ACCOUNTS", "pay", "PAID", vec![Role::Accounts]),
            TransitionDef::new("PENDING_ACCOUNTS", "reject", "REJECTED", vec![Role::Accounts]),
        ],
    }
}

/// Certificates are approved, generated, then dispatched by three desks.
fn certificate_request() -> WorkflowDefinition {
    WorkflowDefinition {
        entity_type: "certificate_request".to_string(),
        initial_state: "Pending".to_string(),
        states: vec![
            "Pending".to_string(),
            "Approved".to_string(),
            "Generated".to_string(),
            "Dispatched".to_string(),
            "Rejected".to_string(),
        ],
        terminal_states: vec!["Dispatched".to_string(), "Rejected".to_string()],
        transitions: vec![
            TransitionDef::new("Pending", "approve", "Approved", vec![Role::AcademicHead]),
            TransitionDef::new("Pending", "reject", "Rejected", vec![Role::AcademicHead]),
            TransitionDef::new("Approved", "generate", "Generated", vec![Role::CertDept]),
            TransitionDef::new("Generated", "dispatch", "Dispatched", vec![Role::DispatchHead]),
        ],
    }
}

/// Destructive deletes go through approval themselves. `permanently_deleted`
/// triggers the real delete as a post-commit side effect (the engine never
/// touches the wrapped entity's payload); `restored_to_draft` closes the
/// request without touching the wrapped entity.
fn deletion_request() -> WorkflowDefinition {
    WorkflowDefinition {
        entity_type: "deletion_request".to_string(),
        initial_state: "deletion_requested".to_string(),
        states: vec![
            "deletion_requested".to_string(),
            "permanently_deleted".to_string(),
            "restored_to_draft".to_string(),
        ],
        terminal_states: vec![
            "permanently_deleted".to_string(),
            "restored_to_draft".to_string(),
        ],
        transitions: vec![
            TransitionDef::new(
                "deletion_requested",
                "approve",
                "permanently_deleted",
                vec![Role::Executive],
            ),
            TransitionDef::new(
                "deletion_requested",
                "reject",
                "restored_to_draft",
                vec![Role::Executive],
            ),
        ],
    }
}

fn builtin_definitions() -> Vec<WorkflowDefinition> {
    vec![
        binary_approval("quotation", Role::SalesHead),
        binary_approval("booking_request", Role::SalesHead),
        binary_approval("leave_request", Role::DeptHead),
        binary_approval("trainer_request", Role::AcademicHead),
        expense_claim(),
        certificate_request(),
        deletion_request(),
    ]
}
