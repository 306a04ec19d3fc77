use crate::definition::WorkflowDefinition;
use anyhow::Result;
use serde::Deserialize;

/// A multi-definition document: one registry's worth of workflows.
#[derive(Debug, Deserialize)]
pub struct DefinitionSet {
    pub definitions: Vec<WorkflowDefinition>,
}

/// Parse a YAML string into a single WorkflowDefinition.
///
/// Validation is NOT performed here — call `validate_definition()` or build
/// a `WorkflowRegistry`, which validates every entry before accepting it.
pub fn parse_definition_yaml(yaml_str: &str) -> Result<WorkflowDefinition> {
    let def: WorkflowDefinition = serde_yaml::from_str(yaml_str)?;
    Ok(def)
}

/// Parse a YAML document containing a `definitions:` list.
pub fn parse_definition_set_yaml(yaml_str: &str) -> Result<Vec<WorkflowDefinition>> {
    let set: DefinitionSet = serde_yaml::from_str(yaml_str)?;
    Ok(set.definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn basic_yaml_parse() {
        let yaml = r#"
entity_type: quotation
initial_state: Pending
states: [Pending, Approved, Rejected]
terminal_states: [Approved, Rejected]
transitions:
  - from_state: Pending
    action: approve
    to_state: Approved
    allowed_roles: [sales_head]
  - from_state: Pending
    action: reject
    to_state: Rejected
    allowed_roles: [sales_head]
"#;
        let def = parse_definition_yaml(yaml).unwrap();
        assert_eq!(def.entity_type, "quotation");
        assert_eq!(def.states.len(), 3);
        assert_eq!(def.transitions.len(), 2);
        assert_eq!(def.transitions[0].allowed_roles, vec![Role::SalesHead]);
    }

    #[test]
    fn terminal_states_default_to_empty() {
        let yaml = r#"
entity_type: loop_demo
initial_state: A
states: [A, B]
transitions:
  - from_state: A
    action: flip
    to_state: B
    allowed_roles: [admin]
  - from_state: B
    action: flop
    to_state: A
    allowed_roles: [admin]
"#;
        let def = parse_definition_yaml(yaml).unwrap();
        assert!(def.terminal_states.is_empty());
    }

    #[test]
    fn definition_set_parse() {
        let yaml = r#"
definitions:
  - entity_type: quotation
    initial_state: Pending
    states: [Pending, Approved]
    terminal_states: [Approved]
    transitions:
      - from_state: Pending
        action: approve
        to_state: Approved
        allowed_roles: [sales_head]
  - entity_type: booking_request
    initial_state: Pending
    states: [Pending, Approved]
    terminal_states: [Approved]
    transitions:
      - from_state: Pending
        action: approve
        to_state: Approved
        allowed_roles: [executive]
"#;
        let defs = parse_definition_set_yaml(yaml).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].entity_type, "booking_request");
    }

    /// Unknown role strings must fail deserialization, not silently pass.
    #[test]
    fn unknown_role_fails() {
        let yaml = r#"
entity_type: quotation
initial_state: Pending
states: [Pending, Approved]
terminal_states: [Approved]
transitions:
  - from_state: Pending
    action: approve
    to_state: Approved
    allowed_roles: [chief_vibes_officer]
"#;
        assert!(parse_definition_yaml(yaml).is_err());
    }
}
