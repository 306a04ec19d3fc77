use crate::definition::WorkflowDefinition;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

fn err(errors: &mut Vec<ValidationError>, rule: &str, message: String) {
    errors.push(ValidationError {
        rule: rule.to_string(),
        message,
    });
}

/// Validate a WorkflowDefinition before it enters the registry. Returns all
/// errors found. Runs once at registry build; a non-empty result aborts boot.
pub fn validate_definition(def: &WorkflowDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // W1: state names must be unique
    let mut seen: HashSet<&str> = HashSet::new();
    for state in &def.states {
        if !seen.insert(state.as_str()) {
            err(
                &mut errors,
                "W1",
                format!("{}: duplicate state '{}'", def.entity_type, state),
            );
        }
    }

    // W2: state names must be non-empty
    if def.states.iter().any(|s| s.is_empty()) {
        err(
            &mut errors,
            "W2",
            format!("{}: empty state name", def.entity_type),
        );
    }

    // W3: initial state is a member and not terminal
    if !def.has_state(&def.initial_state) {
        err(
            &mut errors,
            "W3",
            format!(
                "{}: initial state '{}' is not in the state set",
                def.entity_type, def.initial_state
            ),
        );
    } else if def.is_terminal(&def.initial_state) {
        err(
            &mut errors,
            "W3",
            format!(
                "{}: initial state '{}' is declared terminal",
                def.entity_type, def.initial_state
            ),
        );
    }

    // W4: terminal states must be members
    for terminal in &def.terminal_states {
        if !def.has_state(terminal) {
            err(
                &mut errors,
                "W4",
                format!(
                    "{}: terminal state '{}' is not in the state set",
                    def.entity_type, terminal
                ),
            );
        }
    }

    // W5: transition endpoints must reference known states
    for t in &def.transitions {
        if !def.has_state(&t.from_state) {
            err(
                &mut errors,
                "W5",
                format!(
                    "{}: transition '{}' leaves unknown state '{}'",
                    def.entity_type, t.action, t.from_state
                ),
            );
        }
        if !def.has_state(&t.to_state) {
            err(
                &mut errors,
                "W5",
                format!(
                    "{}: transition '{}' targets unknown state '{}'",
                    def.entity_type, t.action, t.to_state
                ),
            );
        }
    }

    // W6: no transition may originate from a terminal state
    for t in &def.transitions {
        if def.is_terminal(&t.from_state) {
            err(
                &mut errors,
                "W6",
                format!(
                    "{}: transition '{}' leaves terminal state '{}'",
                    def.entity_type, t.action, t.from_state
                ),
            );
        }
    }

    // W7: allowed_roles must be non-empty
    for t in &def.transitions {
        if t.allowed_roles.is_empty() {
            err(
                &mut errors,
                "W7",
                format!(
                    "{}: transition '{}' from '{}' has no allowed roles",
                    def.entity_type, t.action, t.from_state
                ),
            );
        }
    }

    // W8: every state reachable from the initial state is terminal or has
    // at least one outgoing transition. Structural errors above make the
    // graph walk meaningless, so skip it once endpoints are broken.
    if errors.iter().all(|e| e.rule != "W3" && e.rule != "W5") {
        let index: HashMap<&str, usize> = def
            .states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for (i, _) in def.states.iter().enumerate() {
            graph.add_node(i);
        }
        for t in &def.transitions {
            graph.add_edge(index[t.from_state.as_str()], index[t.to_state.as_str()], ());
        }

        let start = index[def.initial_state.as_str()];
        let mut dfs = Dfs::new(&graph, start);
        while let Some(node) = dfs.next(&graph) {
            let state = &def.states[node];
            let has_outgoing = def.outgoing(state).next().is_some();
            if !def.is_terminal(state) && !has_outgoing {
                err(
                    &mut errors,
                    "W8",
                    format!(
                        "{}: state '{}' is reachable but has no outgoing transition and is not terminal",
                        def.entity_type, state
                    ),
                );
            }
        }
    }

    // W9: duplicate (from_state, action) pairs would make edge lookup ambiguous
    let mut pairs: HashSet<(&str, &str)> = HashSet::new();
    for t in &def.transitions {
        if !pairs.insert((t.from_state.as_str(), t.action.as_str())) {
            err(
                &mut errors,
                "W9",
                format!(
                    "{}: duplicate transition '{}' from state '{}'",
                    def.entity_type, t.action, t.from_state
                ),
            );
        }
    }

    errors
}
