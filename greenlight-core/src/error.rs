use crate::types::Role;
use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for `TransitionExecutor::apply`.
///
/// Every variant maps to a distinct caller reaction: 404 for `NotFound`,
/// alert-the-operator for `Configuration`, "already processed" for
/// `IllegalTransition`, "not authorized" for `Forbidden`, reload-and-retry
/// for `Conflict`. Callers must handle the result explicitly — nothing is
/// swallowed inside the executor.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("entity {entity_id} not found")]
    NotFound { entity_id: Uuid },

    /// No workflow definition registered for the record's entity type.
    /// A deployment defect, not a user error — the registry validates at
    /// boot, so seeing this in production means the registry and the data
    /// disagree.
    #[error("no workflow definition registered for entity type '{entity_type}'")]
    Configuration { entity_type: String },

    #[error("action '{action}' is not valid from state '{state}' of {entity_type}")]
    IllegalTransition {
        entity_type: String,
        state: String,
        action: String,
    },

    #[error("role '{role}' may not perform '{action}' from state '{state}'")]
    Forbidden {
        role: Role,
        action: String,
        state: String,
    },

    /// Lost an optimistic-concurrency race. The entity changed between load
    /// and commit; reload and re-apply.
    #[error("entity {entity_id} was modified concurrently; reload and retry")]
    Conflict { entity_id: Uuid },

    #[error("remarks length {len} exceeds the {max} character limit")]
    RemarksTooLong { len: usize, max: usize },

    #[error("storage backend failure: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors surfaced by `EntityStore` implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(Uuid),

    #[error("version conflict committing entity {0}")]
    Conflict(Uuid),

    #[error("entity {0} already exists")]
    DuplicateId(Uuid),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl TransitionError {
    /// Lift a store failure into the apply taxonomy.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity_id) => TransitionError::NotFound { entity_id },
            StoreError::Conflict(entity_id) => TransitionError::Conflict { entity_id },
            StoreError::DuplicateId(id) => {
                TransitionError::Storage(anyhow::anyhow!("duplicate entity id {id}"))
            }
            StoreError::Backend(e) => TransitionError::Storage(e),
        }
    }
}
