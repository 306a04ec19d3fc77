//! Greenlight - Approval Workflow Engine
//!
//! A small state-machine engine for back-office approval flows: quotations,
//! expense claims, certificate requests, leave, and the deletion-guard
//! workflow that routes destructive deletes through an approval of their own.
//!
//! The engine is declarative. A [`WorkflowDefinition`] names the states, the
//! terminal states, and the role-gated transitions between them; the
//! [`WorkflowRegistry`] validates every definition at boot and refuses to
//! start on a malformed graph. At runtime the [`TransitionExecutor`] is the
//! only writer: it checks the preconditions in a fixed order, commits
//! state + history atomically through the [`EntityStore`] CAS, and fans the
//! committed transition out to a [`NotificationSink`] on a detached task.
//!
//! Persistence is pluggable. [`MemoryEntityStore`] serves tests and
//! single-node deployments; a Postgres-backed store ships behind the
//! `postgres` feature.

pub mod definition;
pub mod error;
pub mod executor;
pub mod notify;
pub mod registry;
pub mod store;
pub mod types;
pub mod validate;
pub mod yaml;

#[cfg(feature = "postgres")]
pub mod pg_store;

pub use definition::{TransitionDef, WorkflowDefinition};
pub use error::{StoreError, TransitionError};
pub use executor::{ApplyOutcome, TransitionExecutor};
pub use notify::{FanoutSink, NoopSink, NotificationSink, TracingSink, TransitionNotice};
pub use registry::WorkflowRegistry;
pub use store::{EntityStore, MemoryEntityStore};
pub use types::{Actor, EntityRecord, HistoryEntry, Role, Timestamp, Version, MAX_REMARKS_LEN};
pub use validate::{validate_definition, ValidationError};
pub use yaml::{parse_definition_set_yaml, parse_definition_yaml};

#[cfg(feature = "postgres")]
pub use pg_store::PgEntityStore;
