use crate::error::{StoreError, TransitionError};
use crate::notify::{NotificationSink, TransitionNotice};
use crate::registry::WorkflowRegistry;
use crate::store::EntityStore;
use crate::types::{now_ms, Actor, EntityRecord, HistoryEntry, MAX_REMARKS_LEN};
use std::sync::Arc;
use uuid::Uuid;

/// Result of a single `apply` call.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// A real transition was committed.
    Transitioned {
        record: EntityRecord,
        from_state: String,
        to_state: String,
    },
    /// The entity was already in the state this action produces — a benign
    /// double-submit, returned unchanged with no history growth.
    AlreadySatisfied { record: EntityRecord },
}

impl ApplyOutcome {
    pub fn record(&self) -> &EntityRecord {
        match self {
            ApplyOutcome::Transitioned { record, .. } => record,
            ApplyOutcome::AlreadySatisfied { record } => record,
        }
    }

    pub fn into_record(self) -> EntityRecord {
        match self {
            ApplyOutcome::Transitioned { record, .. } => record,
            ApplyOutcome::AlreadySatisfied { record } => record,
        }
    }
}

/// Validates a requested transition against the registry and, if legal,
/// atomically updates the store and appends one history entry.
///
/// Stateless and safe to call concurrently from any number of request
/// handlers: all shared mutable state lives behind the `EntityStore`, whose
/// commit CAS is the sole mutual-exclusion mechanism. No internal retry on
/// conflict — callers reload and re-apply once.
pub struct TransitionExecutor {
    store: Arc<dyn EntityStore>,
    registry: Arc<WorkflowRegistry>,
    sink: Arc<dyn NotificationSink>,
}

impl TransitionExecutor {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<WorkflowRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            registry,
            sink,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Create a record in its workflow's initial state.
    pub async fn submit(
        &self,
        entity_type: &str,
        payload: serde_json::Value,
        actor: &Actor,
    ) -> Result<EntityRecord, TransitionError> {
        let def = self.registry.get(entity_type)?;
        let record = EntityRecord::new(entity_type, def.initial_state.clone(), payload, actor);
        self.store
            .insert(&record)
            .await
            .map_err(TransitionError::from_store)?;
        tracing::info!(
            entity_id = %record.id,
            entity_type,
            state = %record.state,
            submitted_by = %actor.id,
            "entity submitted"
        );
        Ok(record)
    }

    /// Apply `action` to the entity on behalf of `actor`.
    ///
    /// Preconditions are checked in order, short-circuiting on the first
    /// failure: entity exists, a definition exists for its type, an edge
    /// exists from the current state via `action`, and the actor's role is
    /// on that edge. On success the state change and the history append
    /// commit together or not at all.
    pub async fn apply(
        &self,
        entity_id: Uuid,
        action: &str,
        actor: &Actor,
        remarks: Option<String>,
    ) -> Result<ApplyOutcome, TransitionError> {
        if let Some(ref r) = remarks {
            if r.chars().count() > MAX_REMARKS_LEN {
                return Err(TransitionError::RemarksTooLong {
                    len: r.chars().count(),
                    max: MAX_REMARKS_LEN,
                });
            }
        }

        let record = self
            .store
            .load(entity_id)
            .await
            .map_err(TransitionError::from_store)?;

        let def = self.registry.get(&record.entity_type)?;

        let Some(edge) = def.edge(&record.state, action) else {
            // Double-submit: if this action lands on the state the entity is
            // already in and the actor could have fired it, report success
            // without touching state or history.
            let already = def
                .edges_into(&record.state, action)
                .any(|t| t.permits(actor.role));
            if already {
                tracing::debug!(
                    entity_id = %record.id,
                    action,
                    state = %record.state,
                    "duplicate apply absorbed as no-op"
                );
                return Ok(ApplyOutcome::AlreadySatisfied { record });
            }
            return Err(TransitionError::IllegalTransition {
                entity_type: record.entity_type.clone(),
                state: record.state.clone(),
                action: action.to_string(),
            });
        };

        if !edge.permits(actor.role) {
            return Err(TransitionError::Forbidden {
                role: actor.role,
                action: action.to_string(),
                state: record.state.clone(),
            });
        }

        let from_state = record.state.clone();
        let to_state = edge.to_state.clone();

        // Never backdated: a clock hiccup cannot reorder the audit trail.
        let timestamp = record
            .last_transition_at()
            .map_or_else(now_ms, |last| now_ms().max(last));

        let entry = HistoryEntry {
            timestamp,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action: action.to_string(),
            from_state: from_state.clone(),
            to_state: to_state.clone(),
            remarks,
        };

        let mut updated = record;
        updated.state = to_state.clone();
        let committed = self
            .store
            .commit(&updated, entry)
            .await
            .map_err(TransitionError::from_store)?;

        tracing::info!(
            entity_id = %committed.id,
            entity_type = %committed.entity_type,
            action,
            from_state = %from_state,
            to_state = %to_state,
            actor = %actor.id,
            "transition applied"
        );

        self.dispatch_notice(&committed, action, actor, &from_state, &to_state, timestamp);

        Ok(ApplyOutcome::Transitioned {
            record: committed,
            from_state,
            to_state,
        })
    }

    /// Hand the notice to the sink on a detached task. A slow or failing
    /// sink never blocks the caller and never unwinds a committed approval.
    fn dispatch_notice(
        &self,
        record: &EntityRecord,
        action: &str,
        actor: &Actor,
        from_state: &str,
        to_state: &str,
        at: crate::types::Timestamp,
    ) {
        let notice = TransitionNotice {
            entity_id: record.id,
            entity_type: record.entity_type.clone(),
            action: action.to_string(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            at,
        };
        let sink = Arc::clone(&self.sink);
        let record = record.clone();
        tokio::spawn(async move {
            sink.notify(&record, &notice).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::notify::NoopSink;
    use crate::store::MemoryEntityStore;
    use crate::types::Role;
    use async_trait::async_trait;
    use tokio::sync::Barrier;

    fn executor() -> TransitionExecutor {
        TransitionExecutor::new(
            Arc::new(MemoryEntityStore::new()),
            Arc::new(WorkflowRegistry::builtin()),
            Arc::new(NoopSink),
        )
    }

    fn sales_head() -> Actor {
        Actor::new("mgr-9", Role::SalesHead)
    }

    async fn submit_quotation(exec: &TransitionExecutor) -> EntityRecord {
        exec.submit(
            "quotation",
            serde_json::json!({"amount": 4500, "client": "Acme"}),
            &Actor::new("u-3", Role::Employee),
        )
        .await
        .unwrap()
    }

    /// Binary approval: Pending → Approved with one history entry.
    #[tokio::test]
    async fn binary_approval_scenario() {
        let exec = executor();
        let record = submit_quotation(&exec).await;

        let outcome = exec
            .apply(record.id, "approve", &sales_head(), None)
            .await
            .unwrap();

        let ApplyOutcome::Transitioned {
            record,
            from_state,
            to_state,
        } = outcome
        else {
            panic!("expected a real transition");
        };
        assert_eq!(from_state, "Pending");
        assert_eq!(to_state, "Approved");
        assert_eq!(record.state, "Approved");
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].from_state, "Pending");
        assert_eq!(record.history[0].to_state, "Approved");
        assert_eq!(record.history[0].actor_role, Role::SalesHead);
    }

    /// Linear chain: dept head → HR → accounts, three history entries in order.
    #[tokio::test]
    async fn expense_claim_chain() {
        let exec = executor();
        let record = exec
            .submit(
                "expense_claim",
                serde_json::json!({"amount": 320.50}),
                &Actor::new("u-5", Role::Employee),
            )
            .await
            .unwrap();
        assert_eq!(record.state, "PENDING_DEPT_HEAD");

        let r = exec
            .apply(record.id, "approve", &Actor::new("dh-1", Role::DeptHead), None)
            .await
            .unwrap();
        assert_eq!(r.record().state, "PENDING_HR");

        let r = exec
            .apply(record.id, "approve", &Actor::new("hr-1", Role::Hr), None)
            .await
            .unwrap();
        assert_eq!(r.record().state, "PENDING_ACCOUNTS");

        let r = exec
            .apply(record.id, "pay", &Actor::new("ac-1", Role::Accounts), None)
            .await
            .unwrap();
        let record = r.into_record();
        assert_eq!(record.state, "PAID");
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.history[0].to_state, "PENDING_HR");
        assert_eq!(record.history[1].to_state, "PENDING_ACCOUNTS");
        assert_eq!(record.history[2].to_state, "PAID");
        assert!(record.history[0].timestamp <= record.history[1].timestamp);
        assert!(record.history[1].timestamp <= record.history[2].timestamp);
    }

    /// Double-click "approve": second apply is a no-op success, history
    /// does not grow.
    #[tokio::test]
    async fn duplicate_apply_is_noop() {
        let exec = executor();
        let record = submit_quotation(&exec).await;

        exec.apply(record.id, "approve", &sales_head(), None)
            .await
            .unwrap();
        let outcome = exec
            .apply(record.id, "approve", &sales_head(), None)
            .await
            .unwrap();

        let ApplyOutcome::AlreadySatisfied { record } = outcome else {
            panic!("expected the duplicate to be absorbed");
        };
        assert_eq!(record.state, "Approved");
        assert_eq!(record.history.len(), 1);
    }

    /// A different action on a terminal state is still illegal — the no-op
    /// escape hatch only covers the action that produced the current state.
    #[tokio::test]
    async fn terminal_state_rejects_other_actions() {
        let exec = executor();
        let record = submit_quotation(&exec).await;
        exec.apply(record.id, "approve", &sales_head(), None)
            .await
            .unwrap();

        let err = exec
            .apply(record.id, "reject", &sales_head(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::IllegalTransition { .. }));

        let stored = exec.store().load(record.id).await.unwrap();
        assert_eq!(stored.state, "Approved");
        assert_eq!(stored.history.len(), 1);
    }

    /// Forbidden is a pure rejection: zero side effects on state or history.
    #[tokio::test]
    async fn forbidden_actor_is_pure_rejection() {
        let exec = executor();
        let record = submit_quotation(&exec).await;

        let err = exec
            .apply(record.id, "approve", &Actor::new("u-3", Role::Employee), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Forbidden { role: Role::Employee, .. }
        ));

        let stored = exec.store().load(record.id).await.unwrap();
        assert_eq!(stored.state, "Pending");
        assert!(stored.history.is_empty());
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn unknown_entity_is_not_found() {
        let exec = executor();
        let err = exec
            .apply(Uuid::new_v4(), "approve", &sales_head(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_entity_type_is_configuration_error() {
        let exec = executor();
        let err = exec
            .submit("timesheet", serde_json::json!({}), &sales_head())
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Configuration { .. }));
    }

    #[tokio::test]
    async fn oversized_remarks_rejected_before_io() {
        let exec = executor();
        let record = submit_quotation(&exec).await;

        let remarks = "x".repeat(MAX_REMARKS_LEN + 1);
        let err = exec
            .apply(record.id, "approve", &sales_head(), Some(remarks))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::RemarksTooLong { len, max }
                if len == MAX_REMARKS_LEN + 1 && max == MAX_REMARKS_LEN
        ));

        let stored = exec.store().load(record.id).await.unwrap();
        assert_eq!(stored.state, "Pending");
    }

    #[tokio::test]
    async fn remarks_at_limit_accepted() {
        let exec = executor();
        let record = submit_quotation(&exec).await;

        let remarks = "x".repeat(MAX_REMARKS_LEN);
        let outcome = exec
            .apply(record.id, "approve", &sales_head(), Some(remarks.clone()))
            .await
            .unwrap();
        assert_eq!(
            outcome.record().history[0].remarks.as_deref(),
            Some(remarks.as_str())
        );
    }

    #[tokio::test]
    async fn deletion_guard_routes_to_terminals() {
        let exec = executor();
        let executive = Actor::new("exec-1", Role::Executive);
        let record = exec
            .submit(
                "deletion_request",
                serde_json::json!({"target_entity_id": Uuid::new_v4()}),
                &executive,
            )
            .await
            .unwrap();
        assert_eq!(record.state, "deletion_requested");

        let outcome = exec
            .apply(record.id, "reject", &executive, Some("keep it".into()))
            .await
            .unwrap();
        assert_eq!(outcome.record().state, "restored_to_draft");
    }

    // ─── Concurrency ──────────────────────────────────────────

    /// Store wrapper that parks every load on a barrier so two applies are
    /// guaranteed to read the same version before either commits.
    struct BarrierStore {
        inner: MemoryEntityStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl EntityStore for BarrierStore {
        async fn insert(&self, record: &EntityRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }

        async fn load(&self, id: Uuid) -> Result<EntityRecord, StoreError> {
            let record = self.inner.load(id).await;
            self.barrier.wait().await;
            record
        }

        async fn commit(
            &self,
            record: &EntityRecord,
            entry: HistoryEntry,
        ) -> Result<EntityRecord, StoreError> {
            self.inner.commit(record, entry).await
        }

        async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.remove(id).await
        }
    }

    /// Concurrent conflicting applies: exactly one wins, the loser gets
    /// Conflict, and history grows by exactly one entry.
    #[tokio::test]
    async fn concurrent_applies_conflict_cleanly() {
        let store = Arc::new(BarrierStore {
            inner: MemoryEntityStore::new(),
            barrier: Barrier::new(2),
        });
        let exec = Arc::new(TransitionExecutor::new(
            store.clone(),
            Arc::new(WorkflowRegistry::builtin()),
            Arc::new(NoopSink),
        ));

        let record = EntityRecord::new(
            "quotation",
            "Pending",
            serde_json::json!({"amount": 900}),
            &Actor::new("u-2", Role::Employee),
        );
        store.inner.insert(&record).await.unwrap();

        let approve = {
            let exec = Arc::clone(&exec);
            let id = record.id;
            async move { exec.apply(id, "approve", &sales_head(), None).await }
        };
        let reject = {
            let exec = Arc::clone(&exec);
            let id = record.id;
            async move {
                exec.apply(id, "reject", &Actor::new("mgr-2", Role::SalesHead), None)
                    .await
            }
        };

        let (a, b) = tokio::join!(approve, reject);
        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(TransitionError::Conflict { .. })))
            .count();
        assert_eq!(wins, 1, "exactly one apply must win: {a:?} / {b:?}");
        assert_eq!(conflicts, 1, "the loser must see Conflict: {a:?} / {b:?}");

        let final_record = store.inner.load(record.id).await.unwrap();
        assert_eq!(final_record.history.len(), 1);
        assert_eq!(final_record.version, 1);
    }
}
