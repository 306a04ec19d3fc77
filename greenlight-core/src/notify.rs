use crate::types::{EntityRecord, Role, Timestamp};
use async_trait::async_trait;
use serde::Serialize;

/// What happened, for downstream ears. Sent after the commit lands —
/// a failed notification can never roll back an approval.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionNotice {
    pub entity_id: uuid::Uuid,
    pub entity_type: String,
    pub action: String,
    pub from_state: String,
    pub to_state: String,
    pub actor_id: String,
    pub actor_role: Role,
    pub at: Timestamp,
}

/// External collaborator invoked on every committed transition
/// (toast/email/push). Fire-and-forget: the executor dispatches notices on
/// a detached task and never awaits them in the request path. Retry policy
/// is the sink's own business.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, record: &EntityRecord, notice: &TransitionNotice);
}

/// Default sink: swallows everything. Used when no sink is configured.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _record: &EntityRecord, _notice: &TransitionNotice) {}
}

/// Sink that logs each transition through `tracing`.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, _record: &EntityRecord, notice: &TransitionNotice) {
        tracing::info!(
            entity_id = %notice.entity_id,
            entity_type = %notice.entity_type,
            action = %notice.action,
            from_state = %notice.from_state,
            to_state = %notice.to_state,
            actor = %notice.actor_id,
            role = %notice.actor_role,
            "transition committed"
        );
    }
}

/// Dispatch one notice to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, record: &EntityRecord, notice: &TransitionNotice) {
        for sink in &self.sinks {
            sink.notify(record, notice).await;
        }
    }
}
