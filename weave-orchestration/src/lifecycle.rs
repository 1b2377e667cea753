//! # Lifecycle Emitter
//!
//! Thin constructor layer for task- and sub-task-scoped lifecycle events.
//! Centralizes two invariants: every lifecycle event carries the task (and
//! thread) identifier, and lifecycle bodies never carry the client-facing
//! `provider` field — that belongs to content events produced by the agent
//! runtime.

use weave_shared::messaging::{EventBody, EventEnvelope, EventHeader};
use weave_shared::{SystemContext, WeaveError, WeaveResult};

/// Builds and publishes lifecycle envelopes on the caller's per-user
/// task-lifecycle subject
#[derive(Debug, Clone)]
pub struct LifecycleEmitter {
    context: SystemContext,
}

impl LifecycleEmitter {
    pub fn new(context: SystemContext) -> Self {
        Self { context }
    }

    pub async fn task_start(&self, header: &EventHeader) -> WeaveResult<()> {
        let (task_id, thread_id) = Self::require_ids(header)?;
        self.emit(header, EventBody::TaskStart { task_id, thread_id })
            .await
    }

    pub async fn task_stop(&self, header: &EventHeader) -> WeaveResult<()> {
        let (task_id, thread_id) = Self::require_ids(header)?;
        self.emit(header, EventBody::TaskStop { task_id, thread_id })
            .await
    }

    pub async fn sub_task_start(&self, header: &EventHeader) -> WeaveResult<()> {
        let (task_id, thread_id) = Self::require_ids(header)?;
        self.emit(header, EventBody::SubTaskStart { task_id, thread_id })
            .await
    }

    pub async fn sub_task_stop(&self, header: &EventHeader) -> WeaveResult<()> {
        let (task_id, thread_id) = Self::require_ids(header)?;
        self.emit(header, EventBody::SubTaskStop { task_id, thread_id })
            .await
    }

    /// Terminal error on the lifecycle subject; the envelope-level error
    /// string is what the session forwarders surface to clients
    pub async fn task_error(&self, header: &EventHeader, error: &str) -> WeaveResult<()> {
        let envelope = EventEnvelope::new(
            header.clone(),
            EventBody::TaskError {
                error: error.to_string(),
            },
        )
        .with_error(error);
        let subject = self.context.subjects().lifecycle_for(&header.user_id);
        self.context.bus().publish(&subject, envelope).await
    }

    async fn emit(&self, header: &EventHeader, body: EventBody) -> WeaveResult<()> {
        let subject = self.context.subjects().lifecycle_for(&header.user_id);
        let envelope = EventEnvelope::new(header.clone(), body);
        self.context.bus().publish(&subject, envelope).await
    }

    fn require_ids(header: &EventHeader) -> WeaveResult<(uuid::Uuid, uuid::Uuid)> {
        let task_id = header.task_id.ok_or_else(|| {
            WeaveError::Protocol("lifecycle event requires a task id on the header".to_string())
        })?;
        let thread_id = header.thread_id.ok_or_else(|| {
            WeaveError::Protocol("lifecycle event requires a thread id on the header".to_string())
        })?;
        Ok((task_id, thread_id))
    }
}
