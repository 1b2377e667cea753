//! # Task Orchestrator
//!
//! Owns the task/task-run state machine. Three worker loops drain the
//! execute, handoff, and finish subjects and drive the callbacks:
//!
//! ```text
//! task.execute.{user}  ──▶ execute callback  (§ thread/task/run setup, agent invoke)
//! task.handoff.{user}  ──▶ handoff callback  (sub-task creation, parent suspension)
//! task.finish.{user}   ──▶ finish callback   (terminal turn, parent resumption)
//! ```
//!
//! The orchestrator is the only component that mutates task-run status.
//! Callbacks never propagate errors back up the bus: they terminate
//! locally, persist observable state, and emit an error envelope when a
//! reply path exists.

mod execute;
mod finish;
mod handoff;

pub use execute::RunDirective;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weave_shared::messaging::{Delivery, EventBody, EventEnvelope, EventHeader};
use weave_shared::{SystemContext, WeaveResult};

use crate::lifecycle::LifecycleEmitter;

/// Which worker loop received a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackKind {
    Execute,
    Handoff,
    Finish,
}

/// Drives the task/task-run state machine from bus envelopes
#[derive(Debug, Clone)]
pub struct TaskOrchestrator {
    context: SystemContext,
    emitter: LifecycleEmitter,
}

impl TaskOrchestrator {
    pub fn new(context: SystemContext) -> Self {
        let emitter = LifecycleEmitter::new(context.clone());
        Self { context, emitter }
    }

    pub fn context(&self) -> &SystemContext {
        &self.context
    }

    pub(crate) fn emitter(&self) -> &LifecycleEmitter {
        &self.emitter
    }

    /// Spawn the three callback workers; they run until `cancel` fires
    pub fn spawn_workers(&self, cancel: CancellationToken) -> WeaveResult<Vec<JoinHandle<()>>> {
        let subjects = self.context.subjects();
        let patterns = [
            (CallbackKind::Execute, subjects.execute_wildcard()),
            (CallbackKind::Handoff, subjects.handoff_wildcard()),
            (CallbackKind::Finish, subjects.finish_wildcard()),
        ];

        let mut handles = Vec::with_capacity(patterns.len());
        for (kind, pattern) in patterns {
            let mut subscription = self.context.bus().subscribe(&pattern)?;
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                info!(pattern = %subscription.pattern(), "Orchestrator worker started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        delivery = subscription.recv() => match delivery {
                            Some(delivery) => orchestrator.dispatch(kind, delivery).await,
                            None => break,
                        },
                    }
                }
                subscription.unsubscribe();
                debug!(?kind, "Orchestrator worker stopped");
            }));
        }
        Ok(handles)
    }

    async fn dispatch(&self, kind: CallbackKind, delivery: Delivery) {
        let trace_id = delivery.envelope.metadata.trace_id;
        let result = match kind {
            CallbackKind::Execute => self.handle_execute(delivery.envelope).await,
            CallbackKind::Handoff => self.handle_handoff(delivery.envelope).await,
            CallbackKind::Finish => self.handle_finish(delivery.envelope).await,
        };
        if let Err(err) = result {
            error!(
                ?kind,
                trace_id = %trace_id,
                subject = %delivery.subject,
                error = %err,
                "Callback failed"
            );
        }
    }

    /// Publish an error envelope on the caller's per-user response subject
    pub(crate) async fn publish_response_error(&self, header: &EventHeader, message: &str) {
        let subject = self.context.subjects().response_for(&header.user_id);
        let envelope = EventEnvelope::new(
            header.clone(),
            EventBody::TaskError {
                error: message.to_string(),
            },
        )
        .with_error(message);
        if let Err(err) = self.context.bus().publish(&subject, envelope).await {
            error!(
                user_id = %header.user_id,
                error = %err,
                "Failed to publish response error envelope"
            );
        }
    }
}
