//! Finish callback: terminal assistant turn handling.
//!
//! Top-level tasks stop with `task_stop`; sub-tasks stop with
//! `sub_task_stop`, resume their parent's run, and publish the tool-gather
//! envelope that re-enters the parent agent's loop.

use tracing::{info, instrument, warn};

use weave_shared::messaging::{EventBody, EventEnvelope};
use weave_shared::models::{RunStatus, SenderKind, ThreadMessage};
use weave_shared::WeaveResult;

use super::TaskOrchestrator;

impl TaskOrchestrator {
    /// Finish callback entry point
    #[instrument(skip(self, envelope), fields(trace_id = %envelope.metadata.trace_id))]
    pub async fn handle_finish(&self, envelope: EventEnvelope) -> WeaveResult<()> {
        let header = envelope.header.clone();
        let tag = envelope.body.tag();
        let EventBody::TaskFinish {
            agent_id,
            recipient_id,
            response,
            citations,
        } = envelope.body
        else {
            warn!(tag, "Unexpected body on finish subject");
            if let Some(task_id) = header.task_id {
                self.fail_current_run(task_id).await;
            }
            return Ok(());
        };

        let (Some(task_id), Some(thread_id)) = (header.task_id, header.thread_id) else {
            warn!("Finish envelope missing task or thread id; dropping");
            return Ok(());
        };

        let gateway = self.context.gateway();

        // Record the assistant's terminal turn. A thread deleted mid-flight
        // is benign: the run still gets its terminal status below.
        let mut message = ThreadMessage::new(
            thread_id,
            response.clone(),
            agent_id.to_string(),
            recipient_id.as_str(),
            SenderKind::Assistant,
        )
        .with_stop_reason("end_turn");
        if let Some(citations) = citations {
            message = message.with_citations(citations);
        }
        match gateway.append_message(&message).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                info!(thread_id = %thread_id, "Thread gone before finish; skipping message append");
            }
            Err(err) => return Err(err),
        }

        let task = gateway.get_task(task_id).await?;

        let Some(parent_task_id) = task.parent_task_id else {
            // Top-level task: terminal
            if let Some(run) = gateway.current_task_run(task_id).await? {
                gateway
                    .update_task_run_status(run.task_run_id, RunStatus::Finished)
                    .await?;
            }
            self.emitter().task_stop(&header).await?;
            info!(task_id = %task_id, "Task finished");
            return Ok(());
        };

        // Sub-task: close the bracket, resume the parent, feed the result
        // back through the tool runtime
        self.emitter().sub_task_stop(&header).await?;

        if let Some(parent_run) = gateway.current_task_run(parent_task_id).await? {
            gateway
                .update_task_run_status(parent_run.task_run_id, RunStatus::Running)
                .await?;
        } else {
            warn!(
                parent_task_id = %parent_task_id,
                "Sub-task finished but parent has no active run"
            );
        }

        if let Some(run) = gateway.current_task_run(task_id).await? {
            gateway
                .update_task_run_status(run.task_run_id, RunStatus::Finished)
                .await?;
        }

        let mut parent_header = header.clone();
        parent_header.task_id = Some(parent_task_id);
        let gather = EventEnvelope::new(
            parent_header.clone(),
            EventBody::ToolGather {
                tool_run_id: task_id,
                content: extract_response_text(&response),
                result_type: "text".to_string(),
                is_error: false,
            },
        );
        let subject = self
            .context
            .subjects()
            .tool_gather_for(&parent_header.user_id);
        self.context.bus().publish(&subject, gather).await?;

        info!(
            sub_task_id = %task_id,
            parent_task_id = %parent_task_id,
            "Sub-task finished; parent resumed"
        );
        Ok(())
    }
}

/// Pull the assistant-visible text out of a finish response payload
///
/// Accepts the common shapes: a bare string, `{"content": "..."}`, or
/// `{"content": [{"text": "..."}, ...]}`; anything else round-trips as
/// compact JSON.
fn extract_response_text(response: &serde_json::Value) -> String {
    match response {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Object(map) => match map.get("content") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join(""),
            _ => response.to_string(),
        },
        other => other.to_string(),
    }
}
