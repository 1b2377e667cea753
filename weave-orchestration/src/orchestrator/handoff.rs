//! Handoff callback: nested agent invocation as a sub-task.
//!
//! The parent is not held on a coroutine while the sub-agent runs; its run
//! suspends as PENDING and the tool-gather envelope emitted on sub-task
//! finish re-drives the parent through the normal agent loop.

use tracing::{info, instrument, warn};

use weave_shared::messaging::{EventBody, EventEnvelope};
use weave_shared::models::{RunStatus, SenderKind, Task, TaskRun, ThreadMessage};
use weave_shared::WeaveResult;

use super::TaskOrchestrator;

impl TaskOrchestrator {
    /// Handoff callback entry point
    #[instrument(skip(self, envelope), fields(trace_id = %envelope.metadata.trace_id))]
    pub async fn handle_handoff(&self, envelope: EventEnvelope) -> WeaveResult<()> {
        let header = envelope.header.clone();
        let tag = envelope.body.tag();
        let EventBody::TaskHandoff {
            agent_id,
            handoff_agent_id,
            tool_run_id,
            messages,
        } = envelope.body
        else {
            warn!(tag, "Unexpected body on handoff subject");
            return Ok(());
        };

        let (Some(parent_task_id), Some(thread_id)) = (header.task_id, header.thread_id) else {
            warn!("Handoff envelope missing task or thread id; dropping");
            return Ok(());
        };

        // The handoff target must exist; an unknown agent aborts the
        // handoff with a definite error to the caller and leaves the
        // parent's run state untouched
        if !self.context.gateway().agent_exists(handoff_agent_id).await? {
            warn!(
                handoff_agent_id = %handoff_agent_id,
                parent_task_id = %parent_task_id,
                "Handoff target agent not found; aborting handoff"
            );
            self.publish_response_error(
                &header,
                &format!("handoff target agent not found: {handoff_agent_id}"),
            )
            .await;
            return Ok(());
        }

        let gateway = self.context.gateway();
        let max_loops = self.context.config().execution.default_max_request_loops;

        // Sub-task id equals the tool-run id so the eventual tool-gather
        // result can be correlated by the tool runtime
        let sub_task = Task::new_sub_task(
            tool_run_id,
            thread_id,
            parent_task_id,
            max_loops,
            header.user_id.as_str(),
        );
        gateway.create_task(&sub_task).await?;
        gateway.create_task_run(&TaskRun::new(tool_run_id)).await?;

        // Suspend the parent
        match gateway.current_task_run(parent_task_id).await? {
            Some(parent_run) => {
                gateway
                    .update_task_run_status(parent_run.task_run_id, RunStatus::Pending)
                    .await?;
            }
            None => warn!(
                parent_task_id = %parent_task_id,
                "Handoff from a task with no active run"
            ),
        }

        // Record the handoff conversation and read the pair history
        let parent_party = agent_id.to_string();
        let handoff_party = handoff_agent_id.to_string();
        for message in &messages {
            let row = ThreadMessage::new(
                thread_id,
                message.clone(),
                parent_party.as_str(),
                handoff_party.as_str(),
                SenderKind::Assistant,
            );
            gateway.append_message(&row).await?;
        }
        let history = gateway
            .messages_between(thread_id, &parent_party, &handoff_party)
            .await?;

        // Everything downstream happens under the sub-task's identity
        let mut sub_header = header.clone();
        sub_header.task_id = Some(tool_run_id);
        self.emitter().sub_task_start(&sub_header).await?;

        let subject = self.context.subjects().agent_invoke_for(&sub_header.user_id);
        let invoke = EventEnvelope::new(
            sub_header,
            EventBody::AgentInvoke {
                agent_id: handoff_agent_id,
                recipient_id: parent_party,
                messages: history,
            },
        );
        self.context.bus().publish(&subject, invoke).await?;

        info!(
            parent_task_id = %parent_task_id,
            sub_task_id = %tool_run_id,
            handoff_agent_id = %handoff_agent_id,
            "Handoff accepted; parent suspended"
        );
        Ok(())
    }
}
