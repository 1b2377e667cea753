//! Execute callback: thread/task/run setup and agent invocation.
//!
//! The task-run management branch and the message-history branch run
//! concurrently; within the history branch the appends happen strictly
//! before the pair-history read so the read observes its own writes.

use tracing::{info, instrument, warn};
use uuid::Uuid;

use weave_shared::messaging::{EventBody, EventEnvelope, EventHeader, InboundMessage};
use weave_shared::models::{RunStatus, SenderKind, Task, TaskRun, Thread, ThreadMessage};
use weave_shared::WeaveResult;

use super::TaskOrchestrator;

/// Outcome of task-run management for one execute cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDirective {
    /// Loop budget available: the agent is invoked
    Proceed,
    /// Loop cap reached: the run suspended as PENDING and waits for user
    /// input; no agent invocation this cycle
    AwaitUser,
}

#[derive(Debug)]
struct RunOutcome {
    task_id: Uuid,
    directive: RunDirective,
}

impl TaskOrchestrator {
    /// Execute callback entry point
    #[instrument(skip(self, envelope), fields(trace_id = %envelope.metadata.trace_id))]
    pub async fn handle_execute(&self, envelope: EventEnvelope) -> WeaveResult<()> {
        let header = envelope.header.clone();
        let tag = envelope.body.tag();
        let EventBody::TaskExecute { agent_id, messages } = envelope.body else {
            warn!(tag, "Unexpected body on execute subject");
            self.publish_response_error(&header, "invalid task execute event")
                .await;
            return Ok(());
        };

        match self.execute_inner(header.clone(), agent_id, messages).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.publish_response_error(&header, &err.to_string()).await;
                // Mark the run failed where a task is identifiable; a new
                // task that failed mid-creation has no reply-side id yet
                if let Some(task_id) = header.task_id {
                    self.fail_current_run(task_id).await;
                }
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        mut header: EventHeader,
        agent_id: Uuid,
        messages: Vec<InboundMessage>,
    ) -> WeaveResult<()> {
        let gateway = self.context.gateway();

        // Ensure a thread exists and the header carries it
        let thread_id = match header.thread_id {
            Some(thread_id) => thread_id,
            None => {
                let title = derive_thread_title(&header);
                let thread = Thread::new(header.user_id.as_str(), title);
                gateway.create_thread(&thread).await?;
                header.thread_id = Some(thread.thread_id);
                thread.thread_id
            }
        };

        // task_start is emitted only for tasks created by this cycle
        let is_new_task = header.task_id.is_none();
        let agent_party = agent_id.to_string();

        let run_branch = self.manage_task_run(&header, thread_id);
        let history_branch = async {
            // Appends strictly precede the pair-history read
            for inbound in &messages {
                let message = ThreadMessage::new(
                    thread_id,
                    serde_json::to_value(inbound)?,
                    header.user_id.as_str(),
                    agent_party.as_str(),
                    SenderKind::User,
                );
                gateway.append_message(&message).await?;
            }
            gateway
                .messages_between(thread_id, &agent_party, &header.user_id)
                .await
        };

        let (outcome, history) = tokio::try_join!(run_branch, history_branch)?;
        header.task_id = Some(outcome.task_id);

        if is_new_task {
            self.emitter().task_start(&header).await?;
        }

        match outcome.directive {
            RunDirective::AwaitUser => {
                info!(
                    task_id = %outcome.task_id,
                    "Loop cap reached; run suspended pending user input"
                );
            }
            RunDirective::Proceed => {
                let subject = self.context.subjects().agent_invoke_for(&header.user_id);
                let invoke = EventEnvelope::new(
                    header.clone(),
                    EventBody::AgentInvoke {
                        agent_id,
                        recipient_id: header.user_id.clone(),
                        messages: history,
                    },
                );
                self.context.bus().publish(&subject, invoke).await?;
                info!(
                    task_id = %outcome.task_id,
                    agent_id = %agent_id,
                    "Agent invocation published"
                );
            }
        }

        Ok(())
    }

    /// Create or advance the task run for this execute cycle
    async fn manage_task_run(
        &self,
        header: &EventHeader,
        thread_id: Uuid,
    ) -> WeaveResult<RunOutcome> {
        let gateway = self.context.gateway();
        let max_loops = self.context.config().execution.default_max_request_loops;

        let Some(task_id) = header.task_id else {
            // First cycle: create the task and its initial run
            let task = Task::new(thread_id, max_loops, header.user_id.as_str());
            gateway.create_task(&task).await?;
            let run = TaskRun::new(task.task_id);
            gateway.create_task_run(&run).await?;
            gateway
                .advance_task_run(run.task_run_id, RunStatus::Running)
                .await?;
            return Ok(RunOutcome {
                task_id: task.task_id,
                directive: RunDirective::Proceed,
            });
        };

        let (current, task) = tokio::try_join!(
            gateway.current_task_run(task_id),
            gateway.get_task(task_id)
        )?;

        let run = match current {
            Some(run) => run,
            None => {
                // All prior runs terminal: append a fresh run for this cycle
                let run = TaskRun::new(task_id);
                gateway.create_task_run(&run).await?;
                run
            }
        };

        if run.current_loops >= task.max_request_loop {
            // At the cap the run suspends as PENDING, never RUNNING
            gateway
                .advance_task_run(run.task_run_id, RunStatus::Pending)
                .await?;
            Ok(RunOutcome {
                task_id,
                directive: RunDirective::AwaitUser,
            })
        } else {
            gateway
                .advance_task_run(run.task_run_id, RunStatus::Running)
                .await?;
            Ok(RunOutcome {
                task_id,
                directive: RunDirective::Proceed,
            })
        }
    }

    /// Best-effort FAILED transition for a task's current run
    pub(crate) async fn fail_current_run(&self, task_id: Uuid) {
        let gateway = self.context.gateway();
        match gateway.current_task_run(task_id).await {
            Ok(Some(run)) => {
                if let Err(err) = gateway
                    .update_task_run_status(run.task_run_id, RunStatus::Failed)
                    .await
                {
                    warn!(task_id = %task_id, error = %err, "Failed to mark run FAILED");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Failed to look up current run");
            }
        }
    }
}

/// Deterministic title for threads auto-created by an execute cycle
fn derive_thread_title(header: &EventHeader) -> String {
    match header.connection_id {
        Some(connection_id) => format!("{}-{}", header.user_id, connection_id),
        None => format!("{}-session", header.user_id),
    }
}

impl std::fmt::Display for RunDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => f.write_str("proceed"),
            Self::AwaitUser => f.write_str("await_user"),
        }
    }
}
