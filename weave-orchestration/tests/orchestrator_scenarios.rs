//! End-to-end orchestrator scenarios over the in-memory providers, with
//! the scripted agent runtime standing in for the external one.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use weave_orchestration::testing::{spawn_scripted_runtime, AgentScript};
use weave_orchestration::TaskOrchestrator;
use weave_shared::messaging::{EventBody, EventEnvelope, EventHeader, InboundMessage};
use weave_shared::models::{RunStatus, TaskRun};
use weave_shared::SystemContext;

use common::{
    seed_agent, seed_thread, seed_thread_and_task, test_context, wait_for_run, UserChannel,
    RECV_TIMEOUT,
};

/// Workers plus (optionally) the scripted runtime, torn down on drop
struct Harness {
    context: SystemContext,
    cancel: CancellationToken,
}

impl Harness {
    fn start(script: Option<AgentScript>) -> Self {
        let context = test_context();
        let cancel = CancellationToken::new();
        let orchestrator = TaskOrchestrator::new(context.clone());
        orchestrator.spawn_workers(cancel.clone()).unwrap();
        if let Some(script) = script {
            spawn_scripted_runtime(context.clone(), cancel.clone(), script).unwrap();
        }
        Self { context, cancel }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn execute_envelope(header: EventHeader, agent_id: Uuid, content: &str) -> EventEnvelope {
    EventEnvelope::new(
        header,
        EventBody::TaskExecute {
            agent_id,
            messages: vec![InboundMessage {
                role: "user".to_string(),
                content: json!(content),
            }],
        },
    )
}

#[tokio::test]
async fn test_new_task_happy_path_emits_full_sequence() {
    let harness = Harness::start(Some(AgentScript::Respond {
        text: "hello back".to_string(),
    }));
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let mut client = UserChannel::open(context, &user);

    let header = EventHeader::new(user.as_str()).with_connection(Uuid::new_v4());
    context
        .bus()
        .publish(
            &context.subjects().execute_for(&user),
            execute_envelope(header, Uuid::new_v4(), "hi"),
        )
        .await
        .unwrap();

    let mut tags = Vec::new();
    let mut task_id = None;
    let mut thread_id = None;
    loop {
        let delivery = client.recv().await;
        if let EventBody::TaskStart {
            task_id: t,
            thread_id: th,
        } = &delivery.envelope.body
        {
            task_id = Some(*t);
            thread_id = Some(*th);
        }
        let tag = delivery.envelope.body.tag().to_string();
        let done = tag == "task_stop";
        tags.push(tag);
        if done {
            break;
        }
    }

    assert_eq!(
        tags,
        vec![
            "task_start",
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
            "task_stop",
        ]
    );

    // Durable state: thread, task with the default loop bound, finished run
    let task_id = task_id.unwrap();
    let thread_id = thread_id.unwrap();
    let thread = context.gateway().get_thread(thread_id).await.unwrap();
    assert_eq!(thread.user_id, user);

    let task = context.gateway().get_task(task_id).await.unwrap();
    assert_eq!(task.thread_id, thread_id);
    assert_eq!(task.max_request_loop, 20);
    assert!(task.parent_task_id.is_none());

    let run = context
        .gateway()
        .latest_task_run(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(run.current_loops, 1);

    // The terminal turn was appended with its stop reason
    let history = context
        .gateway()
        .messages_for_thread(thread_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn test_loop_cap_suspends_without_invoke_or_task_start() {
    let harness = Harness::start(Some(AgentScript::Silent));
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let (thread, task) = seed_thread_and_task(context, 1).await;
    let run = TaskRun::new(task.task_id);
    context.gateway().create_task_run(&run).await.unwrap();
    context
        .gateway()
        .advance_task_run(run.task_run_id, RunStatus::Running)
        .await
        .unwrap();

    let mut client = UserChannel::open(context, &user);
    let mut invokes = context
        .bus()
        .subscribe(&context.subjects().agent_invoke_wildcard())
        .unwrap();

    let header = EventHeader::new(user.as_str())
        .with_thread(thread.thread_id)
        .with_task(task.task_id);
    context
        .bus()
        .publish(
            &context.subjects().execute_for(&user),
            execute_envelope(header, Uuid::new_v4(), "again"),
        )
        .await
        .unwrap();

    let run = wait_for_run(context.gateway(), task.task_id, RECV_TIMEOUT, |run| {
        run.status == RunStatus::Pending
    })
    .await;
    assert_eq!(run.current_loops, 2);

    // Existing task: no task_start; suspended run: no agent invocation
    client.expect_silence(Duration::from_millis(300)).await;
    assert!(tokio::time::timeout(Duration::from_millis(300), invokes.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_handoff_suspends_parent_and_finish_resumes_it() {
    let harness = Harness::start(None);
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let (thread, parent_task) = seed_thread_and_task(context, 20).await;
    let parent_run = TaskRun::new(parent_task.task_id);
    context.gateway().create_task_run(&parent_run).await.unwrap();
    context
        .gateway()
        .advance_task_run(parent_run.task_run_id, RunStatus::Running)
        .await
        .unwrap();

    let handoff_agent_id = seed_agent(context).await;
    let parent_agent_id = Uuid::new_v4();
    let tool_run_id = Uuid::new_v4();

    let mut client = UserChannel::open(context, &user);
    let mut invokes = context
        .bus()
        .subscribe(&context.subjects().agent_invoke_wildcard())
        .unwrap();
    let mut gathers = context
        .bus()
        .subscribe(&context.subjects().tool_gather_for(&user))
        .unwrap();

    let header = EventHeader::new(user.as_str())
        .with_thread(thread.thread_id)
        .with_task(parent_task.task_id);
    context
        .bus()
        .publish(
            &context.subjects().handoff_for(&user),
            EventEnvelope::new(
                header,
                EventBody::TaskHandoff {
                    agent_id: parent_agent_id,
                    handoff_agent_id,
                    tool_run_id,
                    messages: vec![json!({"role": "assistant", "content": "summarize this"})],
                },
            ),
        )
        .await
        .unwrap();

    // sub_task_start under the sub-task's identity
    let delivery = client.recv().await;
    match delivery.envelope.body {
        EventBody::SubTaskStart { task_id, .. } => assert_eq!(task_id, tool_run_id),
        other => panic!("expected sub_task_start, got {}", other.tag()),
    }

    // Sub-task row with parent pointer and its own run
    let sub_task = context.gateway().get_task(tool_run_id).await.unwrap();
    assert_eq!(sub_task.parent_task_id, Some(parent_task.task_id));
    assert!(context
        .gateway()
        .latest_task_run(tool_run_id)
        .await
        .unwrap()
        .is_some());

    // Parent suspended
    let parent = context
        .gateway()
        .current_task_run(parent_task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.status, RunStatus::Pending);

    // Sub-agent invoked with the handoff pair history
    let invoke = tokio::time::timeout(RECV_TIMEOUT, invokes.recv())
        .await
        .unwrap()
        .unwrap();
    match invoke.envelope.body {
        EventBody::AgentInvoke {
            agent_id, messages, ..
        } => {
            assert_eq!(agent_id, handoff_agent_id);
            assert_eq!(messages.len(), 1);
        }
        other => panic!("expected agent_invoke, got {}", other.tag()),
    }
    assert_eq!(invoke.envelope.header.task_id, Some(tool_run_id));

    // Sub-agent finishes its turn
    let finish_header = EventHeader::new(user.as_str())
        .with_thread(thread.thread_id)
        .with_task(tool_run_id);
    context
        .bus()
        .publish(
            &context.subjects().finish_for(&user),
            EventEnvelope::new(
                finish_header,
                EventBody::TaskFinish {
                    agent_id: handoff_agent_id,
                    recipient_id: parent_agent_id.to_string(),
                    response: json!({"content": "summary done"}),
                    citations: None,
                },
            ),
        )
        .await
        .unwrap();

    let delivery = client.recv().await;
    match delivery.envelope.body {
        EventBody::SubTaskStop { task_id, .. } => assert_eq!(task_id, tool_run_id),
        other => panic!("expected sub_task_stop, got {}", other.tag()),
    }

    // Result re-enters the parent loop via tool-gather
    let gather = tokio::time::timeout(RECV_TIMEOUT, gathers.recv())
        .await
        .unwrap()
        .unwrap();
    match gather.envelope.body {
        EventBody::ToolGather {
            tool_run_id: gathered,
            content,
            result_type,
            is_error,
        } => {
            assert_eq!(gathered, tool_run_id);
            assert_eq!(content, "summary done");
            assert_eq!(result_type, "text");
            assert!(!is_error);
        }
        other => panic!("expected tool_gather, got {}", other.tag()),
    }
    assert_eq!(gather.envelope.header.task_id, Some(parent_task.task_id));

    // Parent resumed; sub-task run finished
    wait_for_run(context.gateway(), parent_task.task_id, RECV_TIMEOUT, |run| {
        run.status == RunStatus::Running
    })
    .await;
    let sub_run = context
        .gateway()
        .latest_task_run(tool_run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub_run.status, RunStatus::Finished);
}

#[tokio::test]
async fn test_handoff_to_unknown_agent_aborts_with_error() {
    let harness = Harness::start(None);
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let (thread, parent_task) = seed_thread_and_task(context, 20).await;
    let parent_run = TaskRun::new(parent_task.task_id);
    context.gateway().create_task_run(&parent_run).await.unwrap();
    context
        .gateway()
        .advance_task_run(parent_run.task_run_id, RunStatus::Running)
        .await
        .unwrap();

    let mut client = UserChannel::open(context, &user);
    let tool_run_id = Uuid::new_v4();

    let header = EventHeader::new(user.as_str())
        .with_thread(thread.thread_id)
        .with_task(parent_task.task_id);
    context
        .bus()
        .publish(
            &context.subjects().handoff_for(&user),
            EventEnvelope::new(
                header,
                EventBody::TaskHandoff {
                    agent_id: Uuid::new_v4(),
                    handoff_agent_id: Uuid::new_v4(),
                    tool_run_id,
                    messages: vec![],
                },
            ),
        )
        .await
        .unwrap();

    let delivery = client.recv().await;
    let error = delivery.envelope.error.expect("expected error envelope");
    assert!(error.contains("handoff target agent not found"));

    // Nothing was mutated: no sub-task, parent still running
    assert!(context.gateway().get_task(tool_run_id).await.is_err());
    let parent = context
        .gateway()
        .current_task_run(parent_task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.status, RunStatus::Running);
}

#[tokio::test]
async fn test_execute_with_wrong_body_reports_response_error() {
    let harness = Harness::start(None);
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let mut client = UserChannel::open(context, &user);

    context
        .bus()
        .publish(
            &context.subjects().execute_for(&user),
            EventEnvelope::new(
                EventHeader::new(user.as_str()),
                EventBody::ToolGather {
                    tool_run_id: Uuid::new_v4(),
                    content: "noise".to_string(),
                    result_type: "text".to_string(),
                    is_error: false,
                },
            ),
        )
        .await
        .unwrap();

    let delivery = client.recv().await;
    assert_eq!(
        delivery.envelope.error.as_deref(),
        Some("invalid task execute event")
    );
}

#[tokio::test]
async fn test_execute_against_missing_thread_reports_error() {
    let harness = Harness::start(None);
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let mut client = UserChannel::open(context, &user);

    // Header names a thread that does not exist; the append fails and the
    // caller hears about it on the response subject
    let header = EventHeader::new(user.as_str()).with_thread(Uuid::new_v4());
    context
        .bus()
        .publish(
            &context.subjects().execute_for(&user),
            execute_envelope(header, Uuid::new_v4(), "hi"),
        )
        .await
        .unwrap();

    let delivery = client.recv().await;
    assert!(delivery.envelope.error.is_some());
}

#[tokio::test]
async fn test_reexecute_existing_task_increments_loops_without_task_start() {
    let harness = Harness::start(Some(AgentScript::Respond {
        text: "round two".to_string(),
    }));
    let context = &harness.context;
    let user = context.default_user_id().to_string();

    let thread = seed_thread(context).await;
    let (_, task) = {
        // First cycle bootstraps the task through the orchestrator itself
        let mut client = UserChannel::open(context, &user);
        let header = EventHeader::new(user.as_str()).with_thread(thread.thread_id);
        context
            .bus()
            .publish(
                &context.subjects().execute_for(&user),
                execute_envelope(header, Uuid::new_v4(), "first"),
            )
            .await
            .unwrap();

        let mut task_id = None;
        loop {
            let delivery = client.recv().await;
            if let EventBody::TaskStart { task_id: t, .. } = &delivery.envelope.body {
                task_id = Some(*t);
            }
            if delivery.envelope.body.tag() == "task_stop" {
                break;
            }
        }
        let task_id = task_id.unwrap();
        (thread.thread_id, context.gateway().get_task(task_id).await.unwrap())
    };

    // Second cycle carries the task id: a fresh run is appended, no
    // task_start is emitted
    let mut client = UserChannel::open(context, &user);
    let header = EventHeader::new(user.as_str())
        .with_thread(thread.thread_id)
        .with_task(task.task_id);
    context
        .bus()
        .publish(
            &context.subjects().execute_for(&user),
            execute_envelope(header, Uuid::new_v4(), "second"),
        )
        .await
        .unwrap();

    let mut tags = Vec::new();
    loop {
        let delivery = client.recv().await;
        let tag = delivery.envelope.body.tag().to_string();
        let done = tag == "task_stop";
        tags.push(tag);
        if done {
            break;
        }
    }
    assert!(!tags.contains(&"task_start".to_string()));
    assert_eq!(tags.last().map(String::as_str), Some("task_stop"));

    let run = context
        .gateway()
        .latest_task_run(task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(run.current_loops, 1);
}
