//! Shared helpers for the orchestration scenario tests.
//
// Note: test utility functions may be used by some test targets but not
// others; suppress the resulting dead-code noise.
#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use weave_shared::config::WeaveConfig;
use weave_shared::messaging::{Delivery, SubscriptionHandle};
use weave_shared::models::{Agent, Task, TaskRun, Thread};
use weave_shared::persistence::PersistenceGateway;
use weave_shared::SystemContext;

/// Default timeout for awaiting a bus delivery in tests
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory context tuned for tests: ephemeral port, fast heartbeats
pub fn test_context() -> SystemContext {
    let mut config = WeaveConfig::default();
    config.web.host = "127.0.0.1".to_string();
    config.web.port = 0;
    config.streaming.heartbeat_interval_seconds = 1;
    SystemContext::in_memory(config)
}

/// Seed a thread owned by the context's default user
pub async fn seed_thread(context: &SystemContext) -> Thread {
    let thread = Thread::new(context.default_user_id(), "test thread");
    context.gateway().create_thread(&thread).await.unwrap();
    thread
}

/// Seed a thread plus a task against it
pub async fn seed_thread_and_task(context: &SystemContext, max_loops: i32) -> (Thread, Task) {
    let thread = seed_thread(context).await;
    let task = Task::new(thread.thread_id, max_loops, context.default_user_id());
    context.gateway().create_task(&task).await.unwrap();
    (thread, task)
}

/// Register an agent the handoff existence check will accept
pub async fn seed_agent(context: &SystemContext) -> Uuid {
    let agent = Agent::new(Uuid::new_v4(), "scripted-agent");
    context.gateway().register_agent(&agent).await.unwrap();
    agent.agent_id
}

/// A pseudo-client: response and lifecycle subscriptions merged into one
/// channel, the way both session handlers wire their forwarders
pub struct UserChannel {
    pub rx: mpsc::Receiver<Delivery>,
    _response_sub: SubscriptionHandle,
    _lifecycle_sub: SubscriptionHandle,
}

impl UserChannel {
    pub fn open(context: &SystemContext, user_id: &str) -> Self {
        let capacity = context.config().bus.channel_capacity;
        let (tx, rx) = mpsc::channel(capacity);
        let subjects = context.subjects();
        let response_sub = context
            .bus()
            .subscribe_sender(&subjects.response_for(user_id), tx.clone())
            .unwrap();
        let lifecycle_sub = context
            .bus()
            .subscribe_sender(&subjects.lifecycle_for(user_id), tx)
            .unwrap();
        Self {
            rx,
            _response_sub: response_sub,
            _lifecycle_sub: lifecycle_sub,
        }
    }

    /// Next delivery or panic after the default timeout
    pub async fn recv(&mut self) -> Delivery {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel closed")
    }

    /// Assert silence on the channel for `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(delivery)) =
            tokio::time::timeout(window, self.rx.recv()).await
        {
            panic!("expected silence, got {}", delivery.envelope.body.tag());
        }
    }
}

/// Poll the task's latest run until `predicate` accepts it, returning the
/// accepted run; panics when the timeout elapses first
pub async fn wait_for_run(
    gateway: &PersistenceGateway,
    task_id: Uuid,
    timeout: Duration,
    predicate: impl Fn(&TaskRun) -> bool,
) -> TaskRun {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(run)) = gateway.latest_task_run(task_id).await {
            if predicate(&run) {
                return run;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task run condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
