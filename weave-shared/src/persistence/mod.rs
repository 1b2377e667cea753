//! # Persistence Gateway
//!
//! Typed operations the orchestrator needs on threads, thread messages,
//! tasks, and task runs. The gateway wraps a `StoreProvider` (enum) — the
//! same dispatch pattern as the message bus — so the scenario tests run
//! against the in-memory store with identical semantics to Postgres.
//!
//! Two operations carry extra guarantees:
//!
//! - `advance_task_run` performs the status transition and the loop-counter
//!   increment as one atomic statement keyed by `task_run_id`.
//! - Terminal statuses are sticky: a transition attempt against a FINISHED
//!   or FAILED run is a no-op, never an error and never a write.
//!
//! Errors surface as two kinds: `NotFound` (callers map it to a task-abort
//! path) and `Database` (callers map it to FAILED).

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::WeaveResult;
use crate::models::{Agent, RunStatus, Task, TaskRun, Thread, ThreadMessage};
use memory::MemoryStore;
use postgres::PostgresStore;

/// Storage backend, enum dispatch
#[derive(Debug)]
pub enum StoreProvider {
    Postgres(PostgresStore),
    InMemory(MemoryStore),
}

/// Shared handle for all persistence operations
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    provider: Arc<StoreProvider>,
}

macro_rules! delegate {
    ($self:ident, $store:ident => $body:expr) => {
        match $self.provider.as_ref() {
            StoreProvider::Postgres($store) => $body,
            StoreProvider::InMemory($store) => $body,
        }
    };
}

impl PersistenceGateway {
    pub fn new(provider: Arc<StoreProvider>) -> Self {
        Self { provider }
    }

    /// Gateway over a Postgres pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::new(Arc::new(StoreProvider::Postgres(PostgresStore::new(pool))))
    }

    /// Gateway over the in-memory store (tests, local development)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(StoreProvider::InMemory(MemoryStore::new())))
    }

    pub fn provider_name(&self) -> &'static str {
        match self.provider.as_ref() {
            StoreProvider::Postgres(_) => "postgres",
            StoreProvider::InMemory(_) => "in_memory",
        }
    }

    // ------------------------------------------------------------------
    // Threads & messages
    // ------------------------------------------------------------------

    pub async fn create_thread(&self, thread: &Thread) -> WeaveResult<()> {
        delegate!(self, store => store.create_thread(thread).await)
    }

    pub async fn get_thread(&self, thread_id: Uuid) -> WeaveResult<Thread> {
        delegate!(self, store => store.get_thread(thread_id).await)
    }

    pub async fn update_thread_title(&self, thread_id: Uuid, title: &str) -> WeaveResult<()> {
        delegate!(self, store => store.update_thread_title(thread_id, title).await)
    }

    /// Delete a thread; messages, tasks, and runs cascade
    pub async fn delete_thread(&self, thread_id: Uuid) -> WeaveResult<()> {
        delegate!(self, store => store.delete_thread(thread_id).await)
    }

    /// Append a message; fails NotFound if the thread does not exist
    pub async fn append_message(&self, message: &ThreadMessage) -> WeaveResult<()> {
        delegate!(self, store => store.append_message(message).await)
    }

    /// All messages in a thread, insertion-ordered
    pub async fn messages_for_thread(&self, thread_id: Uuid) -> WeaveResult<Vec<ThreadMessage>> {
        delegate!(self, store => store.messages_for_thread(thread_id).await)
    }

    /// Messages exchanged between a sender/recipient pair in a thread,
    /// insertion-ordered; the pair is symmetric so a just-appended
    /// user→agent message shows up in the agent↔user history
    pub async fn messages_between(
        &self,
        thread_id: Uuid,
        party_a: &str,
        party_b: &str,
    ) -> WeaveResult<Vec<ThreadMessage>> {
        delegate!(self, store => store.messages_between(thread_id, party_a, party_b).await)
    }

    // ------------------------------------------------------------------
    // Tasks & runs
    // ------------------------------------------------------------------

    pub async fn create_task(&self, task: &Task) -> WeaveResult<()> {
        delegate!(self, store => store.create_task(task).await)
    }

    pub async fn get_task(&self, task_id: Uuid) -> WeaveResult<Task> {
        delegate!(self, store => store.get_task(task_id).await)
    }

    pub async fn create_task_run(&self, run: &TaskRun) -> WeaveResult<()> {
        delegate!(self, store => store.create_task_run(run).await)
    }

    /// The task's current non-terminal run, if any
    pub async fn current_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        delegate!(self, store => store.current_task_run(task_id).await)
    }

    /// The task's most recently created run regardless of status
    pub async fn latest_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        delegate!(self, store => store.latest_task_run(task_id).await)
    }

    /// Set a run's status; sticky no-op if the run is already terminal
    pub async fn update_task_run_status(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<()> {
        delegate!(self, store => store.update_task_run_status(task_run_id, status).await)
    }

    /// Atomically set status and increment the loop counter, returning the
    /// updated run; sticky no-op (returning the unchanged run) if terminal
    pub async fn advance_task_run(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<TaskRun> {
        delegate!(self, store => store.advance_task_run(task_run_id, status).await)
    }

    /// Overwrite a run's loop counter (REST execute may seed it)
    pub async fn set_task_run_loops(&self, task_run_id: Uuid, loops: i32) -> WeaveResult<()> {
        delegate!(self, store => store.set_task_run_loops(task_run_id, loops).await)
    }

    // ------------------------------------------------------------------
    // Agents (read-side projection of the external CRUD surface)
    // ------------------------------------------------------------------

    pub async fn register_agent(&self, agent: &Agent) -> WeaveResult<()> {
        delegate!(self, store => store.register_agent(agent).await)
    }

    pub async fn agent_exists(&self, agent_id: Uuid) -> WeaveResult<bool> {
        delegate!(self, store => store.agent_exists(agent_id).await)
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    pub async fn health_check(&self) -> bool {
        delegate!(self, store => store.health_check().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::models::SenderKind;

    #[tokio::test]
    async fn test_thread_and_message_round_trip() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "test thread");
        gateway.create_thread(&thread).await.unwrap();

        let fetched = gateway.get_thread(thread.thread_id).await.unwrap();
        assert_eq!(fetched.title, "test thread");

        let msg = ThreadMessage::new(
            thread.thread_id,
            json!({"role": "user", "content": "hi"}),
            "admin",
            "agent-a",
            SenderKind::User,
        );
        gateway.append_message(&msg).await.unwrap();

        let history = gateway.messages_for_thread(thread.thread_id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_missing_thread_is_not_found() {
        let gateway = PersistenceGateway::in_memory();
        let msg = ThreadMessage::new(
            Uuid::new_v4(),
            json!({}),
            "admin",
            "agent-a",
            SenderKind::User,
        );
        let err = gateway.append_message(&msg).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pair_history_is_symmetric_and_ordered() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "t");
        gateway.create_thread(&thread).await.unwrap();

        for (sender, recipient, text) in [
            ("admin", "agent-a", "question"),
            ("agent-a", "admin", "answer"),
            ("admin", "agent-b", "other pair"),
        ] {
            let msg = ThreadMessage::new(
                thread.thread_id,
                json!({"content": text}),
                sender,
                recipient,
                SenderKind::User,
            );
            gateway.append_message(&msg).await.unwrap();
        }

        let pair = gateway
            .messages_between(thread.thread_id, "agent-a", "admin")
            .await
            .unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[0].message["content"], "question");
        assert_eq!(pair[1].message["content"], "answer");
    }

    #[tokio::test]
    async fn test_advance_is_atomic_increment_plus_status() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "t");
        gateway.create_thread(&thread).await.unwrap();
        let task = Task::new(thread.thread_id, 20, "admin");
        gateway.create_task(&task).await.unwrap();
        let run = TaskRun::new(task.task_id);
        gateway.create_task_run(&run).await.unwrap();

        let advanced = gateway
            .advance_task_run(run.task_run_id, RunStatus::Running)
            .await
            .unwrap();
        assert_eq!(advanced.status, RunStatus::Running);
        assert_eq!(advanced.current_loops, 1);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "t");
        gateway.create_thread(&thread).await.unwrap();
        let task = Task::new(thread.thread_id, 20, "admin");
        gateway.create_task(&task).await.unwrap();
        let run = TaskRun::new(task.task_id);
        gateway.create_task_run(&run).await.unwrap();

        gateway
            .update_task_run_status(run.task_run_id, RunStatus::Finished)
            .await
            .unwrap();
        gateway
            .update_task_run_status(run.task_run_id, RunStatus::Failed)
            .await
            .unwrap();

        // Terminal run no longer shows up as current, and kept FINISHED
        assert!(gateway
            .current_task_run(task.task_id)
            .await
            .unwrap()
            .is_none());
        let advanced = gateway
            .advance_task_run(run.task_run_id, RunStatus::Running)
            .await
            .unwrap();
        assert_eq!(advanced.status, RunStatus::Finished);
        assert_eq!(advanced.current_loops, 0);
    }

    #[tokio::test]
    async fn test_current_run_skips_terminal() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "t");
        gateway.create_thread(&thread).await.unwrap();
        let task = Task::new(thread.thread_id, 20, "admin");
        gateway.create_task(&task).await.unwrap();

        let first = TaskRun::new(task.task_id);
        gateway.create_task_run(&first).await.unwrap();
        gateway
            .update_task_run_status(first.task_run_id, RunStatus::Failed)
            .await
            .unwrap();

        let second = TaskRun::new(task.task_id);
        gateway.create_task_run(&second).await.unwrap();

        let current = gateway.current_task_run(task.task_id).await.unwrap();
        assert_eq!(current.unwrap().task_run_id, second.task_run_id);
    }

    #[tokio::test]
    async fn test_delete_thread_cascades() {
        let gateway = PersistenceGateway::in_memory();
        let thread = Thread::new("admin", "t");
        gateway.create_thread(&thread).await.unwrap();
        let task = Task::new(thread.thread_id, 20, "admin");
        gateway.create_task(&task).await.unwrap();
        let run = TaskRun::new(task.task_id);
        gateway.create_task_run(&run).await.unwrap();

        gateway.delete_thread(thread.thread_id).await.unwrap();

        assert!(gateway.get_thread(thread.thread_id).await.is_err());
        assert!(gateway.get_task(task.task_id).await.is_err());
        assert!(gateway
            .current_task_run(task.task_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_agent_existence() {
        let gateway = PersistenceGateway::in_memory();
        let agent = Agent::new(Uuid::new_v4(), "researcher");
        gateway.register_agent(&agent).await.unwrap();

        assert!(gateway.agent_exists(agent.agent_id).await.unwrap());
        assert!(!gateway.agent_exists(Uuid::new_v4()).await.unwrap());
    }
}
