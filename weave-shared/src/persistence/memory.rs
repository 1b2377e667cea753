//! # In-Memory Store
//!
//! Hash-map backed store with the same semantics as the Postgres provider.
//! Backs the orchestration scenario tests and broker-less local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{WeaveError, WeaveResult};
use crate::models::{Agent, RunStatus, Task, TaskRun, Thread, ThreadMessage};

#[derive(Debug, Default)]
struct MemoryInner {
    threads: HashMap<Uuid, Thread>,
    /// Append-only; insertion order is the source of message ordering
    messages: Vec<ThreadMessage>,
    tasks: HashMap<Uuid, Task>,
    runs: HashMap<Uuid, TaskRun>,
    /// Creation order of runs, for current-run resolution
    run_order: Vec<Uuid>,
    agents: HashMap<Uuid, Agent>,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn create_thread(&self, thread: &Thread) -> WeaveResult<()> {
        self.lock().threads.insert(thread.thread_id, thread.clone());
        Ok(())
    }

    pub async fn get_thread(&self, thread_id: Uuid) -> WeaveResult<Thread> {
        self.lock()
            .threads
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| WeaveError::not_found("thread", thread_id))
    }

    pub async fn update_thread_title(&self, thread_id: Uuid, title: &str) -> WeaveResult<()> {
        let mut inner = self.lock();
        let thread = inner
            .threads
            .get_mut(&thread_id)
            .ok_or_else(|| WeaveError::not_found("thread", thread_id))?;
        thread.title = title.to_string();
        thread.updated_at = Utc::now();
        Ok(())
    }

    pub async fn delete_thread(&self, thread_id: Uuid) -> WeaveResult<()> {
        let mut inner = self.lock();
        if inner.threads.remove(&thread_id).is_none() {
            return Err(WeaveError::not_found("thread", thread_id));
        }
        inner.messages.retain(|m| m.thread_id != thread_id);
        let doomed_tasks: Vec<Uuid> = inner
            .tasks
            .values()
            .filter(|t| t.thread_id == thread_id)
            .map(|t| t.task_id)
            .collect();
        for task_id in &doomed_tasks {
            inner.tasks.remove(task_id);
        }
        inner
            .runs
            .retain(|_, run| !doomed_tasks.contains(&run.task_id));
        let live_runs: Vec<Uuid> = inner.runs.keys().copied().collect();
        inner.run_order.retain(|id| live_runs.contains(id));
        Ok(())
    }

    pub async fn append_message(&self, message: &ThreadMessage) -> WeaveResult<()> {
        let mut inner = self.lock();
        if !inner.threads.contains_key(&message.thread_id) {
            return Err(WeaveError::not_found("thread", message.thread_id));
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    pub async fn messages_for_thread(&self, thread_id: Uuid) -> WeaveResult<Vec<ThreadMessage>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect())
    }

    pub async fn messages_between(
        &self,
        thread_id: Uuid,
        party_a: &str,
        party_b: &str,
    ) -> WeaveResult<Vec<ThreadMessage>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| {
                m.thread_id == thread_id
                    && ((m.sender_id == party_a && m.recipient_id == party_b)
                        || (m.sender_id == party_b && m.recipient_id == party_a))
            })
            .cloned()
            .collect())
    }

    pub async fn create_task(&self, task: &Task) -> WeaveResult<()> {
        let mut inner = self.lock();
        if !inner.threads.contains_key(&task.thread_id) {
            return Err(WeaveError::not_found("thread", task.thread_id));
        }
        if let Some(parent_id) = task.parent_task_id {
            if !inner.tasks.contains_key(&parent_id) {
                return Err(WeaveError::not_found("task", parent_id));
            }
        }
        inner.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> WeaveResult<Task> {
        self.lock()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| WeaveError::not_found("task", task_id))
    }

    pub async fn create_task_run(&self, run: &TaskRun) -> WeaveResult<()> {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&run.task_id) {
            return Err(WeaveError::not_found("task", run.task_id));
        }
        inner.runs.insert(run.task_run_id, run.clone());
        inner.run_order.push(run.task_run_id);
        Ok(())
    }

    pub async fn current_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        let inner = self.lock();
        Ok(inner
            .run_order
            .iter()
            .rev()
            .filter_map(|id| inner.runs.get(id))
            .find(|run| run.task_id == task_id && !run.status.is_terminal())
            .cloned())
    }

    pub async fn latest_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        let inner = self.lock();
        Ok(inner
            .run_order
            .iter()
            .rev()
            .filter_map(|id| inner.runs.get(id))
            .find(|run| run.task_id == task_id)
            .cloned())
    }

    pub async fn update_task_run_status(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<()> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&task_run_id)
            .ok_or_else(|| WeaveError::not_found("task run", task_run_id))?;
        if run.status.is_terminal() {
            return Ok(());
        }
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    pub async fn advance_task_run(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<TaskRun> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&task_run_id)
            .ok_or_else(|| WeaveError::not_found("task run", task_run_id))?;
        if !run.status.is_terminal() {
            run.status = status;
            run.current_loops += 1;
            run.updated_at = Utc::now();
        }
        Ok(run.clone())
    }

    pub async fn set_task_run_loops(&self, task_run_id: Uuid, loops: i32) -> WeaveResult<()> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&task_run_id)
            .ok_or_else(|| WeaveError::not_found("task run", task_run_id))?;
        run.current_loops = loops;
        run.updated_at = Utc::now();
        Ok(())
    }

    pub async fn register_agent(&self, agent: &Agent) -> WeaveResult<()> {
        self.lock().agents.insert(agent.agent_id, agent.clone());
        Ok(())
    }

    pub async fn agent_exists(&self, agent_id: Uuid) -> WeaveResult<bool> {
        Ok(self.lock().agents.contains_key(&agent_id))
    }

    pub async fn health_check(&self) -> bool {
        true
    }
}
