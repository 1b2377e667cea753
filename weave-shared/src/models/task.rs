//! # Tasks
//!
//! A task is a persisted intent to run an agent against a thread,
//! parameterized by a bounded request-loop count. Sub-agent handoff creates
//! a task whose `parent_task_id` points at the suspended invoker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted intent to run an agent against a thread
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub task_id: Uuid,
    pub thread_id: Uuid,
    /// Upper bound on request loops; a run reaching it suspends as PENDING
    pub max_request_loop: i32,
    /// Set for sub-tasks created by handoff; the parent suspends while the
    /// sub-task runs
    pub parent_task_id: Option<Uuid>,
    pub created_by: String,
    /// Opaque metadata payload
    pub additional_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new top-level task with generated id
    pub fn new(thread_id: Uuid, max_request_loop: i32, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            thread_id,
            max_request_loop,
            parent_task_id: None,
            created_by: created_by.into(),
            additional_info: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a sub-task with a caller-supplied identifier (the tool-run id)
    /// and a parent pointer
    pub fn new_sub_task(
        task_id: Uuid,
        thread_id: Uuid,
        parent_task_id: Uuid,
        max_request_loop: i32,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            thread_id,
            max_request_loop,
            parent_task_id: Some(parent_task_id),
            created_by: created_by.into(),
            additional_info: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this task was created by a handoff
    pub fn is_sub_task(&self) -> bool {
        self.parent_task_id.is_some()
    }
}
