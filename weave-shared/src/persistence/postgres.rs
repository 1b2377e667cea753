//! # Postgres Store
//!
//! Production storage backend. Enum-valued columns are stored as TEXT and
//! parsed through the model `FromStr` impls; foreign-key violations and
//! missing rows map to `NotFound`, everything else to `Database`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{WeaveError, WeaveResult};
use crate::models::{Agent, RunStatus, Task, TaskRun, Thread, ThreadMessage};

/// Postgres storage backend
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Raw thread_messages row; `sender_kind` parsed after fetch
#[derive(Debug, sqlx::FromRow)]
struct ThreadMessageRow {
    message_id: Uuid,
    thread_id: Uuid,
    message: serde_json::Value,
    sender_id: String,
    recipient_id: String,
    sender_kind: String,
    stop_reason: Option<String>,
    citations: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<ThreadMessageRow> for ThreadMessage {
    type Error = WeaveError;

    fn try_from(row: ThreadMessageRow) -> Result<Self, Self::Error> {
        Ok(ThreadMessage {
            message_id: row.message_id,
            thread_id: row.thread_id,
            message: row.message,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            sender_kind: row.sender_kind.parse()?,
            stop_reason: row.stop_reason,
            citations: row.citations,
            created_at: row.created_at,
        })
    }
}

/// Raw task_runs row; `status` parsed after fetch
#[derive(Debug, sqlx::FromRow)]
struct TaskRunRow {
    task_run_id: Uuid,
    task_id: Uuid,
    status: String,
    current_loops: i32,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TaskRunRow> for TaskRun {
    type Error = WeaveError;

    fn try_from(row: TaskRunRow) -> Result<Self, Self::Error> {
        Ok(TaskRun {
            task_run_id: row.task_run_id,
            task_id: row.task_id,
            status: row.status.parse()?,
            current_loops: row.current_loops,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map a write error, turning FK violations into NotFound on the
/// referenced entity
fn map_fk(err: sqlx::Error, resource: &'static str, id: Uuid) -> WeaveError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_foreign_key_violation() {
            return WeaveError::not_found(resource, id);
        }
    }
    err.into()
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_thread(&self, thread: &Thread) -> WeaveResult<()> {
        sqlx::query(
            "INSERT INTO threads (thread_id, user_id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(thread.thread_id)
        .bind(&thread.user_id)
        .bind(&thread.title)
        .bind(thread.created_at)
        .bind(thread.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_thread(&self, thread_id: Uuid) -> WeaveResult<Thread> {
        sqlx::query_as::<_, Thread>(
            "SELECT thread_id, user_id, title, created_at, updated_at
             FROM threads WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WeaveError::not_found("thread", thread_id))
    }

    pub async fn update_thread_title(&self, thread_id: Uuid, title: &str) -> WeaveResult<()> {
        let result = sqlx::query(
            "UPDATE threads SET title = $2, updated_at = now() WHERE thread_id = $1",
        )
        .bind(thread_id)
        .bind(title)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WeaveError::not_found("thread", thread_id));
        }
        Ok(())
    }

    pub async fn delete_thread(&self, thread_id: Uuid) -> WeaveResult<()> {
        let result = sqlx::query("DELETE FROM threads WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WeaveError::not_found("thread", thread_id));
        }
        Ok(())
    }

    pub async fn append_message(&self, message: &ThreadMessage) -> WeaveResult<()> {
        sqlx::query(
            "INSERT INTO thread_messages
               (message_id, thread_id, message, sender_id, recipient_id,
                sender_kind, stop_reason, citations, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(message.message_id)
        .bind(message.thread_id)
        .bind(&message.message)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(message.sender_kind.as_str())
        .bind(&message.stop_reason)
        .bind(&message.citations)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_fk(e, "thread", message.thread_id))?;
        Ok(())
    }

    pub async fn messages_for_thread(&self, thread_id: Uuid) -> WeaveResult<Vec<ThreadMessage>> {
        let rows = sqlx::query_as::<_, ThreadMessageRow>(
            "SELECT message_id, thread_id, message, sender_id, recipient_id,
                    sender_kind, stop_reason, citations, created_at
             FROM thread_messages
             WHERE thread_id = $1
             ORDER BY created_at, message_id",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn messages_between(
        &self,
        thread_id: Uuid,
        party_a: &str,
        party_b: &str,
    ) -> WeaveResult<Vec<ThreadMessage>> {
        let rows = sqlx::query_as::<_, ThreadMessageRow>(
            "SELECT message_id, thread_id, message, sender_id, recipient_id,
                    sender_kind, stop_reason, citations, created_at
             FROM thread_messages
             WHERE thread_id = $1
               AND ((sender_id = $2 AND recipient_id = $3)
                 OR (sender_id = $3 AND recipient_id = $2))
             ORDER BY created_at, message_id",
        )
        .bind(thread_id)
        .bind(party_a)
        .bind(party_b)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn create_task(&self, task: &Task) -> WeaveResult<()> {
        sqlx::query(
            "INSERT INTO tasks
               (task_id, thread_id, max_request_loop, parent_task_id,
                created_by, additional_info, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(task.task_id)
        .bind(task.thread_id)
        .bind(task.max_request_loop)
        .bind(task.parent_task_id)
        .bind(&task.created_by)
        .bind(&task.additional_info)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_fk(e, "thread", task.thread_id))?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> WeaveResult<Task> {
        sqlx::query_as::<_, Task>(
            "SELECT task_id, thread_id, max_request_loop, parent_task_id,
                    created_by, additional_info, created_at, updated_at
             FROM tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WeaveError::not_found("task", task_id))
    }

    pub async fn create_task_run(&self, run: &TaskRun) -> WeaveResult<()> {
        sqlx::query(
            "INSERT INTO task_runs
               (task_run_id, task_id, status, current_loops, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(run.task_run_id)
        .bind(run.task_id)
        .bind(run.status.as_str())
        .bind(run.current_loops)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_fk(e, "task", run.task_id))?;
        Ok(())
    }

    pub async fn current_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        let row = sqlx::query_as::<_, TaskRunRow>(
            "SELECT task_run_id, task_id, status, current_loops, created_at, updated_at
             FROM task_runs
             WHERE task_id = $1 AND status NOT IN ('FINISHED', 'FAILED')
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn latest_task_run(&self, task_id: Uuid) -> WeaveResult<Option<TaskRun>> {
        let row = sqlx::query_as::<_, TaskRunRow>(
            "SELECT task_run_id, task_id, status, current_loops, created_at, updated_at
             FROM task_runs
             WHERE task_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn update_task_run_status(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<()> {
        let result = sqlx::query(
            "UPDATE task_runs SET status = $2, updated_at = now()
             WHERE task_run_id = $1 AND status NOT IN ('FINISHED', 'FAILED')",
        )
        .bind(task_run_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a sticky terminal run from a missing one
            self.get_task_run(task_run_id).await?;
        }
        Ok(())
    }

    pub async fn advance_task_run(
        &self,
        task_run_id: Uuid,
        status: RunStatus,
    ) -> WeaveResult<TaskRun> {
        let row = sqlx::query_as::<_, TaskRunRow>(
            "UPDATE task_runs
             SET status = $2, current_loops = current_loops + 1, updated_at = now()
             WHERE task_run_id = $1 AND status NOT IN ('FINISHED', 'FAILED')
             RETURNING task_run_id, task_id, status, current_loops, created_at, updated_at",
        )
        .bind(task_run_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            // Terminal runs are left untouched; return the current row
            None => self.get_task_run(task_run_id).await,
        }
    }

    pub async fn set_task_run_loops(&self, task_run_id: Uuid, loops: i32) -> WeaveResult<()> {
        let result = sqlx::query(
            "UPDATE task_runs SET current_loops = $2, updated_at = now()
             WHERE task_run_id = $1",
        )
        .bind(task_run_id)
        .bind(loops)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WeaveError::not_found("task run", task_run_id));
        }
        Ok(())
    }

    async fn get_task_run(&self, task_run_id: Uuid) -> WeaveResult<TaskRun> {
        let row = sqlx::query_as::<_, TaskRunRow>(
            "SELECT task_run_id, task_id, status, current_loops, created_at, updated_at
             FROM task_runs WHERE task_run_id = $1",
        )
        .bind(task_run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WeaveError::not_found("task run", task_run_id))?;
        row.try_into()
    }

    pub async fn register_agent(&self, agent: &Agent) -> WeaveResult<()> {
        sqlx::query(
            "INSERT INTO agents (agent_id, name, created_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (agent_id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(agent.agent_id)
        .bind(&agent.name)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn agent_exists(&self, agent_id: Uuid) -> WeaveResult<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT agent_id FROM agents WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
