//! # Task Runs
//!
//! One attempt at satisfying a task. A run holds the live status and the
//! loop counter; at most one run per task is non-terminal at any time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WeaveError;

/// Task-run status
///
/// ```text
/// SCHEDULED ──execute──▶ RUNNING ──finish(top)──▶ FINISHED
///                        │  ▲
///                        │  └─finish(sub)── (parent resumes)
///                        ├─loops at cap────▶ PENDING
///                        └─error──────────▶ FAILED
/// ```
///
/// `FINISHED` and `FAILED` are sticky: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Scheduled,
    Pending,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            other => Err(WeaveError::Protocol(format!(
                "unknown task run status: {other}"
            ))),
        }
    }
}

/// One attempt at executing a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_run_id: Uuid,
    pub task_id: Uuid,
    pub status: RunStatus,
    pub current_loops: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRun {
    /// Build a fresh SCHEDULED run for a task
    pub fn new(task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            task_run_id: Uuid::new_v4(),
            task_id,
            status: RunStatus::Scheduled,
            current_loops: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
