//! # Core Domain Models
//!
//! Entities persisted by the orchestration core: conversation threads and
//! their messages, tasks, and task runs. All identifiers are `Uuid`.

pub mod agent;
pub mod task;
pub mod task_run;
pub mod thread;

pub use agent::Agent;
pub use task::Task;
pub use task_run::{RunStatus, TaskRun};
pub use thread::{SenderKind, Thread, ThreadMessage};
