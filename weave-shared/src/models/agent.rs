//! # Agents
//!
//! Minimal projection of the agent registry. The orchestration core only
//! consults it for the handoff existence check; full agent CRUD lives
//! outside this system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered agent, as the core sees it
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub agent_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(agent_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            agent_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
