//! # Threads and Thread Messages
//!
//! A thread is the container for a conversation; messages are its immutable
//! units of content, insertion-ordered by creation time (message id breaks
//! ties for rows created in the same instant).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WeaveError;

/// Conversation container, owned by a user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thread {
    pub thread_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Build a new thread row with generated id and current timestamps
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Who authored a thread message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    Assistant,
    System,
    Result,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderKind {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "result" => Ok(Self::Result),
            other => Err(WeaveError::Protocol(format!(
                "unknown sender kind: {other}"
            ))),
        }
    }
}

/// Immutable unit of conversation content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    /// Opaque JSON payload (role/content shape is owned by the transports
    /// and agent runtimes, not by the core)
    pub message: serde_json::Value,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_kind: SenderKind,
    pub stop_reason: Option<String>,
    pub citations: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    /// Build a new message row with generated id and current timestamp
    pub fn new(
        thread_id: Uuid,
        message: serde_json::Value,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        sender_kind: SenderKind,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            thread_id,
            message,
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            sender_kind,
            stop_reason: None,
            citations: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a stop reason (builder style)
    pub fn with_stop_reason(mut self, stop_reason: impl Into<String>) -> Self {
        self.stop_reason = Some(stop_reason.into());
        self
    }

    /// Attach citations (builder style)
    pub fn with_citations(mut self, citations: serde_json::Value) -> Self {
        self.citations = Some(citations);
        self
    }
}
