//! # Event Envelopes
//!
//! The in-memory record traversing the bus: a header identifying the
//! user/thread/task/connection the event belongs to, trace metadata, a
//! typed body, and an optional error string.
//!
//! The body is a single tagged union discriminated by a `type` field. The
//! serde tag registry is the complete mapping from discriminator to body
//! shape; an unknown tag fails deserialization and is handled as a
//! protocol violation by the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ThreadMessage;

/// Routing header; determines the per-user subject an envelope targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
}

impl EventHeader {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: None,
            task_id: None,
            connection_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Uuid) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_connection(mut self, connection_id: Uuid) -> Self {
        self.connection_id = Some(connection_id);
        self
    }
}

/// Trace metadata stamped on every envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub trace_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}

/// A client message as submitted on the bidirectional session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub role: String,
    pub content: serde_json::Value,
}

/// Typed envelope body, discriminated by `type`
///
/// Three families share the registry: command bodies the core consumes or
/// publishes, lifecycle bodies the core emits to clients, and content
/// bodies produced by the agent runtime which the core forwards verbatim.
/// Content bodies carry the client-facing `provider` field; lifecycle
/// bodies never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    // ------------------------------------------------------------------
    // Command bodies
    // ------------------------------------------------------------------
    /// Client request to run an agent on a thread
    TaskExecute {
        agent_id: Uuid,
        messages: Vec<InboundMessage>,
    },
    /// Instruction to the agent runtime to run one agent turn
    AgentInvoke {
        agent_id: Uuid,
        recipient_id: String,
        messages: Vec<ThreadMessage>,
    },
    /// Request from a running agent to hand control to a sub-agent
    TaskHandoff {
        agent_id: Uuid,
        handoff_agent_id: Uuid,
        /// Tool-run identifier; doubles as the sub-task identifier
        tool_run_id: Uuid,
        messages: Vec<serde_json::Value>,
    },
    /// Terminal assistant turn reported by the agent runtime
    TaskFinish {
        agent_id: Uuid,
        recipient_id: String,
        response: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        citations: Option<serde_json::Value>,
    },
    /// Tool result fed back into a suspended parent agent loop
    ToolGather {
        tool_run_id: Uuid,
        content: String,
        result_type: String,
        is_error: bool,
    },

    // ------------------------------------------------------------------
    // Lifecycle bodies
    // ------------------------------------------------------------------
    TaskStart {
        task_id: Uuid,
        thread_id: Uuid,
    },
    TaskStop {
        task_id: Uuid,
        thread_id: Uuid,
    },
    SubTaskStart {
        task_id: Uuid,
        thread_id: Uuid,
    },
    SubTaskStop {
        task_id: Uuid,
        thread_id: Uuid,
    },
    TaskError {
        error: String,
    },

    // ------------------------------------------------------------------
    // Content bodies (agent runtime produced; forwarded, never inspected
    // beyond the tag)
    // ------------------------------------------------------------------
    MessageStart {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    MessageDelta {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    MessageStop {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    ContentBlockStart {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    ContentBlockDelta {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    ContentBlockStop {
        provider: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
}

impl EventBody {
    /// The wire discriminator for this body
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TaskExecute { .. } => "task_execute",
            Self::AgentInvoke { .. } => "agent_invoke",
            Self::TaskHandoff { .. } => "task_handoff",
            Self::TaskFinish { .. } => "task_finish",
            Self::ToolGather { .. } => "tool_gather",
            Self::TaskStart { .. } => "task_start",
            Self::TaskStop { .. } => "task_stop",
            Self::SubTaskStart { .. } => "sub_task_start",
            Self::SubTaskStop { .. } => "sub_task_stop",
            Self::TaskError { .. } => "task_error",
            Self::MessageStart { .. } => "message_start",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop { .. } => "message_stop",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
        }
    }

    /// Whether this body is task- or sub-task-scoped lifecycle
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::TaskStart { .. }
                | Self::TaskStop { .. }
                | Self::SubTaskStart { .. }
                | Self::SubTaskStop { .. }
                | Self::TaskError { .. }
        )
    }
}

/// Record traversing the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub header: EventHeader,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventEnvelope {
    pub fn new(header: EventHeader, body: EventBody) -> Self {
        Self {
            header,
            metadata: EventMetadata::default(),
            body,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A subscribed envelope together with the subject it arrived on
///
/// Subscribers that merge several subscriptions into one channel classify
/// deliveries by subject, so the subject travels with the envelope.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub envelope: EventEnvelope,
}
