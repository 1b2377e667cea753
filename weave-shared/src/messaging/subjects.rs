//! # Subject Registry
//!
//! Derives per-user subjects from configured bases and validates subject
//! strings. Separating subject derivation from bus operations keeps naming
//! conventions in one place, so a deployment can re-map them without
//! touching any handler.
//!
//! Subjects are dotted strings. Subscriptions may use `*` to match exactly
//! one token and a trailing `>` to match one or more remaining tokens;
//! publish subjects must be literal.

use crate::config::BusConfig;
use crate::error::{WeaveError, WeaveResult};

/// Maximum subject length accepted by the facade
const MAX_SUBJECT_LEN: usize = 255;

/// Validate a subject or subscription pattern
///
/// Rules: non-empty dotted tokens of `[A-Za-z0-9_-]`, `*` only as a whole
/// token, `>` only as the final token.
pub fn validate_subject(subject: &str) -> WeaveResult<()> {
    if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
        return Err(WeaveError::Messaging(format!(
            "invalid subject length: {:?}",
            subject
        )));
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        match *token {
            "" => {
                return Err(WeaveError::Messaging(format!(
                    "empty token in subject: {subject:?}"
                )))
            }
            ">" if i + 1 != tokens.len() => {
                return Err(WeaveError::Messaging(format!(
                    "'>' must be the final token: {subject:?}"
                )))
            }
            ">" | "*" => {}
            literal => {
                if !literal
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(WeaveError::Messaging(format!(
                        "invalid character in subject token {literal:?}"
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Token-wise subject match for subscription patterns
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Per-user subject derivation from configured bases
#[derive(Debug, Clone)]
pub struct Subjects {
    response_base: String,
    lifecycle_base: String,
    agent_invoke_base: String,
    tool_gather_base: String,
    handoff_base: String,
    execute_base: String,
    finish_base: String,
}

impl Subjects {
    pub fn from_config(config: &BusConfig) -> Self {
        Self {
            response_base: config.response_base.clone(),
            lifecycle_base: config.lifecycle_base.clone(),
            agent_invoke_base: config.agent_invoke_base.clone(),
            tool_gather_base: config.tool_gather_base.clone(),
            handoff_base: config.handoff_base.clone(),
            execute_base: config.execute_base.clone(),
            finish_base: config.finish_base.clone(),
        }
    }

    // ---------------------------------------------------------------
    // Per-user subjects (publish targets)
    // ---------------------------------------------------------------

    /// Websocket/event-stream response fan-out for a user
    pub fn response_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.response_base, user_id)
    }

    /// Task lifecycle events for a user
    pub fn lifecycle_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.lifecycle_base, user_id)
    }

    /// Agent invocation requests scoped to a user
    pub fn agent_invoke_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.agent_invoke_base, user_id)
    }

    /// Tool-gather results scoped to a user
    pub fn tool_gather_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.tool_gather_base, user_id)
    }

    /// Handoff requests scoped to a user
    pub fn handoff_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.handoff_base, user_id)
    }

    /// Execute requests scoped to a user
    pub fn execute_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.execute_base, user_id)
    }

    /// Finish notifications scoped to a user
    pub fn finish_for(&self, user_id: &str) -> String {
        format!("{}.{}", self.finish_base, user_id)
    }

    // ---------------------------------------------------------------
    // Wildcard patterns (orchestrator worker subscriptions)
    // ---------------------------------------------------------------

    pub fn execute_wildcard(&self) -> String {
        format!("{}.>", self.execute_base)
    }

    pub fn handoff_wildcard(&self) -> String {
        format!("{}.>", self.handoff_base)
    }

    pub fn finish_wildcard(&self) -> String {
        format!("{}.>", self.finish_base)
    }

    pub fn agent_invoke_wildcard(&self) -> String {
        format!("{}.>", self.agent_invoke_base)
    }

    // ---------------------------------------------------------------
    // Classification (session forwarders)
    // ---------------------------------------------------------------

    /// Whether a delivery subject belongs to the task-lifecycle family
    pub fn is_lifecycle_subject(&self, subject: &str) -> bool {
        subject.contains(&self.lifecycle_base)
    }

    /// Whether a delivery subject belongs to the response family
    pub fn is_response_subject(&self, subject: &str) -> bool {
        subject.contains(&self.response_base)
    }
}

impl Default for Subjects {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}
