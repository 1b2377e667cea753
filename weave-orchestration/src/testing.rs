//! # Scripted Agent Runtime
//!
//! Test stand-in for the external agent runtime: consumes agent-invoke
//! envelopes and streams a scripted assistant turn back over the response
//! subject with the full content bracketing, then reports the terminal
//! turn on the finish subject. Used by the scenario tests; not part of the
//! production surface.

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use weave_shared::messaging::{EventBody, EventEnvelope, EventHeader};
use weave_shared::{SystemContext, WeaveResult};

/// What the scripted runtime does with each invocation
#[derive(Debug, Clone)]
pub enum AgentScript {
    /// Stream `text` as one bracketed assistant turn, then finish
    Respond { text: String },
    /// Consume invocations without responding (streams that must idle)
    Silent,
}

/// Spawn the scripted runtime; it runs until `cancel` fires
pub fn spawn_scripted_runtime(
    context: SystemContext,
    cancel: CancellationToken,
    script: AgentScript,
) -> WeaveResult<JoinHandle<()>> {
    let mut subscription = context
        .bus()
        .subscribe(&context.subjects().agent_invoke_wildcard())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = subscription.recv() => {
                    let Some(delivery) = delivery else { break };
                    let EventBody::AgentInvoke { agent_id, recipient_id, .. } =
                        delivery.envelope.body
                    else {
                        continue;
                    };
                    debug!(agent_id = %agent_id, "Scripted runtime invoked");
                    if let AgentScript::Respond { text } = &script {
                        run_turn(
                            &context,
                            &delivery.envelope.header,
                            agent_id,
                            &recipient_id,
                            text,
                        )
                        .await;
                    }
                }
            }
        }
        subscription.unsubscribe();
    }))
}

/// One bracketed assistant turn followed by a task-finish report
async fn run_turn(
    context: &SystemContext,
    header: &EventHeader,
    agent_id: uuid::Uuid,
    recipient_id: &str,
    text: &str,
) {
    let response_subject = context.subjects().response_for(&header.user_id);
    let provider = "scripted".to_string();

    let content_sequence = [
        EventBody::MessageStart {
            provider: provider.clone(),
            payload: json!({"message": {"role": "assistant"}}),
        },
        EventBody::ContentBlockStart {
            provider: provider.clone(),
            payload: json!({"index": 0, "content_block": {"type": "text"}}),
        },
        EventBody::ContentBlockDelta {
            provider: provider.clone(),
            payload: json!({"index": 0, "delta": {"type": "text_delta", "text": text}}),
        },
        EventBody::ContentBlockStop {
            provider: provider.clone(),
            payload: json!({"index": 0}),
        },
        EventBody::MessageDelta {
            provider: provider.clone(),
            payload: json!({"delta": {"stop_reason": "end_turn"}}),
        },
        EventBody::MessageStop {
            provider,
            payload: json!({}),
        },
    ];

    for body in content_sequence {
        let envelope = EventEnvelope::new(header.clone(), body);
        if context
            .bus()
            .publish(&response_subject, envelope)
            .await
            .is_err()
        {
            return;
        }
    }

    let finish = EventEnvelope::new(
        header.clone(),
        EventBody::TaskFinish {
            agent_id,
            recipient_id: recipient_id.to_string(),
            response: json!({"content": text}),
            citations: None,
        },
    );
    let finish_subject = context.subjects().finish_for(&header.user_id);
    let _ = context.bus().publish(&finish_subject, finish).await;
}
