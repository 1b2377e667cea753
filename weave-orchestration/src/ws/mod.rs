//! # Bidirectional Session Handler
//!
//! Accepts a full-duplex client session over WebSocket. Each session owns
//! two concurrent activities: the reader, which parses client submissions
//! and publishes execute envelopes, and the forwarder, which drains the
//! per-user delivery channel back into the transport.
//!
//! Both the websocket-response and task-lifecycle subscriptions feed one
//! shared per-user channel registered in the session registry; the
//! forwarder classifies deliveries by subject substring.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weave_shared::messaging::{
    Delivery, EventBody, EventEnvelope, EventHeader, InboundMessage, Subjects,
};
use weave_shared::WeaveResult;

use crate::registry::SessionRegistry;
use crate::web::AppState;

/// Validated execute request submitted on the session
#[derive(Debug, Deserialize)]
pub(crate) struct ClientRequest {
    pub agent_id: Uuid,
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub messages: Vec<InboundMessage>,
}

/// Classified inbound text frame
#[derive(Debug)]
pub(crate) enum ClientFrame {
    Ping,
    Request(Box<ClientRequest>),
    Invalid(&'static str),
}

/// Parse one inbound text frame
///
/// The error strings are part of the external contract; clients match on
/// them verbatim.
pub(crate) fn parse_client_frame(text: &str) -> ClientFrame {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return ClientFrame::Invalid("Failed to parse message");
    };

    if value.get("type").and_then(|t| t.as_str()) == Some("ping") {
        return ClientFrame::Ping;
    }

    match value.get("agent_id") {
        None | Some(serde_json::Value::Null) => {
            return ClientFrame::Invalid("invalid message: agent_id field is required");
        }
        Some(_) => {}
    }

    let messages_missing_or_empty = match value.get("messages") {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        // Present with a wrong type: the deserializer reports it below
        Some(_) => false,
    };
    if messages_missing_or_empty {
        return ClientFrame::Invalid("invalid message: messages field is required");
    }

    match serde_json::from_value::<ClientRequest>(value) {
        Ok(request) => ClientFrame::Request(Box::new(request)),
        Err(_) => ClientFrame::Invalid("Invalid message format"),
    }
}

/// Render one delivery as an outbound text frame
///
/// Lifecycle and response envelopes forward their body verbatim; error
/// envelopes are synthesized into the minimal error frames clients expect.
pub(crate) fn render_outbound_frame(subjects: &Subjects, delivery: &Delivery) -> WeaveResult<String> {
    let envelope = &delivery.envelope;
    if subjects.is_lifecycle_subject(&delivery.subject) {
        if let Some(error) = &envelope.error {
            return Ok(json!({"type": "task_error", "error": error}).to_string());
        }
    } else if let Some(error) = &envelope.error {
        return Ok(json!({"error": error}).to_string());
    }
    Ok(serde_json::to_string(&envelope.body)?)
}

/// Upgrade handler for `GET /v1/ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_session(state, socket))
}

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

async fn handle_session(state: AppState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    // Identity is the fixed administrative user until the auth layer
    // derives it from transport context
    let user_id = state.context.default_user_id().to_string();

    let capacity = state.context.config().bus.channel_capacity;
    let (channel_tx, channel_rx) = mpsc::channel::<Delivery>(capacity);

    let subjects = state.context.subjects();
    let response_sub = match state
        .context
        .bus()
        .subscribe_sender(&subjects.response_for(&user_id), channel_tx.clone())
    {
        Ok(sub) => sub,
        Err(err) => {
            warn!(error = %err, "Failed to subscribe session response subject");
            return;
        }
    };
    let lifecycle_sub = match state
        .context
        .bus()
        .subscribe_sender(&subjects.lifecycle_for(&user_id), channel_tx.clone())
    {
        Ok(sub) => sub,
        Err(err) => {
            warn!(error = %err, "Failed to subscribe session lifecycle subject");
            response_sub.unsubscribe();
            return;
        }
    };

    let cancel = state.shutdown.child_token();
    state
        .registry
        .register_connection(connection_id, user_id.as_str(), channel_tx.clone());
    state
        .registry
        .register_user(user_id.as_str(), connection_id, channel_tx, cancel.clone());

    info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket session established"
    );

    let (sink, stream) = socket.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    let write_timeout =
        Duration::from_secs(state.context.config().streaming.write_timeout_seconds);

    let forwarder = tokio::spawn(run_forwarder(
        state.registry.clone(),
        state.context.subjects().clone(),
        connection_id,
        channel_rx,
        sink.clone(),
        cancel.clone(),
        write_timeout,
    ));

    run_reader(&state, connection_id, &user_id, stream, &sink, &cancel, write_timeout).await;

    // Teardown: both unsubscribes are idempotent; the user channel entry is
    // removed only if this session still owns it
    response_sub.unsubscribe();
    lifecycle_sub.unsubscribe();
    state.registry.remove_connection(connection_id);
    state.registry.remove_user_if_owner(&user_id, connection_id);
    cancel.cancel();

    // Locally originated closure is always graceful
    {
        let mut guard = sink.lock().await;
        let _ = guard.send(Message::Close(None)).await;
    }
    let _ = forwarder.await;

    info!(connection_id = %connection_id, "WebSocket session closed");
}

/// Reader half: consume transport frames until close, error, or cancel
async fn run_reader(
    state: &AppState,
    connection_id: Uuid,
    user_id: &str,
    mut stream: SplitStream<WebSocket>,
    sink: &SharedSink,
    cancel: &CancellationToken,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => {
                let Some(Ok(message)) = frame else { break };
                match message {
                    Message::Text(text) => {
                        let keep_going = handle_text_frame(
                            state,
                            connection_id,
                            user_id,
                            text.as_str(),
                            sink,
                            write_timeout,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    // Binary frames are ignored by contract
                    Message::Binary(_) => {}
                    Message::Close(_) => break,
                    // Protocol-level ping/pong is handled by the transport
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }
}

/// Handle one text frame; returns false when the session should end
async fn handle_text_frame(
    state: &AppState,
    connection_id: Uuid,
    user_id: &str,
    text: &str,
    sink: &SharedSink,
    write_timeout: Duration,
) -> bool {
    let reply = match parse_client_frame(text) {
        ClientFrame::Ping => json!({"type": "pong"}).to_string(),
        ClientFrame::Invalid(message) => json!({"error": message}).to_string(),
        ClientFrame::Request(request) => {
            let ClientRequest {
                agent_id,
                thread_id,
                messages,
            } = *request;
            let mut header = EventHeader::new(user_id).with_connection(connection_id);
            if let Some(thread_id) = thread_id {
                header = header.with_thread(thread_id);
            }
            let subject = state.context.subjects().execute_for(user_id);
            let envelope = EventEnvelope::new(header, EventBody::TaskExecute { agent_id, messages });
            match state.context.bus().publish(&subject, envelope).await {
                Ok(()) => {
                    debug!(
                        connection_id = %connection_id,
                        agent_id = %agent_id,
                        "Execute request published"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to publish execute request");
                    json!({"error": "failed to submit request"}).to_string()
                }
            }
        }
    };

    send_text(sink, write_timeout, reply).await
}

/// Forwarder half: drain the shared per-user channel into the transport
async fn run_forwarder(
    registry: Arc<SessionRegistry>,
    subjects: Subjects,
    connection_id: Uuid,
    mut channel_rx: mpsc::Receiver<Delivery>,
    sink: SharedSink,
    cancel: CancellationToken,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = channel_rx.recv() => {
                let Some(delivery) = delivery else { break };
                // Connection vanished mid-delivery: skip, not an error
                if registry.lookup_connection(connection_id).is_none() {
                    continue;
                }
                match render_outbound_frame(&subjects, &delivery) {
                    Ok(frame) => {
                        if !send_text(&sink, write_timeout, frame).await {
                            // Write deadline exceeded: terminate the session
                            cancel.cancel();
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(
                            subject = %delivery.subject,
                            error = %err,
                            "Dropping unrenderable envelope"
                        );
                    }
                }
            }
        }
    }
}

/// Write a text frame under the transport write deadline
async fn send_text(sink: &SharedSink, write_timeout: Duration, text: String) -> bool {
    let mut guard = sink.lock().await;
    matches!(
        tokio::time::timeout(write_timeout, guard.send(Message::Text(text.into()))).await,
        Ok(Ok(()))
    )
}
