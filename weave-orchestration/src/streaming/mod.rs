//! # Unidirectional Stream Handler
//!
//! `POST /v1/tasks/{task_id}/execute`: a one-shot request that returns a
//! long-lived event stream built from the caller's response and lifecycle
//! subscriptions. A background worker owns the stream: it forwards
//! response envelopes as `data:` frames, emits a heartbeat frame on a
//! timer, watches lifecycle events to learn the run's terminal status, and
//! on exit persists that status from a detached, bounded context so client
//! disconnects can never leak a dirty run row.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weave_shared::messaging::{
    Delivery, EventBody, EventEnvelope, EventHeader, SubscriptionHandle,
};
use weave_shared::models::{RunStatus, TaskRun};
use weave_shared::SystemContext;

use crate::registry::SessionRegistry;
use crate::web::{ApiError, AppState};

/// Execute request body
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Target agent; the nil id doubles as "missing"
    #[serde(default)]
    pub agent_id: Uuid,
    #[serde(default)]
    pub current_loops: Option<i32>,
}

/// Handler for `POST /v1/tasks/{task_id}/execute`
pub async fn execute_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(raw): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: ExecuteRequest = serde_json::from_value(raw)
        .map_err(|_| ApiError::bad_request("Invalid request body"))?;
    if body.agent_id.is_nil() {
        return Err(ApiError::bad_request("agent_id is required"));
    }

    let gateway = state.context.gateway();
    let task = gateway.get_task(task_id).await?;

    // A task may have at most one non-terminal run; a duplicate execute is
    // a conflict reported in the not-found shape, naming the live status
    if let Some(existing) = gateway.current_task_run(task_id).await? {
        return Err(ApiError::not_found(format!(
            "task {task_id} already has an active run with status {}",
            existing.status
        )));
    }

    let run = TaskRun::new(task_id);
    gateway.create_task_run(&run).await?;
    if let Some(loops) = body.current_loops {
        gateway.set_task_run_loops(run.task_run_id, loops).await?;
    }

    let thread = gateway.get_thread(task.thread_id).await?;
    let user_id = thread.user_id.clone();

    // Both subscriptions feed one shared per-user channel
    let capacity = state.context.config().bus.channel_capacity;
    let (bus_tx, bus_rx) = mpsc::channel::<Delivery>(capacity);
    let subjects = state.context.subjects();
    let response_sub = state
        .context
        .bus()
        .subscribe_sender(&subjects.response_for(&user_id), bus_tx.clone())?;
    let lifecycle_sub = state
        .context
        .bus()
        .subscribe_sender(&subjects.lifecycle_for(&user_id), bus_tx.clone())?;

    let stream_id = Uuid::new_v4();
    let cancel = state.shutdown.child_token();
    state
        .registry
        .register_user(user_id.as_str(), stream_id, bus_tx, cancel.clone());

    // Invoke the agent with the thread's accumulated messages
    let history = gateway.messages_for_thread(task.thread_id).await?;
    let header = EventHeader::new(user_id.as_str())
        .with_thread(task.thread_id)
        .with_task(task_id);
    let invoke = EventEnvelope::new(
        header,
        EventBody::AgentInvoke {
            agent_id: body.agent_id,
            recipient_id: user_id.clone(),
            messages: history,
        },
    );
    state
        .context
        .bus()
        .publish(&subjects.agent_invoke_for(&user_id), invoke)
        .await?;

    info!(
        task_id = %task_id,
        task_run_id = %run.task_run_id,
        agent_id = %body.agent_id,
        "Event stream opened"
    );

    let (event_tx, event_rx) = mpsc::channel::<Result<Event, Infallible>>(capacity);
    tokio::spawn(stream_worker(StreamWorker {
        context: state.context.clone(),
        registry: state.registry.clone(),
        user_id,
        stream_id,
        task_run_id: run.task_run_id,
        bus_rx,
        event_tx,
        response_sub,
        lifecycle_sub,
        cancel,
    }));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            // Disable upstream (reverse-proxy) buffering
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(ReceiverStream::new(event_rx)),
    ))
}

struct StreamWorker {
    context: SystemContext,
    registry: Arc<SessionRegistry>,
    user_id: String,
    stream_id: Uuid,
    task_run_id: Uuid,
    bus_rx: mpsc::Receiver<Delivery>,
    event_tx: mpsc::Sender<Result<Event, Infallible>>,
    response_sub: SubscriptionHandle,
    lifecycle_sub: SubscriptionHandle,
    cancel: CancellationToken,
}

async fn stream_worker(mut worker: StreamWorker) {
    // Pessimistic default: anything but an observed task_stop is a failure
    let mut final_status = RunStatus::Failed;

    let heartbeat_period = Duration::from_secs(
        worker
            .context
            .config()
            .streaming
            .heartbeat_interval_seconds,
    );
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_period,
        heartbeat_period,
    );

    let subjects = worker.context.subjects().clone();
    loop {
        tokio::select! {
            _ = worker.cancel.cancelled() => {
                debug!(task_run_id = %worker.task_run_id, "Stream cancelled");
                break;
            }
            _ = heartbeat.tick() => {
                let payload = json!({
                    "type": "heartbeat",
                    "timestamp": Utc::now().to_rfc3339(),
                });
                let event = Event::default().event("heartbeat").data(payload.to_string());
                if worker.event_tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
            delivery = worker.bus_rx.recv() => {
                let Some(delivery) = delivery else { break };
                if subjects.is_lifecycle_subject(&delivery.subject) {
                    match classify_lifecycle(&delivery.envelope) {
                        LifecycleAction::Finish(status) => {
                            final_status = status;
                            break;
                        }
                        LifecycleAction::PassThrough => {
                            if forward_body(&worker.event_tx, &delivery.envelope).await.is_err() {
                                break;
                            }
                        }
                    }
                } else if forward_body(&worker.event_tx, &delivery.envelope).await.is_err() {
                    break;
                }
            }
        }
    }

    finalize_stream(worker, final_status).await;
}

enum LifecycleAction {
    /// Terminal for the stream, with the status to persist
    Finish(RunStatus),
    /// Sub-task bracketing: forwarded to the client, stream continues
    PassThrough,
}

fn classify_lifecycle(envelope: &EventEnvelope) -> LifecycleAction {
    if envelope.error.is_some() {
        return LifecycleAction::Finish(RunStatus::Failed);
    }
    match &envelope.body {
        EventBody::TaskStop { .. } => LifecycleAction::Finish(RunStatus::Finished),
        EventBody::TaskError { .. } => LifecycleAction::Finish(RunStatus::Failed),
        EventBody::SubTaskStart { .. } | EventBody::SubTaskStop { .. } => {
            LifecycleAction::PassThrough
        }
        // Anything else on the lifecycle subject is unexpected here
        _ => LifecycleAction::Finish(RunStatus::Failed),
    }
}

async fn forward_body(
    event_tx: &mpsc::Sender<Result<Event, Infallible>>,
    envelope: &EventEnvelope,
) -> Result<(), ()> {
    let json = match serde_json::to_string(&envelope.body) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "Dropping unserializable envelope body");
            return Ok(());
        }
    };
    event_tx
        .send(Ok(Event::default().data(json)))
        .await
        .map_err(|_| ())
}

/// Persist the final status from a detached bounded context, then tear the
/// stream down. Cancellation of the request context must not be able to
/// leak a dirty run row, so the persist does not run on it.
async fn finalize_stream(worker: StreamWorker, final_status: RunStatus) {
    let gateway = worker.context.gateway().clone();
    let task_run_id = worker.task_run_id;
    let budget = Duration::from_secs(
        worker
            .context
            .config()
            .streaming
            .finalize_timeout_seconds,
    );
    tokio::spawn(async move {
        match tokio::time::timeout(
            budget,
            gateway.update_task_run_status(task_run_id, final_status),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(task_run_id = %task_run_id, status = %final_status, "Stream run finalized")
            }
            Ok(Err(err)) => {
                warn!(task_run_id = %task_run_id, error = %err, "Failed to finalize stream run")
            }
            Err(_) => {
                warn!(task_run_id = %task_run_id, "Stream run finalization timed out")
            }
        }
    });

    worker.response_sub.unsubscribe();
    worker.lifecycle_sub.unsubscribe();
    worker
        .registry
        .remove_user_if_owner(&worker.user_id, worker.stream_id);
    // event_tx drops here, closing the client pipe
}
