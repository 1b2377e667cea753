//! # External Collaborator Contracts
//!
//! The core mediates between client transports and two external runtimes.
//! Neither runtime is part of this repository; these are the envelope
//! contracts on the bus boundary.
//!
//! ## Agent runtime
//!
//! Consumes: [`EventBody::AgentInvoke`] on `agent.invoke.{user}` — one
//! agent turn against the supplied message history.
//!
//! Produces, per turn:
//!
//! - A bracketed sequence of content envelopes on `ws.response.{user}`:
//!   `message_start`, then per block `content_block_start` /
//!   `content_block_delta`* / `content_block_stop`, then `message_delta`
//!   and `message_stop`. The bracketing is the runtime's obligation; the
//!   core forwards without inspecting it. Every content body carries the
//!   client-facing `provider` field.
//! - On a terminal assistant turn: [`EventBody::TaskFinish`] on
//!   `task.finish.{user}`.
//! - On a tool call: a tool-invoke envelope to the tool runtime, or, for
//!   sub-agent invocation, [`EventBody::TaskHandoff`] on
//!   `task.handoff.{user}` with a fresh tool-run id — the id the core will
//!   use as the sub-task identifier.
//!
//! ## Tool runtime
//!
//! Consumes tool-invoke envelopes from the agent runtime and
//! [`EventBody::ToolGather`] results published by the finish callback when
//! a sub-task completes; a gather re-enters the suspended parent agent's
//! loop through the normal execute path.
//!
//! ## Transports (exposed by the core)
//!
//! - Bidirectional session frames: see [`crate::ws`].
//! - Event-stream framing and the REST execute endpoint: see
//!   [`crate::streaming`].
//!
//! The scenario tests drive these contracts with a scripted agent runtime
//! (see [`crate::testing`]) that honors the bracketing obligation.

#[allow(unused_imports)]
use weave_shared::messaging::EventBody;
