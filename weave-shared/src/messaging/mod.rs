//! # Message Bus Facade
//!
//! Subject-addressed pub/sub used by every component of the orchestration
//! core. The facade wraps a `BusProvider` (enum) — no trait objects, all
//! enum dispatch — and is the only module that would touch the wire
//! protocol of a real broker.
//!
//! ## Design
//!
//! ```text
//! MessageBus
//!   ├── provider: Arc<BusProvider>     <- actual pub/sub backend
//!   └── capacity: usize                <- bounded buffer per subscriber
//! ```
//!
//! Subjects are dotted strings. Per-user subjects are derived by appending
//! the user identifier to a base known per event kind (see [`Subjects`]).
//! Ordering is FIFO per subject. Overflow drops the envelope, marks the
//! subscriber degraded, and surfaces the drop through [`BusMetrics`].

pub mod bus;
pub mod envelope;
pub mod in_memory;
pub mod metrics;
pub mod subjects;

pub use bus::{BusProvider, MessageBus, Subscription, SubscriptionHandle};
pub use envelope::{
    Delivery, EventBody, EventEnvelope, EventHeader, EventMetadata, InboundMessage,
};
pub use in_memory::InMemoryBus;
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use subjects::{subject_matches, validate_subject, Subjects};
