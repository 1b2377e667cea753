//! # In-Memory Bus Provider
//!
//! Process-internal pub/sub backend: a subject table of bounded
//! `tokio::sync::mpsc` senders. Per-subject ordering is the send order;
//! overflow drops the envelope rather than blocking the publisher, and the
//! affected subscriber is marked degraded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use super::envelope::{Delivery, EventEnvelope};
use super::metrics::BusMetrics;
use super::subjects::{subject_matches, validate_subject};
use crate::error::{WeaveError, WeaveResult};

/// One registered delivery channel under a subscription pattern
#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Delivery>,
    degraded: AtomicBool,
}

/// In-process pub/sub backend
#[derive(Debug, Default)]
pub struct InMemoryBus {
    /// pattern -> subscribers registered under it
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    metrics: Arc<BusMetrics>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider_name(&self) -> &'static str {
        "in_memory"
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    /// Publish an envelope to every subscriber whose pattern matches
    ///
    /// Fails only if the subject is not a literal subject or the envelope
    /// cannot be serialized. Overflowing subscribers lose this envelope,
    /// get marked degraded, and keep receiving subsequent traffic.
    pub fn publish(&self, subject: &str, envelope: EventEnvelope) -> WeaveResult<()> {
        validate_subject(subject)?;
        if subject.contains('*') || subject.contains('>') {
            return Err(WeaveError::Messaging(format!(
                "cannot publish to a pattern: {subject:?}"
            )));
        }

        // The broker boundary is a wire: anything unserializable must fail
        // here, not at a subscriber.
        serde_json::to_vec(&envelope)
            .map_err(|e| WeaveError::Messaging(format!("envelope serialization failed: {e}")))?;

        for entry in self.subscribers.iter() {
            if !subject_matches(entry.key(), subject) {
                continue;
            }
            for subscriber in entry.value() {
                let delivery = Delivery {
                    subject: subject.to_string(),
                    envelope: envelope.clone(),
                };
                match subscriber.tx.try_send(delivery) {
                    Ok(()) => self.metrics.record_delivered(),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.metrics.record_dropped();
                        if !subscriber.degraded.swap(true, Ordering::Relaxed) {
                            self.metrics.record_degraded_subscriber();
                        }
                        warn!(
                            subject = %subject,
                            pattern = %entry.key(),
                            subscriber_id = subscriber.id,
                            "Subscriber buffer full, dropping envelope"
                        );
                    }
                    // Receiver gone; the handle cleans the entry up on drop
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }

        self.metrics.record_published();
        Ok(())
    }

    /// Register a delivery channel under a subscription pattern
    pub fn subscribe_sender(
        &self,
        pattern: &str,
        tx: mpsc::Sender<Delivery>,
    ) -> WeaveResult<u64> {
        validate_subject(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(pattern.to_string())
            .or_default()
            .push(Subscriber {
                id,
                tx,
                degraded: AtomicBool::new(false),
            });
        Ok(id)
    }

    /// Remove a subscriber; unknown ids are ignored so the operation is
    /// idempotent
    pub fn unsubscribe(&self, pattern: &str, id: u64) {
        if let Some(mut entry) = self.subscribers.get_mut(pattern) {
            entry.retain(|s| s.id != id);
        }
        self.subscribers.remove_if(pattern, |_, subs| subs.is_empty());
    }

    /// Number of live subscriber registrations (all patterns)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::{EventBody, EventHeader};

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            EventHeader::new("admin"),
            EventBody::TaskError {
                error: "test".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe_sender("ws.response.admin", tx).unwrap();

        bus.publish("ws.response.admin", envelope()).unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.subject, "ws.response.admin");
    }

    #[tokio::test]
    async fn test_wildcard_subscription_sees_all_users() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe_sender("task.execute.>", tx).unwrap();

        bus.publish("task.execute.alice", envelope()).unwrap();
        bus.publish("task.execute.bob", envelope()).unwrap();

        assert_eq!(rx.recv().await.unwrap().subject, "task.execute.alice");
        assert_eq!(rx.recv().await.unwrap().subject, "task.execute.bob");
    }

    #[tokio::test]
    async fn test_fifo_per_subject() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::channel(16);
        bus.subscribe_sender("task.lifecycle.admin", tx).unwrap();

        for i in 0..5 {
            let env = EventEnvelope::new(
                EventHeader::new("admin"),
                EventBody::TaskError {
                    error: format!("{i}"),
                },
            );
            bus.publish("task.lifecycle.admin", env).unwrap();
        }

        for i in 0..5 {
            let delivery = rx.recv().await.unwrap();
            match delivery.envelope.body {
                EventBody::TaskError { error } => assert_eq!(error, format!("{i}")),
                other => panic!("unexpected body: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_and_degrades() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::channel(2);
        bus.subscribe_sender("ws.response.admin", tx).unwrap();

        for _ in 0..4 {
            bus.publish("ws.response.admin", envelope()).unwrap();
        }

        let snap = bus.metrics().snapshot();
        assert_eq!(snap.delivered, 2);
        assert_eq!(snap.dropped, 2);
        assert_eq!(snap.degraded_subscribers, 1);

        // Degraded subscriber still receives subsequent envelopes
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        bus.publish("ws.response.admin", envelope()).unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_to_pattern_is_rejected() {
        let bus = InMemoryBus::new();
        assert!(bus.publish("task.execute.>", envelope()).is_err());
        assert!(bus.publish("task..execute", envelope()).is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::channel(2);
        let id = bus.subscribe_sender("ws.response.admin", tx).unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe("ws.response.admin", id);
        bus.unsubscribe("ws.response.admin", id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
