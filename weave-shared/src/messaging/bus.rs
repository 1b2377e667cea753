//! # MessageBus Facade
//!
//! Domain-level bus client wrapping a `BusProvider` enum. Handlers either
//! take an owned subscription (its own bounded channel) or register an
//! existing sender so several subjects feed one shared per-user channel.
//!
//! Subscription handles unsubscribe on drop, and explicit `unsubscribe()`
//! is idempotent, so teardown paths can call it unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::envelope::{Delivery, EventEnvelope};
use super::in_memory::InMemoryBus;
use super::metrics::BusMetrics;
use crate::error::WeaveResult;

/// Pub/sub backend, enum dispatch
///
/// `InMemory` is the in-process backend; a broker-backed variant slots in
/// here without touching any call site.
#[derive(Debug)]
pub enum BusProvider {
    InMemory(InMemoryBus),
}

impl BusProvider {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(bus) => bus.provider_name(),
        }
    }

    fn publish(&self, subject: &str, envelope: EventEnvelope) -> WeaveResult<()> {
        match self {
            Self::InMemory(bus) => bus.publish(subject, envelope),
        }
    }

    fn subscribe_sender(&self, pattern: &str, tx: mpsc::Sender<Delivery>) -> WeaveResult<u64> {
        match self {
            Self::InMemory(bus) => bus.subscribe_sender(pattern, tx),
        }
    }

    fn unsubscribe(&self, pattern: &str, id: u64) {
        match self {
            Self::InMemory(bus) => bus.unsubscribe(pattern, id),
        }
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        match self {
            Self::InMemory(bus) => bus.metrics(),
        }
    }
}

/// Shared bus handle
#[derive(Debug, Clone)]
pub struct MessageBus {
    provider: Arc<BusProvider>,
    /// Bounded buffer capacity for owned subscriptions
    capacity: usize,
}

impl MessageBus {
    pub fn new(provider: Arc<BusProvider>, capacity: usize) -> Self {
        Self { provider, capacity }
    }

    /// In-memory bus with the given subscriber channel capacity
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(BusProvider::InMemory(InMemoryBus::new())), capacity)
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        self.provider.metrics()
    }

    /// Publish an envelope on a literal subject
    pub async fn publish(&self, subject: &str, envelope: EventEnvelope) -> WeaveResult<()> {
        self.provider.publish(subject, envelope)
    }

    /// Subscribe with an owned bounded channel
    pub fn subscribe(&self, pattern: &str) -> WeaveResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = self.subscribe_sender(pattern, tx)?;
        Ok(Subscription { handle, rx })
    }

    /// Register an existing sender under a pattern
    ///
    /// Used by the session handlers to feed response and lifecycle
    /// subscriptions into one shared per-user channel.
    pub fn subscribe_sender(
        &self,
        pattern: &str,
        tx: mpsc::Sender<Delivery>,
    ) -> WeaveResult<SubscriptionHandle> {
        let id = self.provider.subscribe_sender(pattern, tx)?;
        Ok(SubscriptionHandle {
            provider: self.provider.clone(),
            pattern: pattern.to_string(),
            id,
            active: AtomicBool::new(true),
        })
    }
}

/// Registration token for one subscription
///
/// `unsubscribe()` is idempotent; dropping the handle unsubscribes too.
#[derive(Debug)]
pub struct SubscriptionHandle {
    provider: Arc<BusProvider>,
    pattern: String,
    id: u64,
    active: AtomicBool,
}

impl SubscriptionHandle {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.provider.unsubscribe(&self.pattern, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Owned subscription: a handle plus its delivery channel
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        self.handle.pattern()
    }

    /// Receive the next delivery; `None` after unsubscribe/teardown
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::{EventBody, EventHeader};

    fn envelope(user: &str) -> EventEnvelope {
        EventEnvelope::new(
            EventHeader::new(user),
            EventBody::TaskError {
                error: "test".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_owned_subscription_round_trip() {
        let bus = MessageBus::in_memory(16);
        let mut sub = bus.subscribe("ws.response.admin").unwrap();

        bus.publish("ws.response.admin", envelope("admin"))
            .await
            .unwrap();

        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.envelope.header.user_id, "admin");
    }

    #[tokio::test]
    async fn test_shared_channel_merges_two_subjects() {
        let bus = MessageBus::in_memory(16);
        let (tx, mut rx) = mpsc::channel(16);
        let response_sub = bus.subscribe_sender("ws.response.admin", tx.clone()).unwrap();
        let lifecycle_sub = bus.subscribe_sender("task.lifecycle.admin", tx).unwrap();

        bus.publish("ws.response.admin", envelope("admin"))
            .await
            .unwrap();
        bus.publish("task.lifecycle.admin", envelope("admin"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_ne!(first.subject, second.subject);

        response_sub.unsubscribe();
        lifecycle_sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_handle_unsubscribes_on_drop() {
        let bus = MessageBus::in_memory(16);
        let inner_count = {
            let _sub = bus.subscribe("task.execute.>").unwrap();
            match bus.provider.as_ref() {
                BusProvider::InMemory(b) => b.subscriber_count(),
            }
        };
        assert_eq!(inner_count, 1);

        let after = match bus.provider.as_ref() {
            BusProvider::InMemory(b) => b.subscriber_count(),
        };
        assert_eq!(after, 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_malformed_pattern() {
        let bus = MessageBus::in_memory(16);
        assert!(bus.subscribe("task.>.oops").is_err());
    }

    #[test]
    fn test_provider_name() {
        let bus = MessageBus::in_memory(4);
        assert_eq!(bus.provider_name(), "in_memory");
    }
}
