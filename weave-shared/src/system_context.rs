//! # System Context
//!
//! The shared handle threaded through every orchestration component:
//! configuration, the persistence gateway, the message bus, and the
//! subject registry. Cheap to clone; all inner state is shared.

use std::sync::Arc;

use crate::config::WeaveConfig;
use crate::messaging::{MessageBus, Subjects};
use crate::persistence::PersistenceGateway;

/// Shared dependencies for orchestration components
#[derive(Debug, Clone)]
pub struct SystemContext {
    config: Arc<WeaveConfig>,
    gateway: PersistenceGateway,
    bus: MessageBus,
    subjects: Arc<Subjects>,
}

impl SystemContext {
    pub fn new(config: WeaveConfig, gateway: PersistenceGateway, bus: MessageBus) -> Self {
        let subjects = Arc::new(Subjects::from_config(&config.bus));
        Self {
            config: Arc::new(config),
            gateway,
            bus,
            subjects,
        }
    }

    /// Context over in-memory providers, used by tests and broker-less
    /// local runs
    pub fn in_memory(config: WeaveConfig) -> Self {
        let bus = MessageBus::in_memory(config.bus.channel_capacity);
        let gateway = PersistenceGateway::in_memory();
        Self::new(config, gateway, bus)
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    /// The fixed administrative user identifier used until transport
    /// context carries real identity
    pub fn default_user_id(&self) -> &str {
        &self.config.execution.default_user_id
    }
}
