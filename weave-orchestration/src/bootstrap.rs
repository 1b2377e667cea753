//! # Orchestration Bootstrap
//!
//! Wires configuration, persistence, the bus, the orchestrator workers,
//! and the web server into one handle with an ordered `stop()`.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weave_shared::config::WeaveConfig;
use weave_shared::messaging::MessageBus;
use weave_shared::persistence::PersistenceGateway;
use weave_shared::{database, SystemContext, WeaveError, WeaveResult};

use crate::orchestrator::TaskOrchestrator;
use crate::web::{build_router, AppState};

/// Entry point for building a running orchestration system
#[derive(Debug)]
pub struct OrchestrationBootstrap;

impl OrchestrationBootstrap {
    /// Production bootstrap: config from file/env, Postgres-backed gateway,
    /// migrations applied, web server bound
    pub async fn bootstrap() -> WeaveResult<OrchestrationHandle> {
        let config = WeaveConfig::load()?;
        let pool = database::connect(&config.database).await?;
        database::migrate(&pool).await?;

        let bus = MessageBus::in_memory(config.bus.channel_capacity);
        let gateway = PersistenceGateway::postgres(pool);
        let context = SystemContext::new(config, gateway, bus);
        Self::start(context).await
    }

    /// Start workers and the web server over an existing context
    ///
    /// Tests use this with an in-memory context and port 0.
    pub async fn start(context: SystemContext) -> WeaveResult<OrchestrationHandle> {
        let cancel = CancellationToken::new();

        let orchestrator = TaskOrchestrator::new(context.clone());
        let workers = orchestrator.spawn_workers(cancel.clone())?;

        let state = AppState::new(context.clone(), cancel.clone());
        let router = build_router(state);

        let bind_address = context.config().web.bind_address();
        let listener = tokio::net::TcpListener::bind(&bind_address)
            .await
            .map_err(|e| {
                WeaveError::Configuration(format!("failed to bind {bind_address}: {e}"))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WeaveError::Configuration(e.to_string()))?;

        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            let shutdown = async move { server_cancel.cancelled().await };
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %err, "Web server exited with error");
            }
        });

        info!(
            address = %local_addr,
            bus_provider = context.bus().provider_name(),
            store_provider = context.gateway().provider_name(),
            "Orchestration system started"
        );

        Ok(OrchestrationHandle {
            context,
            local_addr,
            cancel,
            workers,
            server: Some(server),
        })
    }
}

/// Running orchestration system
#[derive(Debug)]
pub struct OrchestrationHandle {
    pub context: SystemContext,
    pub local_addr: std::net::SocketAddr,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
}

impl OrchestrationHandle {
    /// Ordered shutdown: cancel everything, then join workers and server
    pub async fn stop(mut self) -> WeaveResult<()> {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        info!("Orchestration system stopped");
        Ok(())
    }
}
