//! Service wiring and lifecycle.
//!
//! ```text
//!  ingest topics ──► IngestConsumer ──► BatchIngestor ──► BatchWriter ──► StateStore
//!  rollback topic ─► IngestConsumer ──► BatchIngestor ──► RollbackWriter ─┘
//!  HTTP ──► TransitionCoordinator / DeliveryQueries
//! ```
//!
//! Shutdown stops the HTTP listener first, then signals the consumers, which
//! drain their buffers with a final flush.

use crate::config::Config;
use delivery_core::event::OrderEvent;
use delivery_core::lock::LockService;
use delivery_core::message_bus::MessageBus;
use delivery_core::state_store::StateStore;
use delivery_postgres::PostgresStateStore;
use delivery_redis::RedisLockService;
use delivery_redpanda::RedpandaMessageBus;
use delivery_runtime::{
    BatchIngestor, BatchOutcome, BatchWriter, DeliveryQueries, IngestConsumer, RollbackWriter, TransitionCoordinator,
};
use delivery_web::{AppState, build_router};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The three collaborators everything else is built on.
#[derive(Clone)]
pub struct Collaborators {
    /// Durable delivery records.
    pub store: Arc<dyn StateStore>,
    /// Per-order start locks.
    pub locks: Arc<dyn LockService>,
    /// Order lifecycle topics.
    pub bus: Arc<dyn MessageBus>,
}

impl Collaborators {
    /// Connect Postgres (running migrations), Redis and Redpanda.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend cannot be reached or configured.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        info!("Connecting to state store database...");
        let store = PostgresStateStore::connect(&config.postgres.url, config.postgres.max_connections).await?;
        store.migrate().await?;
        info!("State store connected and migrated");

        info!("Connecting to Redis lock service...");
        let locks = RedisLockService::new(&config.redis.url).await?;
        info!("Lock service connected");

        info!("Connecting to Redpanda message bus...");
        let bus = RedpandaMessageBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?;
        info!("Message bus connected");

        Ok(Self {
            store: Arc::new(store),
            locks: Arc::new(locks),
            bus: Arc::new(bus),
        })
    }
}

/// A running delivery coordinator: consumers spawned, router built.
pub struct DeliveryApp {
    router: axum::Router,
    consumers: Vec<JoinHandle<Option<BatchOutcome>>>,
    shutdown: broadcast::Sender<()>,
    shutdown_grace: Duration,
}

impl DeliveryApp {
    /// Wire every component over `collaborators` and spawn the consumers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn assemble(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators { store, locks, bus } = collaborators;
        let pipeline = &config.pipeline;
        let redpanda = &config.redpanda;

        let writer = BatchWriter::new(Arc::clone(&store), Arc::clone(&bus), pipeline.retry_policy())
            .with_compensation_topic(redpanda.status_change_topic.clone());
        let ingest: Arc<BatchIngestor<OrderEvent>> =
            BatchIngestor::new("ingest", pipeline.batch_config(), Arc::new(writer));

        let rollback_writer = RollbackWriter::new(Arc::clone(&store), pipeline.retry_policy());
        let rollback: Arc<BatchIngestor<OrderEvent>> =
            BatchIngestor::new("rollback", pipeline.batch_config(), Arc::new(rollback_writer));

        let (shutdown, _) = broadcast::channel(1);
        let consumers = vec![
            IngestConsumer::new(
                "ingest",
                redpanda.ingest_topics.clone(),
                Arc::clone(&bus),
                Arc::clone(&ingest),
                shutdown.subscribe(),
            )
            .spawn(),
            IngestConsumer::new(
                "rollback",
                vec![redpanda.rollback_topic.clone()],
                Arc::clone(&bus),
                Arc::clone(&rollback),
                shutdown.subscribe(),
            )
            .spawn(),
        ];
        info!(
            ingest_topics = ?redpanda.ingest_topics,
            rollback_topic = %redpanda.rollback_topic,
            "Consumers started"
        );

        let coordinator = TransitionCoordinator::new(Arc::clone(&store), locks, bus, config.transition_config());
        let state = AppState::new(coordinator, DeliveryQueries::new(store), vec![ingest, rollback]);

        Self {
            router: build_router(state),
            consumers,
            shutdown,
            shutdown_grace: config.server.shutdown_grace(),
        }
    }

    /// Connect the production backends and assemble.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend cannot be reached.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let collaborators = Collaborators::connect(config).await?;
        Ok(Self::assemble(config, collaborators))
    }

    /// HTTP router.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Serve HTTP on `listener` until `signal` resolves, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(address = %addr, "Server listening");

        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(signal)
            .await;
        if let Err(e) = &served {
            error!(error = %e, "HTTP server failed");
        }

        self.shutdown().await;
        served?;
        Ok(())
    }

    /// Stop the consumers and wait for their final drains.
    ///
    /// Returns the outcomes of the drains that finished within the grace
    /// period.
    pub async fn shutdown(self) -> Vec<BatchOutcome> {
        info!(consumers = self.consumers.len(), "Stopping consumers");
        if self.shutdown.send(()).is_err() {
            warn!("No consumer was listening for shutdown");
        }

        match tokio::time::timeout(self.shutdown_grace, futures::future::join_all(self.consumers)).await {
            Ok(results) => {
                let mut outcomes = Vec::new();
                for result in results {
                    match result {
                        Ok(outcome) => outcomes.extend(outcome),
                        Err(e) => error!(error = %e, "Consumer task failed"),
                    }
                }
                info!(drained_batches = outcomes.len(), "Consumers stopped");
                outcomes
            },
            Err(_) => {
                warn!(grace = ?self.shutdown_grace, "Consumers did not drain in time");
                Vec::new()
            },
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
