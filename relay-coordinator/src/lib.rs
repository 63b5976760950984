//! The coordinator half of relay.
//!
//! Producers submit [`SendTask`](relay_common::SendTask)s, which wait in a
//! bounded [`DispatchQueue`] until an agent polls for one. Agents report the
//! outcome into the [`VerificationRegistry`], and the [`Reconciler`] later
//! folds those reports into the durable [`RecordStore`].

pub mod config;
pub mod error;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod roster;
pub mod server;
pub mod store;

use std::sync::Arc;

use axum::Router;
use relay_common::{Signal, internal};
use tokio::sync::broadcast;

pub use config::{CoordinatorConfig, ReconcileConfig};
pub use error::{CoordinatorError, QueueError, StoreError};
pub use queue::DispatchQueue;
pub use reconcile::{Reconciler, TickReport};
pub use record::{DeliveryRecord, DeliveryStatus, RecordId, RecordUpdate};
pub use registry::{DeliveryOutcome, VerificationRegistry};
pub use roster::AgentRoster;
pub use server::{AppState, CoordinatorServer};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreConfig};

/// Every coordinator component, wired together but not yet running.
#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    state: AppState,
    reconciler: Arc<Reconciler>,
}

impl Coordinator {
    /// Build a coordinator using the store named in `config`.
    ///
    /// # Errors
    ///
    /// If the configured store cannot be opened.
    pub fn new(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let store = config.store.clone().into_store()?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: CoordinatorConfig, store: Arc<dyn RecordStore>) -> Self {
        let registry = Arc::new(VerificationRegistry::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.reconcile.clone(),
        ));

        let state = AppState {
            queue: Arc::new(DispatchQueue::new(config.queue_capacity)),
            registry,
            store,
            roster: Arc::new(AgentRoster::new()),
            reconciler_running: reconciler.running(),
            agent_stale_after: config.agent_stale_after(),
        };

        Self {
            config,
            state,
            reconciler,
        }
    }

    pub const fn state(&self) -> &AppState {
        &self.state
    }

    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        server::router(self.state.clone(), self.config.request_timeout())
    }

    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// If the address cannot be bound.
    pub async fn bind(&self) -> Result<CoordinatorServer, CoordinatorError> {
        CoordinatorServer::bind(&self.config.listen_address, self.router()).await
    }

    /// Run the reconciler and the HTTP server until `shutdown` fires.
    ///
    /// If the server stops on its own, the reconciler is told to stop too.
    ///
    /// # Errors
    ///
    /// If the HTTP server fails.
    pub async fn run(
        self,
        server: CoordinatorServer,
        shutdown: &broadcast::Sender<Signal>,
    ) -> Result<(), CoordinatorError> {
        let reconciler_shutdown = shutdown.subscribe();
        let server_shutdown = shutdown.subscribe();

        let reconciler = Arc::clone(&self.reconciler);
        let reconciling = tokio::spawn(async move { reconciler.serve(reconciler_shutdown).await });

        let result = server.serve(server_shutdown).await;

        let _ = shutdown.send(Signal::Shutdown);
        if let Err(e) = reconciling.await {
            tracing::error!(error = %e, "Reconciler task failed");
        }

        internal!(level = INFO, "Coordinator stopped");
        result
    }
}
