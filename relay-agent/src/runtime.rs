use relay_common::{Signal, internal};
use tokio::{sync::broadcast, task::JoinSet};

use crate::{
    config::AgentConfig,
    coordinator::CoordinatorClient,
    dispatch::{DispatchSettings, Dispatcher},
    error::AgentError,
    heartbeat::Heartbeat,
    identity::Identity,
};

/// The agent process: a heartbeat cycle and a dispatch cycle sharing one
/// coordinator client.
#[derive(Debug)]
pub struct Agent {
    heartbeat: Heartbeat,
    dispatcher: Dispatcher,
}

impl Agent {
    /// # Errors
    ///
    /// If the coordinator address is unusable.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let client = CoordinatorClient::new(&config.base_url(), config.request_timeout())?;

        let helo_name = Identity::gather(config.agent_id.as_deref())
            .map_or_else(|_| "localhost".to_string(), |identity| identity.hostname);

        let settings = DispatchSettings {
            poll_interval: config.poll_interval(),
            confirm_attempts: config.confirm_retries,
            confirm_backoff: config.confirm_backoff(),
            max_poll_failures: config.max_poll_failures,
            smtp: config.smtp_settings(&helo_name),
        };

        Ok(Self {
            heartbeat: Heartbeat::new(
                client.clone(),
                config.heartbeat_interval(),
                config.agent_id.clone(),
            ),
            dispatcher: Dispatcher::new(client, settings),
        })
    }

    /// Runs both cycles until `shutdown` fires or one of them stops.
    ///
    /// Whichever cycle stops first brings the other down with it.
    ///
    /// # Errors
    ///
    /// The first error returned by either cycle.
    pub async fn run(self, shutdown: &broadcast::Sender<Signal>) -> Result<(), AgentError> {
        internal!(level = INFO, "Agent running");

        let Self {
            heartbeat,
            dispatcher,
        } = self;

        let mut cycles: JoinSet<Result<(), AgentError>> = JoinSet::new();
        let heartbeat_shutdown = shutdown.subscribe();
        cycles.spawn(async move {
            heartbeat.serve(heartbeat_shutdown).await;
            Ok(())
        });
        let dispatch_shutdown = shutdown.subscribe();
        cycles.spawn(async move { dispatcher.serve(dispatch_shutdown).await });

        let mut first_error = None;
        while let Some(joined) = cycles.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(AgentError::Cycle(e.to_string())));
            if let Err(e) = result {
                tracing::error!(error = %e, "Agent cycle failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            let _ = shutdown.send(Signal::Shutdown);
        }

        internal!(level = INFO, "Agent stopped");
        first_error.map_or(Ok(()), Err)
    }
}
