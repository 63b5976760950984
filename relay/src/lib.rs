//! Process wiring for the `relay-coordinator` and `relay-agent` binaries.

pub mod config;

use relay_agent::{Agent, AgentConfig};
use relay_common::{Signal, internal, logging, tracing::level_filters::LevelFilter};
use relay_coordinator::{Coordinator, CoordinatorConfig};
use tokio::sync::broadcast;

/// Waits for CTRL+C or SIGTERM, then tells every component to stop.
///
/// # Errors
///
/// If the SIGTERM handler cannot be installed.
pub async fn forward_shutdown(shutdown: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    let _ = shutdown.send(Signal::Shutdown);
    Ok(())
}

/// Runs a coordinator until it is signalled to stop.
///
/// # Errors
///
/// If the store cannot be opened, the listen address cannot be bound, or
/// the server fails.
pub async fn run_coordinator(config: CoordinatorConfig) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config)?;
    let server = coordinator.bind().await?;

    let (shutdown, _) = broadcast::channel(16);
    let signals = tokio::spawn(forward_shutdown(shutdown.clone()));

    let result = coordinator.run(server, &shutdown).await;
    signals.abort();

    Ok(result?)
}

/// Runs an agent until it is signalled to stop or a cycle fails.
///
/// # Errors
///
/// If the agent cannot start or one of its cycles fails.
pub async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    let agent = Agent::new(&config)?;
    internal!(level = INFO, coordinator = %config.base_url(), "Agent configured");

    let (shutdown, _) = broadcast::channel(16);
    let signals = tokio::spawn(forward_shutdown(shutdown.clone()));

    let result = agent.run(&shutdown).await;
    signals.abort();

    Ok(result?)
}

/// Installs logging for the agent, honouring `--debug` when `LOG_LEVEL` is
/// unset.
pub fn init_agent_logging(config: &AgentConfig) {
    if config.debug {
        logging::init_with_default(LevelFilter::DEBUG);
    } else {
        logging::init();
    }
}
