use std::time::Duration;

use relay_common::{Signal, internal};
use tokio::sync::broadcast;

use crate::{coordinator::CoordinatorClient, identity::Identity};

/// Reports liveness every interval. Failures are logged and never stop it.
#[derive(Debug)]
pub struct Heartbeat {
    client: CoordinatorClient,
    interval: Duration,
    agent_id: Option<String>,
}

impl Heartbeat {
    pub const fn new(client: CoordinatorClient, interval: Duration, agent_id: Option<String>) -> Self {
        Self {
            client,
            interval,
            agent_id,
        }
    }

    /// One heartbeat. Returns whether the coordinator acknowledged it.
    pub async fn beat(&self) -> bool {
        let identity = match Identity::gather(self.agent_id.as_deref()) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine agent identity, skipping heartbeat");
                return false;
            }
        };

        match self.client.heartbeat(&identity).await {
            Ok(()) => {
                tracing::trace!(id = %identity.id, "Heartbeat acknowledged");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat failed");
                false
            }
        }
    }

    /// Beats until shutdown, which is also observed mid-request.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        if self.interval.is_zero() {
            tracing::error!("Heartbeat interval is zero, heartbeat not started");
            return;
        }

        internal!(level = INFO, "Heartbeat starting");

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    tokio::select! {
                        _ = self.beat() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                sig = shutdown.recv() => {
                    if let Err(e) = sig {
                        tracing::error!(error = %e, "Heartbeat shutdown channel error");
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Heartbeat stopped");
    }
}
