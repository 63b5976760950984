//! The poll, build, send, classify and confirm cycle.

use std::{future::Future, pin::Pin, time::Duration};

use relay_common::{SendTask, Signal, TaskError, internal};
use tokio::sync::broadcast;

use crate::{
    classify::Classification,
    coordinator::CoordinatorClient,
    error::{AgentError, RequestError},
    message::Message,
    transaction::{self, SmtpSettings},
};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub poll_interval: Duration,
    pub confirm_attempts: u32,
    pub confirm_backoff: Duration,
    /// Consecutive unreachable polls tolerated; 0 tolerates any number.
    pub max_poll_failures: u32,
    pub smtp: SmtpSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            confirm_attempts: 3,
            confirm_backoff: Duration::from_secs(1),
            max_poll_failures: 12,
            smtp: SmtpSettings::default(),
        }
    }
}

/// Where a fetched task ended up.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The message could not be built; nothing was sent or confirmed.
    Abandoned(TaskError),
    Confirmed { success: bool, attempts: u32 },
    /// Sent (or not), but the coordinator never acknowledged the outcome.
    Unconfirmed { success: bool },
    /// Shutdown arrived mid-cycle. Any task in hand was dropped unconfirmed.
    Interrupted,
}

#[derive(Debug)]
pub struct Dispatcher {
    client: CoordinatorClient,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub const fn new(client: CoordinatorClient, settings: DispatchSettings) -> Self {
        Self { client, settings }
    }

    /// Runs one task through build, send and confirm.
    pub async fn process(&self, task: &SendTask) -> TaskOutcome {
        self.process_until(task, std::pin::pin!(std::future::pending::<()>()))
            .await
    }

    /// Like [`process`](Self::process), but gives up on the submission or the
    /// confirmation as soon as `stop` completes.
    async fn process_until<F>(&self, task: &SendTask, mut stop: Pin<&mut F>) -> TaskOutcome
    where
        F: Future + Send,
    {
        let message = match Message::build(task) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Cannot build message, abandoning task");
                return TaskOutcome::Abandoned(e);
            }
        };
        for skipped in &message.skipped {
            tracing::warn!(task_id = %task.id, address = %skipped, "Skipping malformed recipient");
        }

        let submission = transaction::send(&task.server, task.auth.as_ref(), &message, &self.settings.smtp);
        let result = tokio::select! {
            result = submission => result,
            _ = &mut stop => {
                tracing::warn!(task_id = %task.id, "Shutdown during submission, abandoning task");
                return TaskOutcome::Interrupted;
            }
        };
        let classification = Classification::of(&result);
        classification.log(&task.id, &result);
        let success = classification.success();

        let confirmation = self.client.confirm_with_retry(
            &task.id,
            success,
            self.settings.confirm_attempts,
            self.settings.confirm_backoff,
        );
        let confirmed = tokio::select! {
            confirmed = confirmation => confirmed,
            _ = &mut stop => {
                tracing::warn!(task_id = %task.id, success, "Shutdown before the outcome was confirmed");
                return TaskOutcome::Interrupted;
            }
        };

        match confirmed {
            Ok(attempts) => {
                tracing::debug!(task_id = %task.id, success, attempts, "Outcome confirmed");
                TaskOutcome::Confirmed { success, attempts }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Abandoning confirmation");
                TaskOutcome::Unconfirmed { success }
            }
        }
    }

    /// Polls once and processes the task if one was waiting.
    ///
    /// # Errors
    ///
    /// Whatever stopped the poll; task-level failures are not errors.
    pub async fn tick(&self) -> Result<Option<TaskOutcome>, RequestError> {
        self.tick_until(std::future::pending::<()>()).await
    }

    /// One poll that stops waiting as soon as `stop` completes, reporting
    /// [`TaskOutcome::Interrupted`].
    async fn tick_until<F>(&self, stop: F) -> Result<Option<TaskOutcome>, RequestError>
    where
        F: Future + Send,
    {
        let mut stop = std::pin::pin!(stop);

        let fetched = tokio::select! {
            fetched = self.client.fetch() => fetched?,
            _ = &mut stop => return Ok(Some(TaskOutcome::Interrupted)),
        };
        let Some(task) = fetched else {
            return Ok(None);
        };

        tracing::debug!(task_id = %task.id, recipients = task.recipient_count(), "Received task");
        Ok(Some(self.process_until(&task, stop.as_mut()).await))
    }

    /// Polls until shutdown. The signal is also watched while a poll, a
    /// submission or a confirmation is under way, which are abandoned.
    ///
    /// # Errors
    ///
    /// [`AgentError::CoordinatorUnreachable`] once too many consecutive polls
    /// fail to reach the coordinator, or [`AgentError::Cycle`] for a zero
    /// poll interval.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), AgentError> {
        if self.settings.poll_interval.is_zero() {
            return Err(AgentError::Cycle("poll interval is zero".to_string()));
        }

        internal!(level = INFO, "Dispatcher starting");

        let mut timer = tokio::time::interval(self.settings.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.tick_until(shutdown.recv()).await {
                        Ok(Some(TaskOutcome::Interrupted)) => {
                            internal!(level = INFO, "Dispatcher interrupted by shutdown");
                            break;
                        }
                        Ok(_) => failures = 0,
                        Err(e) if e.is_transport() => {
                            failures += 1;
                            tracing::warn!(error = %e, failures, "Could not reach coordinator");
                            let limit = self.settings.max_poll_failures;
                            if limit > 0 && failures >= limit {
                                return Err(AgentError::CoordinatorUnreachable { failures });
                            }
                        }
                        Err(e) => {
                            failures = 0;
                            tracing::warn!(error = %e, "Poll failed");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    if let Err(e) = sig {
                        tracing::error!(error = %e, "Dispatcher shutdown channel error");
                    }
                    break;
                }
            }
        }

        internal!(level = INFO, "Dispatcher stopped");
        Ok(())
    }
}
