//! Periodic promotion of pending delivery records to terminal states.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use relay_common::{Signal, internal};
use tokio::sync::broadcast;

use crate::{
    config::ReconcileConfig,
    error::StoreError,
    record::{DeliveryRecord, DeliveryStatus, RecordUpdate},
    registry::{DeliveryOutcome, VerificationRegistry},
    store::RecordStore,
};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records forced to `fail` after running out of checks.
    pub exhausted: usize,
    pub still_pending: usize,
    pub store_errors: usize,
    /// Stale confirmations dropped from the registry.
    pub pruned: usize,
}

/// Cross-references pending records against agent confirmations.
///
/// A task fans out to one record per recipient but is confirmed once, so
/// the registry is checked once per task id and the outcome is applied to
/// every pending record of that task. No lock is held across a store call.
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    registry: Arc<VerificationRegistry>,
    config: ReconcileConfig,
    running: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<VerificationRegistry>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag, `true` while [`serve`](Self::serve) is looping.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// Only when the pending records cannot be listed. Failures updating
    /// individual records are logged, counted and retried on the next pass.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();

        for task_id in self.registry.prune(self.config.registry_ttl()) {
            tracing::debug!(%task_id, "Dropped unconsumed confirmation");
            report.pruned += 1;
        }

        let pending = self.store.find_pending().await?;
        report.examined = pending.len();

        for (task_id, records) in group_by_task(pending) {
            let outcome = self.registry.check(&task_id);

            match outcome {
                DeliveryOutcome::Success | DeliveryOutcome::Failed => {
                    self.finish(&task_id, outcome, records, &mut report).await;
                }
                DeliveryOutcome::Unknown => {
                    for record in records {
                        self.count_unconfirmed(record, &mut report).await;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn finish(
        &self,
        task_id: &str,
        outcome: DeliveryOutcome,
        records: Vec<DeliveryRecord>,
        report: &mut TickReport,
    ) {
        let status = if outcome == DeliveryOutcome::Success {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Fail
        };

        let mut retry = false;
        for record in records {
            let update = RecordUpdate::terminal(status, record.retry_count, Utc::now());

            match self.store.update_status(record.id, update).await {
                Ok(_) if status == DeliveryStatus::Success => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    tracing::warn!(%task_id, record = %record.id, error = %e, "Failed to persist delivery outcome");
                    report.store_errors += 1;
                    retry |= e.is_transient();
                }
            }
        }

        if retry && self.registry.restore(task_id, outcome) {
            tracing::debug!(%task_id, ?outcome, "Confirmation kept for the next pass");
        }
    }

    async fn count_unconfirmed(&self, record: DeliveryRecord, report: &mut TickReport) {
        let retry_count = record.retry_count.saturating_add(1);
        let now = Utc::now();
        let exhausted = retry_count >= self.config.max_retries;

        let update = if exhausted {
            RecordUpdate::terminal(DeliveryStatus::Fail, retry_count, now)
        } else {
            RecordUpdate::still_pending(retry_count, now)
        };

        match self.store.update_status(record.id, update).await {
            Ok(_) if exhausted => {
                tracing::info!(
                    task_id = %record.task_id,
                    to = %record.to,
                    retry_count,
                    "No confirmation received, marking delivery failed"
                );
                report.exhausted += 1;
            }
            Ok(_) => report.still_pending += 1,
            Err(e) => {
                tracing::warn!(task_id = %record.task_id, record = %record.id, error = %e, "Failed to update pending record");
                report.store_errors += 1;
            }
        }
    }

    /// Tick on an interval until a shutdown signal arrives.
    ///
    /// A pass in progress always completes; the signal is observed between
    /// passes. A zero interval is refused and the reconciler never reports
    /// itself running.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        if self.config.interval().is_zero() {
            tracing::error!("Reconcile interval is zero, reconciler not started");
            return;
        }

        internal!(level = INFO, "Reconciler starting");
        let mut timer = tokio::time::interval(self.config.interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.running.store(true, Ordering::SeqCst);

        // The first tick completes immediately
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.tick().await {
                        Ok(report) if report.examined > 0 || report.pruned > 0 => {
                            tracing::debug!(?report, "Reconciliation pass complete");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to load pending records");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Reconciler received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Reconciler shutdown channel error");
                        }
                    }
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        internal!(level = INFO, "Reconciler stopped");
    }
}

/// Group records by task id, keeping first-seen order.
fn group_by_task(records: Vec<DeliveryRecord>) -> Vec<(String, Vec<DeliveryRecord>)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<DeliveryRecord>)> = Vec::new();

    for record in records {
        if let Some(&index) = positions.get(&record.task_id) {
            groups[index].1.push(record);
        } else {
            positions.insert(record.task_id.clone(), groups.len());
            groups.push((record.task_id.clone(), vec![record]));
        }
    }

    groups
}
