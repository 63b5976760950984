//! In-memory record of outcomes agents have reported.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;

/// What the coordinator knows about a task's delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryOutcome {
    /// No confirmation is waiting.
    Unknown,
    Success,
    Failed,
}

impl From<bool> for DeliveryOutcome {
    fn from(success: bool) -> Self {
        if success { Self::Success } else { Self::Failed }
    }
}

#[derive(Debug, Clone, Copy)]
struct Report {
    success: bool,
    reported_at: Instant,
}

/// Confirmations keyed by task id.
///
/// Agents write with [`report`](Self::report); the reconciler consumes with
/// [`check`](Self::check), which removes the entry so each confirmation is
/// observed once.
#[derive(Debug, Default)]
pub struct VerificationRegistry {
    reports: Mutex<HashMap<String, Report>>,
}

impl VerificationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, replacing any earlier report for the same task.
    pub fn report(&self, task_id: impl Into<String>, success: bool) {
        self.reports.lock().insert(
            task_id.into(),
            Report {
                success,
                reported_at: Instant::now(),
            },
        );
    }

    /// Take the outcome for `task_id`, leaving no entry behind.
    pub fn check(&self, task_id: &str) -> DeliveryOutcome {
        self.reports
            .lock()
            .remove(task_id)
            .map_or(DeliveryOutcome::Unknown, |report| report.success.into())
    }

    /// Put back an outcome taken by [`check`](Self::check) that could not be
    /// persisted. A report that arrived in the meantime wins.
    ///
    /// Returns whether the outcome was restored.
    pub fn restore(&self, task_id: &str, outcome: DeliveryOutcome) -> bool {
        let success = match outcome {
            DeliveryOutcome::Unknown => return false,
            DeliveryOutcome::Success => true,
            DeliveryOutcome::Failed => false,
        };

        let mut reports = self.reports.lock();
        if reports.contains_key(task_id) {
            return false;
        }

        reports.insert(
            task_id.to_string(),
            Report {
                success,
                reported_at: Instant::now(),
            },
        );
        true
    }

    /// Drop reports older than `ttl`, returning the task ids removed.
    pub fn prune(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut removed = Vec::new();

        self.reports.lock().retain(|task_id, report| {
            let keep = now.saturating_duration_since(report.reported_at) < ttl;
            if !keep {
                removed.push(task_id.clone());
            }
            keep
        });

        removed
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}
