//! Durable per-recipient delivery records.

use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_common::{RecipientRole, SendTask};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Ids handed out by this process, strictly increasing even within one
/// millisecond.
static IDS: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Unique identifier for a delivery record.
///
/// Ids come from a monotonic ULID generator, so records listed by id come
/// back in the order they were created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    #[must_use]
    pub fn new() -> Self {
        // Overflow needs 2^80 ids in one millisecond.
        Self(IDS.lock().generate().unwrap_or_else(|_| Ulid::new()))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RecordId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Fail,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Fail => "fail",
        })
    }
}

/// One row per (task, recipient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: RecordId,
    pub task_id: String,
    pub from: String,
    pub to: String,
    pub role: RecipientRole,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    pub fn pending(
        task_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        role: RecipientRole,
    ) -> Self {
        Self {
            id: RecordId::new(),
            task_id: task_id.into(),
            from: from.into(),
            to: to.into(),
            role,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            last_checked_at: None,
            sent_at: None,
        }
    }

    /// One pending record for every recipient of `task`.
    pub fn for_task(task: &SendTask) -> Vec<Self> {
        task.recipients()
            .map(|(role, addr)| Self::pending(&task.id, &task.from.addr, &addr.addr, role))
            .collect()
    }

    pub fn apply(&mut self, update: &RecordUpdate) {
        self.status = update.status;
        self.retry_count = update.retry_count;
        self.last_checked_at = Some(update.last_checked_at);
        if update.sent_at.is_some() {
            self.sent_at = update.sent_at;
        }
    }
}

/// The fields a reconciliation pass writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub last_checked_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    /// A terminal transition, stamping both timestamps with `now`.
    pub const fn terminal(status: DeliveryStatus, retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            status,
            retry_count,
            last_checked_at: now,
            sent_at: Some(now),
        }
    }

    /// Still pending; only the check time moves.
    pub const fn still_pending(retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Pending,
            retry_count,
            last_checked_at: now,
            sent_at: None,
        }
    }
}
