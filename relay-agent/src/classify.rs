//! Decides whether a submission counts as delivered.
//!
//! | error text contains                        | hand-off | outcome | severity |
//! |--------------------------------------------|----------|---------|----------|
//! | `535`, `authentication failed`             | any      | failed  | error    |
//! | `reset`, `eof`, `closed`, `not connected`,<br>`already closed` (transport error only) | yes | delivered | debug |
//! | anything else                              | any      | failed  | warn     |
//! | no error                                   |          | delivered | trace  |
//!
//! Matching is case-insensitive. Some relays drop the connection right after
//! accepting the DATA terminator instead of replying; the message is queued
//! on their side, so those drops count as delivered.

use std::fmt;

use crate::transaction::SendError;

pub const AUTH_FAILURE_PATTERNS: &[&str] = &["535", "authentication failed"];

pub const POST_SUBMISSION_PATTERNS: &[&str] =
    &["reset", "eof", "closed", "not connected", "already closed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Delivered,
    AuthFailure,
    PostSubmission,
    Other,
}

impl Classification {
    pub fn of(result: &Result<(), SendError>) -> Self {
        let Err(failure) = result else {
            return Self::Delivered;
        };

        let text = failure.error.to_string().to_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

        if matches(AUTH_FAILURE_PATTERNS) {
            Self::AuthFailure
        } else if failure.handed_off
            && failure.error.is_transport()
            && matches(POST_SUBMISSION_PATTERNS)
        {
            Self::PostSubmission
        } else {
            Self::Other
        }
    }

    /// What gets confirmed to the coordinator.
    pub const fn success(self) -> bool {
        matches!(self, Self::Delivered | Self::PostSubmission)
    }

    /// Logs the outcome at the severity its class calls for.
    pub fn log(self, task_id: &str, result: &Result<(), SendError>) {
        let error = result.as_ref().err().map(|e| &e.error);
        match self {
            Self::Delivered => {
                tracing::trace!(task_id, "Message accepted by SMTP server");
            }
            Self::AuthFailure => {
                tracing::error!(task_id, error = ?error.map(ToString::to_string), "SMTP authentication failed");
            }
            Self::PostSubmission => {
                tracing::debug!(task_id, error = ?error.map(ToString::to_string), "Connection dropped after hand-off, treating as submitted");
            }
            Self::Other => {
                tracing::warn!(task_id, error = ?error.map(ToString::to_string), "SMTP submission failed");
            }
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delivered => "delivered",
            Self::AuthFailure => "auth-failure",
            Self::PostSubmission => "post-submission",
            Self::Other => "failed",
        })
    }
}
