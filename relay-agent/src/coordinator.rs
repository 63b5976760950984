//! HTTP client for the coordinator's agent-facing endpoints.

use std::time::Duration;

use relay_common::{
    SendTask, outgoing,
    wire::{CONFIRM_PATH, ConfirmRequest, Envelope, FETCH_PATH, HEARTBEAT_PATH, HeartbeatRequest},
};
use reqwest::StatusCode;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{AgentError, ConfirmError, RequestError},
    identity::Identity,
};

/// One shared connection pool bound to the coordinator's base address.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    /// # Errors
    ///
    /// If the address is not an absolute http(s) URL or the client cannot be
    /// built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let base_url = base_url.trim_end_matches('/');
        match reqwest::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(AgentError::Address(base_url.to_string())),
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("relay-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AgentError::Client)?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<(StatusCode, Envelope<T>), RequestError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        outgoing!("POST {url}");

        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let envelope = serde_json::from_slice::<Envelope<T>>(&bytes).map_err(|e| {
            if status.is_success() {
                RequestError::Malformed(e.to_string())
            } else {
                RequestError::Status {
                    status: status.as_u16(),
                    msg: String::from_utf8_lossy(&bytes).into_owned(),
                }
            }
        })?;

        Ok((status, envelope))
    }

    /// # Errors
    ///
    /// If the coordinator cannot be reached or refuses the heartbeat.
    pub async fn heartbeat(&self, identity: &Identity) -> Result<(), RequestError> {
        let request = HeartbeatRequest {
            id: identity.id.clone(),
            hostname: identity.hostname.clone(),
        };
        let (status, envelope) = self.post::<_, ()>(HEARTBEAT_PATH, &request).await?;
        accepted(status, &envelope)
    }

    /// Asks for the next task. `None` when the queue is empty or the
    /// coordinator is temporarily unavailable.
    ///
    /// # Errors
    ///
    /// [`RequestError::Transport`] if the coordinator cannot be reached,
    /// otherwise a status or decoding error.
    pub async fn fetch(&self) -> Result<Option<SendTask>, RequestError> {
        let (status, envelope) = match self.post::<_, SendTask>(FETCH_PATH, &()).await {
            Err(RequestError::Status { status: 503, .. }) => return Ok(None),
            other => other?,
        };

        match status {
            StatusCode::OK => Ok(envelope.success.then_some(envelope.payload).flatten()),
            StatusCode::SERVICE_UNAVAILABLE => Ok(None),
            status => Err(RequestError::Status {
                status: status.as_u16(),
                msg: envelope.msg,
            }),
        }
    }

    /// # Errors
    ///
    /// If the confirmation is not acknowledged.
    pub async fn confirm(&self, id: &str, success: bool) -> Result<(), RequestError> {
        let request = ConfirmRequest {
            id: id.to_string(),
            success,
        };
        let (status, envelope) = self.post::<_, ()>(CONFIRM_PATH, &request).await?;
        accepted(status, &envelope)
    }

    /// Confirms, making up to `attempts` tries `backoff` apart. Returns the
    /// number of attempts used.
    ///
    /// # Errors
    ///
    /// The last failure, once every attempt has failed.
    pub async fn confirm_with_retry(
        &self,
        id: &str,
        success: bool,
        attempts: u32,
        backoff: Duration,
    ) -> Result<u32, ConfirmError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.confirm(id, success).await {
                Ok(()) => return Ok(attempt),
                Err(last) if attempt >= attempts => {
                    return Err(ConfirmError {
                        id: id.to_string(),
                        attempts,
                        last,
                    });
                }
                Err(e) => {
                    tracing::warn!(task_id = %id, attempt, attempts, error = %e, "Confirmation failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn accepted<T>(status: StatusCode, envelope: &Envelope<T>) -> Result<(), RequestError> {
    if status == StatusCode::OK && envelope.success {
        Ok(())
    } else {
        Err(RequestError::Status {
            status: status.as_u16(),
            msg: envelope.msg.clone(),
        })
    }
}
