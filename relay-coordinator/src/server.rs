//! HTTP surface: agent dispatch protocol, task submission and health checks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relay_common::{
    SendTask, Signal, incoming, internal,
    wire::{
        AGENTS_PATH, CONFIRM_PATH, ConfirmRequest, Envelope, FETCH_PATH, HEARTBEAT_PATH,
        HeartbeatRequest, SubmitReceipt, TASKS_PATH,
    },
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::timeout::TimeoutLayer;

use crate::{
    error::{CoordinatorError, QueueError},
    queue::DispatchQueue,
    record::DeliveryRecord,
    registry::VerificationRegistry,
    roster::{AgentRoster, AgentStatus, EVICT_AFTER_STALE_PERIODS},
    store::RecordStore,
};

/// Handles shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub queue: Arc<DispatchQueue>,
    pub registry: Arc<VerificationRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub roster: Arc<AgentRoster>,
    pub reconciler_running: Arc<AtomicBool>,
    pub agent_stale_after: Duration,
}

/// Body of `GET /health/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub reconciler_running: bool,
    pub queue_occupied: usize,
    pub queue_capacity: usize,
    pub agents_alive: usize,
}

impl AppState {
    pub fn readiness(&self) -> ReadinessStatus {
        let reconciler_running = self.reconciler_running.load(Ordering::Relaxed);
        let (queue_occupied, remaining) = self.queue.snapshot();

        ReadinessStatus {
            ready: reconciler_running && remaining > 0,
            reconciler_running,
            queue_occupied,
            queue_capacity: self.queue.capacity(),
            agents_alive: self.roster.alive(self.agent_stale_after),
        }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route(HEARTBEAT_PATH, post(heartbeat))
        .route(FETCH_PATH, post(fetch))
        .route(CONFIRM_PATH, post(confirm))
        .route(TASKS_PATH, post(submit))
        .route(&format!("{TASKS_PATH}/{{id}}"), get(status))
        .route(AGENTS_PATH, get(agents))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
}

fn reply<T: Serialize>(status: StatusCode, envelope: Envelope<T>) -> Response {
    (status, Json(envelope)).into_response()
}

fn bad_request(rejection: &JsonRejection) -> Response {
    incoming!(level = DEBUG, error = %rejection, "Rejected malformed request body");
    reply(
        StatusCode::BAD_REQUEST,
        Envelope::<()>::failure(rejection.body_text()),
    )
}

async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let Json(beat) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(&rejection),
    };

    incoming!(agent = %beat.id, hostname = %beat.hostname, "Heartbeat");
    let (id, hostname) = (beat.id.clone(), beat.hostname.clone());
    if state.roster.heartbeat(beat) {
        incoming!(level = INFO, agent = %id, %hostname, "New agent registered");

        let silent_for = state.agent_stale_after.saturating_mul(EVICT_AFTER_STALE_PERIODS);
        for agent in state.roster.evict(silent_for) {
            internal!(level = DEBUG, %agent, "Forgot silent agent");
        }
    }

    reply(StatusCode::OK, Envelope::ack())
}

async fn fetch(State(state): State<AppState>) -> Response {
    match state.queue.dequeue() {
        Ok(task) => {
            incoming!(level = DEBUG, task_id = %task.id, "Dispatched task to agent");
            reply(StatusCode::OK, Envelope::ok(task))
        }
        Err(QueueError::Empty | QueueError::Full) => {
            reply(StatusCode::OK, Envelope::<SendTask>::failure("no task available"))
        }
    }
}

async fn confirm(
    State(state): State<AppState>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Response {
    let Json(confirmation) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(&rejection),
    };

    incoming!(
        level = DEBUG,
        task_id = %confirmation.id,
        success = confirmation.success,
        "Delivery confirmation"
    );
    state
        .registry
        .report(confirmation.id, confirmation.success);

    reply(StatusCode::OK, Envelope::ack())
}

async fn submit(
    State(state): State<AppState>,
    body: Result<Json<SendTask>, JsonRejection>,
) -> Response {
    let Json(task) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(&rejection),
    };

    if let Err(e) = task.validate() {
        incoming!(level = DEBUG, task_id = %task.id, error = %e, "Rejected invalid task");
        return reply(
            StatusCode::BAD_REQUEST,
            Envelope::<()>::failure(e.to_string()),
        );
    }

    let records = DeliveryRecord::for_task(&task);
    let receipt = SubmitReceipt {
        id: task.id.clone(),
        records: records.len(),
    };

    if let Err(e) = state.queue.enqueue(task) {
        incoming!(level = DEBUG, task_id = %receipt.id, error = %e, "Rejected task");
        return reply(
            StatusCode::TOO_MANY_REQUESTS,
            Envelope::<()>::failure("queue is full"),
        );
    }

    if let Err(e) = state.store.insert(records).await {
        tracing::error!(task_id = %receipt.id, error = %e, "Task queued but its delivery records were not stored");
    }

    incoming!(task_id = %receipt.id, records = receipt.records, "Task queued");
    reply(StatusCode::OK, Envelope::ok(receipt))
}

async fn status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.store.find_by_task(&task_id).await {
        Ok(records) if records.is_empty() => reply(
            StatusCode::NOT_FOUND,
            Envelope::<()>::failure(format!("no records for task {task_id}")),
        ),
        Ok(records) => reply(StatusCode::OK, Envelope::ok(records)),
        Err(e) => {
            tracing::error!(%task_id, error = %e, "Failed to load delivery records");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                Envelope::<()>::failure("failed to load delivery records"),
            )
        }
    }
}

async fn agents(State(state): State<AppState>) -> Json<Envelope<Vec<AgentStatus>>> {
    Json(Envelope::ok(state.roster.list(state.agent_stale_after)))
}

async fn liveness() -> Response {
    (StatusCode::OK, "OK").into_response()
}

async fn readiness(State(state): State<AppState>) -> Response {
    let status = state.readiness();
    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            reconciler_running = status.reconciler_running,
            queue_occupied = status.queue_occupied,
            queue_capacity = status.queue_capacity,
            "Readiness check failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

/// A bound listener plus the router it will serve.
pub struct CoordinatorServer {
    listener: TcpListener,
    router: Router,
}

impl CoordinatorServer {
    /// Bind `address`.
    ///
    /// # Errors
    ///
    /// If the address cannot be bound.
    pub async fn bind(address: &str, router: Router) -> Result<Self, CoordinatorError> {
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|source| CoordinatorError::Bind {
                    address: address.to_string(),
                    source,
                })?;

        Ok(Self::from_listener(listener, router))
    }

    pub const fn from_listener(listener: TcpListener, router: Router) -> Self {
        Self { listener, router }
    }

    /// The bound address, useful when binding port 0.
    ///
    /// # Errors
    ///
    /// If the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a shutdown signal arrives, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// If the server fails while running.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), CoordinatorError> {
        if let Ok(address) = self.listener.local_addr() {
            internal!(level = INFO, %address, "Coordinator listening");
        }

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                internal!(level = INFO, "HTTP server received shutdown signal");
            })
            .await
            .map_err(|e| CoordinatorError::Server(e.to_string()))?;

        internal!(level = INFO, "HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http_body_util::BodyExt;
    use relay_common::{EmailAddress, SmtpServer};
    use tower::ServiceExt;

    use super::*;
    use crate::store::MemoryRecordStore;

    fn state(capacity: usize) -> AppState {
        AppState {
            queue: Arc::new(DispatchQueue::new(capacity)),
            registry: Arc::new(VerificationRegistry::new()),
            store: Arc::new(MemoryRecordStore::new()),
            roster: Arc::new(AgentRoster::new()),
            reconciler_running: Arc::new(AtomicBool::new(true)),
            agent_stale_after: Duration::from_secs(30),
        }
    }

    fn task(id: &str) -> SendTask {
        SendTask {
            id: id.to_string(),
            server: SmtpServer {
                host: "smtp.example.com".to_string(),
                port: None,
            },
            auth: None,
            from: EmailAddress::bare("from@example.com"),
            to: vec![EmailAddress::bare("to@example.com")],
            cc: vec![EmailAddress::bare("cc@example.com")],
            bcc: vec![],
            priority: None,
            user_agent: None,
            content_type: "text/plain".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            attachments: vec![],
        }
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |json| Body::from(json.to_string())))
            .unwrap();

        let response = router(state.clone(), Duration::from_secs(5))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_fetch_empty_queue_is_ok_without_payload() {
        let state = state(1);
        let (status, body) = call(&state, "POST", FETCH_PATH, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["payload"].is_null());
    }

    #[tokio::test]
    async fn test_submit_then_fetch() {
        let state = state(1);
        let (status, body) = call(
            &state,
            "POST",
            TASKS_PATH,
            Some(serde_json::to_value(task("t1")).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payload"]["records"], 2);
        assert_eq!(state.store.find_pending().await.unwrap().len(), 2);

        let (status, body) = call(&state, "POST", FETCH_PATH, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["payload"]["id"], "t1");
        assert_eq!(state.queue.remaining(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_task() {
        let state = state(4);
        let mut bad = task("t1");
        bad.content_type = "application/pdf".to_string();

        let (status, body) = call(
            &state,
            "POST",
            TASKS_PATH,
            Some(serde_json::to_value(bad).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(state.queue.occupied(), 0);
        assert!(state.store.find_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_full_queue_is_too_many_requests() {
        let state = state(1);
        let body = serde_json::to_value(task("t1")).unwrap();
        call(&state, "POST", TASKS_PATH, Some(body)).await;

        let (status, body) = call(
            &state,
            "POST",
            TASKS_PATH,
            Some(serde_json::to_value(task("t2")).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["msg"], "queue is full");
        assert!(state.store.find_by_task("t2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let state = state(1);
        let (status, body) = call(
            &state,
            "POST",
            CONFIRM_PATH,
            Some(serde_json::json!({"id": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_confirm_lands_in_registry() {
        let state = state(1);
        let (status, _) = call(
            &state,
            "POST",
            CONFIRM_PATH,
            Some(serde_json::json!({"id": "t1", "success": true})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.registry.check("t1"),
            crate::registry::DeliveryOutcome::Success
        );
    }

    #[tokio::test]
    async fn test_task_status_lookup() {
        let state = state(2);
        let (status, _) = call(&state, "GET", "/tasks/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(
            &state,
            "POST",
            TASKS_PATH,
            Some(serde_json::to_value(task("t1")).unwrap()),
        )
        .await;
        let (status, body) = call(&state, "GET", "/tasks/t1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payload"].as_array().unwrap().len(), 2);
        assert_eq!(body["payload"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_heartbeat_populates_roster() {
        let state = state(1);
        let (status, _) = call(
            &state,
            "POST",
            HEARTBEAT_PATH,
            Some(serde_json::json!({"id": "machine", "hostname": "host-a"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&state, "GET", AGENTS_PATH, None).await;
        assert_eq!(body["payload"][0]["hostname"], "host-a");
        assert_eq!(body["payload"][0]["alive"], true);
    }

    #[tokio::test]
    async fn test_liveness_check_always_passes() {
        let response = liveness().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_follows_reconciler_and_queue() {
        let state = state(1);
        let response = readiness(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        state.queue.enqueue(task("t1")).unwrap();
        let response = readiness(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.queue.dequeue().unwrap();
        state.reconciler_running.store(false, Ordering::Relaxed);
        let response = readiness(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
