//! Just enough of the coordinator's agent-facing API to drive an agent.
#![allow(dead_code)] // Not every test uses every helper

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use relay_common::{
    SendTask,
    wire::{CONFIRM_PATH, ConfirmRequest, Envelope, FETCH_PATH, HEARTBEAT_PATH, HeartbeatRequest},
};
use tokio::net::TcpListener;

#[derive(Default)]
struct Inner {
    tasks: Mutex<VecDeque<SendTask>>,
    confirmations: Mutex<Vec<ConfirmRequest>>,
    heartbeats: Mutex<Vec<HeartbeatRequest>>,
    confirm_attempts: AtomicUsize,
    /// Confirmation attempts answered with 500 before any is accepted.
    failing_confirms: AtomicUsize,
}

#[derive(Clone)]
pub struct MockCoordinator {
    addr: SocketAddr,
    inner: Arc<Inner>,
}

impl MockCoordinator {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());

        let router = Router::new()
            .route(FETCH_PATH, post(fetch))
            .route(CONFIRM_PATH, post(confirm))
            .route(HEARTBEAT_PATH, post(heartbeat))
            .with_state(Arc::clone(&inner));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, inner }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn push(&self, task: SendTask) {
        self.inner.tasks.lock().unwrap().push_back(task);
    }

    pub fn fail_confirms(&self, count: usize) {
        self.inner.failing_confirms.store(count, Ordering::SeqCst);
    }

    pub fn confirmations(&self) -> Vec<ConfirmRequest> {
        self.inner.confirmations.lock().unwrap().clone()
    }

    pub fn confirm_attempts(&self) -> usize {
        self.inner.confirm_attempts.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatRequest> {
        self.inner.heartbeats.lock().unwrap().clone()
    }
}

async fn fetch(State(inner): State<Arc<Inner>>) -> Json<Envelope<SendTask>> {
    let task = inner.tasks.lock().unwrap().pop_front();
    Json(task.map_or_else(|| Envelope::failure("no task available"), Envelope::ok))
}

async fn confirm(
    State(inner): State<Arc<Inner>>,
    Json(request): Json<ConfirmRequest>,
) -> (StatusCode, Json<Envelope<()>>) {
    let attempt = inner.confirm_attempts.fetch_add(1, Ordering::SeqCst);
    if attempt < inner.failing_confirms.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Envelope::failure("try again")),
        );
    }

    inner.confirmations.lock().unwrap().push(request);
    (StatusCode::OK, Json(Envelope::ack()))
}

async fn heartbeat(
    State(inner): State<Arc<Inner>>,
    Json(request): Json<HeartbeatRequest>,
) -> Json<Envelope<()>> {
    inner.heartbeats.lock().unwrap().push(request);
    Json(Envelope::ack())
}
