//! Boots a real coordinator on an ephemeral port.
#![allow(dead_code)] // Not every test uses every helper

use std::{net::SocketAddr, sync::Arc};

use relay_common::{EmailAddress, SendTask, Signal, SmtpServer};
use relay_coordinator::{
    AppState, Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorServer,
    MemoryRecordStore, ReconcileConfig,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

pub struct RunningCoordinator {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<Result<(), CoordinatorError>>,
}

impl RunningCoordinator {
    pub async fn start(queue_capacity: usize, max_retries: u32) -> Self {
        let config = CoordinatorConfig {
            queue_capacity,
            reconcile: ReconcileConfig {
                interval_secs: 1,
                max_retries,
                registry_ttl_secs: 3600,
            },
            ..CoordinatorConfig::default()
        };

        let coordinator = Coordinator::with_store(config, Arc::new(MemoryRecordStore::new()));
        let state = coordinator.state().clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CoordinatorServer::from_listener(listener, coordinator.router());

        let (shutdown, _) = broadcast::channel(4);
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { coordinator.run(server, &shutdown).await }
        });

        Self {
            addr,
            state,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(Signal::Shutdown);
        self.handle.await.unwrap().unwrap();
    }
}

pub fn task(id: &str, recipients: &[&str]) -> SendTask {
    SendTask {
        id: id.to_string(),
        server: SmtpServer {
            host: "smtp.example.com".to_string(),
            port: Some(465),
        },
        auth: None,
        from: EmailAddress::new("Sender", "sender@example.com"),
        to: recipients.iter().map(|addr| EmailAddress::bare(*addr)).collect(),
        cc: vec![],
        bcc: vec![],
        priority: None,
        user_agent: None,
        content_type: "text/plain".to_string(),
        subject: "Subject".to_string(),
        body: "Body".to_string(),
        attachments: vec![],
    }
}
