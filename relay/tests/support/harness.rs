//! A coordinator, an agent and a mock SMTP server in one process.
#![allow(dead_code)] // Not every test uses every helper

use std::{net::SocketAddr, sync::Arc, time::Duration};

use relay_agent::{Agent, AgentConfig, AgentError};
use relay_common::{
    EmailAddress, SendTask, Signal, SmtpAuth, SmtpServer,
    wire::{AGENTS_PATH, Envelope, SubmitReceipt, TASKS_PATH},
};
use relay_coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorServer, DeliveryRecord,
    DeliveryStatus, MemoryRecordStore, ReconcileConfig, roster::AgentStatus,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use super::mock_smtp::{MockSmtpServer, MockSmtpServerBuilder};

pub struct Harness {
    pub coordinator_addr: SocketAddr,
    pub smtp: MockSmtpServer,
    http: reqwest::Client,
    shutdown: broadcast::Sender<Signal>,
    coordinator: JoinHandle<Result<(), CoordinatorError>>,
    agent: JoinHandle<Result<(), AgentError>>,
}

impl Harness {
    pub async fn start(smtp: MockSmtpServerBuilder) -> Self {
        let smtp = smtp.build().await.unwrap();

        let config = CoordinatorConfig {
            reconcile: ReconcileConfig {
                interval_secs: 1,
                max_retries: 10,
                registry_ttl_secs: 3600,
            },
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::with_store(config, Arc::new(MemoryRecordStore::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let coordinator_addr = listener.local_addr().unwrap();
        let server = CoordinatorServer::from_listener(listener, coordinator.router());

        let (shutdown, _) = broadcast::channel(16);
        let coordinator = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { coordinator.run(server, &shutdown).await }
        });

        let agent_config = AgentConfig {
            host: coordinator_addr.ip().to_string(),
            port: coordinator_addr.port(),
            agent_id: Some("e2e-agent".to_string()),
            heartbeat_interval: 1,
            poll_interval: 1,
            smtp_timeout: 5,
            confirm_backoff_ms: 100,
            accept_invalid_certs: true,
            ..AgentConfig::default()
        };
        let agent = Agent::new(&agent_config).unwrap();
        let agent = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { agent.run(&shutdown).await }
        });

        Self {
            coordinator_addr,
            smtp,
            http: reqwest::Client::new(),
            shutdown,
            coordinator,
            agent,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.coordinator_addr)
    }

    pub fn task(&self, id: &str) -> SendTask {
        SendTask {
            id: id.to_string(),
            server: SmtpServer {
                host: "127.0.0.1".to_string(),
                port: Some(self.smtp.port()),
            },
            auth: Some(SmtpAuth {
                user: "relay".to_string(),
                pass: "secret".to_string(),
            }),
            from: EmailAddress::new("Sender", "sender@example.com"),
            to: vec![EmailAddress::bare("to@example.com")],
            cc: vec![EmailAddress::bare("cc@example.com")],
            bcc: vec![],
            priority: None,
            user_agent: Some("relay-e2e".to_string()),
            content_type: "text/html".to_string(),
            subject: "End to end".to_string(),
            body: "<p>Hello</p>".to_string(),
            attachments: vec![],
        }
    }

    pub async fn submit(&self, task: &SendTask) -> SubmitReceipt {
        let envelope: Envelope<SubmitReceipt> = self
            .http
            .post(self.url(TASKS_PATH))
            .json(task)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        envelope.payload.unwrap()
    }

    pub async fn records(&self, id: &str) -> Vec<DeliveryRecord> {
        let envelope: Envelope<Vec<DeliveryRecord>> = self
            .http
            .get(self.url(&format!("{TASKS_PATH}/{id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        envelope.payload.unwrap_or_default()
    }

    /// Polls the status endpoint until every record for `id` is terminal.
    pub async fn wait_for_terminal(&self, id: &str, limit: Duration) -> Vec<DeliveryRecord> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let records = self.records(id).await;
            if !records.is_empty() && records.iter().all(|r| r.status != DeliveryStatus::Pending) {
                return records;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "records for {id} still pending: {records:?}"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn agents(&self) -> Vec<AgentStatus> {
        let envelope: Envelope<Vec<AgentStatus>> = self
            .http
            .get(self.url(AGENTS_PATH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        envelope.payload.unwrap_or_default()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(Signal::Shutdown);
        self.agent.await.unwrap().unwrap();
        self.coordinator.await.unwrap().unwrap();
        self.smtp.shutdown();
    }
}
