use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::transaction::{IMPLICIT_TLS_PORT, SmtpSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Pulls mail from a relay coordinator and submits it over SMTP
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-agent", version)]
pub struct AgentConfig {
    /// Coordinator host name or address
    #[arg(long, env = "RELAY_HOST")]
    pub host: String,

    /// Coordinator port
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "RELAY_SCHEME", value_enum, default_value_t = Scheme::Http)]
    pub scheme: Scheme,

    /// Log at debug level unless LOG_LEVEL says otherwise
    #[arg(long, env = "RELAY_DEBUG")]
    pub debug: bool,

    /// Identify as this agent instead of the machine id
    #[arg(long, env = "RELAY_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_interval: u64,

    /// Seconds between polls for work
    #[arg(long, env = "RELAY_POLL_INTERVAL", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Seconds allowed for the SMTP connection and for each reply
    #[arg(long, env = "RELAY_SMTP_TIMEOUT", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub smtp_timeout: u64,

    /// Confirmation attempts before giving up on a task
    #[arg(long, env = "RELAY_CONFIRM_RETRIES", default_value_t = 3)]
    pub confirm_retries: u32,

    #[arg(long, env = "RELAY_CONFIRM_BACKOFF_MS", default_value_t = 1000)]
    pub confirm_backoff_ms: u64,

    /// Seconds allowed for each request to the coordinator
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout: u64,

    /// Consecutive unreachable polls before the agent exits, 0 to never exit
    #[arg(long, env = "RELAY_MAX_POLL_FAILURES", default_value_t = 12)]
    pub max_poll_failures: u32,

    /// Allow plaintext SMTP when STARTTLS is not offered (testing only)
    #[arg(long, env = "RELAY_INSECURE_SMTP")]
    pub insecure_smtp: bool,

    /// Accept any TLS certificate from SMTP servers (testing only)
    #[arg(long, env = "RELAY_ACCEPT_INVALID_CERTS")]
    pub accept_invalid_certs: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            scheme: Scheme::Http,
            debug: false,
            agent_id: None,
            heartbeat_interval: 5,
            poll_interval: 5,
            smtp_timeout: 10,
            confirm_retries: 3,
            confirm_backoff_ms: 1000,
            request_timeout: 10,
            max_poll_failures: 12,
            insecure_smtp: false,
            accept_invalid_certs: false,
        }
    }
}

impl AgentConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub const fn confirm_backoff(&self) -> Duration {
        Duration::from_millis(self.confirm_backoff_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn smtp_settings(&self, helo_name: &str) -> SmtpSettings {
        SmtpSettings {
            timeout: Duration::from_secs(self.smtp_timeout),
            helo_name: helo_name.to_string(),
            require_tls: !self.insecure_smtp,
            accept_invalid_certs: self.accept_invalid_certs,
            implicit_tls_port: IMPLICIT_TLS_PORT,
        }
    }
}
