//! Coordinator configuration.
//!
//! Loaded from a RON file by the binary; every field has a default so an
//! empty `Coordinator ()` is a valid configuration.
//!
//! ```ron
//! Coordinator (
//!     listen_address: "[::]:8080",
//!     queue_capacity: 1024,
//!     reconcile: (
//!         interval_secs: 5,
//!         max_retries: 10,
//!     ),
//!     store: File(path: "/var/lib/relay/records"),
//! )
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, de::Error as _};

use crate::store::StoreConfig;

/// Rejects zero where it would panic a timer or refuse every task.
fn non_zero<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + PartialEq,
{
    let value = T::deserialize(deserializer)?;
    if value == T::default() {
        return Err(D::Error::custom("must be greater than zero"));
    }
    Ok(value)
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_max_retries() -> u32 {
    10
}

const fn default_registry_ttl_secs() -> u64 {
    3600
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_agent_stale_secs() -> u64 {
    30
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between ticks.
    #[serde(default = "default_interval_secs", deserialize_with = "non_zero")]
    pub interval_secs: u64,

    /// Unconfirmed checks before a pending record is forced to `fail`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long an unconsumed confirmation is kept.
    #[serde(default = "default_registry_ttl_secs")]
    pub registry_ttl_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_retries: default_max_retries(),
            registry_ttl_secs: default_registry_ttl_secs(),
        }
    }
}

impl ReconcileConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "Coordinator")]
pub struct CoordinatorConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_queue_capacity", deserialize_with = "non_zero")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Upper bound on handling a single HTTP request.
    #[serde(default = "default_request_timeout_secs", deserialize_with = "non_zero")]
    pub request_timeout_secs: u64,

    /// An agent not heard from in this long is reported as not alive.
    #[serde(default = "default_agent_stale_secs", deserialize_with = "non_zero")]
    pub agent_stale_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            queue_capacity: default_queue_capacity(),
            reconcile: ReconcileConfig::default(),
            store: StoreConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            agent_stale_secs: default_agent_stale_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn agent_stale_after(&self) -> Duration {
        Duration::from_secs(self.agent_stale_secs)
    }
}
