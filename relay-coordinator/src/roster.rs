//! Agents known to the coordinator, from their heartbeats.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use relay_common::wire::HeartbeatRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct Sighting {
    hostname: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// An agent as reported by `GET /agents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub alive: bool,
}

/// Agents silent for this many stale periods are forgotten.
pub const EVICT_AFTER_STALE_PERIODS: u32 = 10;

#[derive(Debug, Default)]
pub struct AgentRoster {
    agents: DashMap<String, Sighting>,
}

impl AgentRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat. Returns `true` the first time an agent is seen.
    pub fn heartbeat(&self, heartbeat: HeartbeatRequest) -> bool {
        let now = Utc::now();
        let mut is_new = false;

        self.agents
            .entry(heartbeat.id)
            .and_modify(|sighting| {
                sighting.hostname.clone_from(&heartbeat.hostname);
                sighting.last_seen = now;
            })
            .or_insert_with(|| {
                is_new = true;
                Sighting {
                    hostname: heartbeat.hostname.clone(),
                    first_seen: now,
                    last_seen: now,
                }
            });

        is_new
    }

    /// Every known agent, sorted by id.
    pub fn list(&self, stale_after: Duration) -> Vec<AgentStatus> {
        let now = Utc::now();
        let stale_after = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);

        let mut agents: Vec<_> = self
            .agents
            .iter()
            .map(|entry| AgentStatus {
                id: entry.key().clone(),
                hostname: entry.hostname.clone(),
                first_seen: entry.first_seen,
                last_seen: entry.last_seen,
                alive: now.signed_duration_since(entry.last_seen) < stale_after,
            })
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Forget agents not heard from within `silent_for`, returning their ids.
    pub fn evict(&self, silent_for: Duration) -> Vec<String> {
        let cutoff = TimeDelta::from_std(silent_for)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        cutoff.map_or_else(Vec::new, |cutoff| self.evict_until(cutoff))
    }

    fn evict_until(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut evicted = Vec::new();
        self.agents.retain(|id, sighting| {
            let keep = sighting.last_seen > cutoff;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        evicted
    }

    pub fn alive(&self, stale_after: Duration) -> usize {
        self.list(stale_after)
            .iter()
            .filter(|agent| agent.alive)
            .count()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
