use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Router registry entry (spec.md §3). `InFlight` is incremented by `Route`
/// and decremented by the caller when the routed request completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: HashSet<String>,
    pub endpoint: String,
    pub health: Health,
    pub last_heartbeat: DateTime<Utc>,
    pub in_flight: u32,
}

impl AgentDescriptor {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            capabilities: HashSet::new(),
            endpoint: endpoint.into(),
            health: Health::Healthy,
            last_heartbeat: Utc::now(),
            in_flight: 0,
        }
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = String>) -> Self {
        self.capabilities = caps.into_iter().collect();
        self
    }
}

/// Selects the eligible set of descriptors a `Route`/`Request` call targets.
#[derive(Debug, Clone)]
pub struct TargetSelector {
    pub agent_type: Option<String>,
    pub capabilities: Vec<String>,
}

impl TargetSelector {
    pub fn by_type(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: Some(agent_type.into()),
            capabilities: Vec::new(),
        }
    }

    pub fn by_capability(capability: impl Into<String>) -> Self {
        Self {
            agent_type: None,
            capabilities: vec![capability.into()],
        }
    }

    pub fn matches(&self, descriptor: &AgentDescriptor) -> bool {
        if let Some(ty) = &self.agent_type {
            if &descriptor.agent_type != ty {
                return false;
            }
        }
        self.capabilities
            .iter()
            .all(|cap| descriptor.capabilities.contains(cap))
    }
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type={:?} capabilities={:?}",
            self.agent_type, self.capabilities
        )
    }
}

/// Load-balancing strategies (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    /// Filters to descriptors whose capabilities are a superset of the
    /// selector's, then applies the given secondary strategy.
    Capability,
}

/// Per-`AgentID` breaker state (spec.md §3). `HalfOpen` admits exactly one
/// probe; a concurrent second probe is rejected as if the circuit were still
/// `Open` (enforced by `probing` in the router's breaker table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}
