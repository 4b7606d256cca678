//! Central Router: agent registry, capability routing, load balancing, and
//! per-agent circuit breaking for agent-to-agent (A2A) requests (spec.md
//! §4.2).
//!
//! Grounded in the teacher's `application::monitoring::agent_status::
//! AgentStatusRegistry` for the registry/health shape and
//! `infrastructure::core::circuit_breaker::CircuitBreaker` for the breaker
//! state machine, generalized here from one named breaker to one per
//! `AgentId` so each routed agent instance is isolated independently.

use crate::domain::envelope::Envelope;
use crate::domain::errors::RouterError;
use crate::domain::router_types::{AgentDescriptor, CircuitState, Health, RoutingStrategy, TargetSelector};
use crate::infrastructure::bus::MessageBus;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{info, warn};

pub const A2A_RESPONSE_TOPIC: &str = "a2a.response";

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// True while a single `HalfOpen` probe is in flight; a concurrent
    /// second attempt is refused even though the state is `HalfOpen`
    /// (spec.md §4.2: "admits one probe").
    probing: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            probing: false,
        }
    }
}

/// Missed-heartbeat threshold before an agent is marked `Unhealthy`
/// (spec.md §3). Checked by `sweep_health`, which callers run periodically.
const HEARTBEAT_TIMEOUT: chrono::Duration = chrono::Duration::seconds(30);

pub struct Router {
    registry: RwLock<HashMap<String, AgentDescriptor>>,
    breakers: Mutex<HashMap<String, BreakerEntry>>,
    round_robin_cursor: Mutex<HashMap<String, usize>>,
    breaker_config: CircuitBreakerConfig,
    bus: MessageBus,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl Router {
    pub fn new(bus: MessageBus) -> Self {
        Self::with_breaker_config(bus, CircuitBreakerConfig::default())
    }

    pub fn with_breaker_config(bus: MessageBus, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            round_robin_cursor: Mutex::new(HashMap::new()),
            breaker_config,
            bus,
            pending: Mutex::new(HashMap::new()),
        }
    }

    // ----- Registry operations (spec.md §4.2) -----

    /// Idempotent on `AgentID`: re-registering refreshes the descriptor.
    pub async fn register(&self, descriptor: AgentDescriptor) {
        info!(agent_id = %descriptor.agent_id, agent_type = %descriptor.agent_type, "agent registered");
        self.registry
            .write()
            .await
            .insert(descriptor.agent_id.clone(), descriptor);
    }

    pub async fn deregister(&self, agent_id: &str) {
        info!(agent_id, "agent deregistered");
        self.registry.write().await.remove(agent_id);
    }

    pub async fn heartbeat(&self, agent_id: &str, in_flight: Option<u32>) -> Result<(), RouterError> {
        let mut registry = self.registry.write().await;
        let descriptor = registry
            .get_mut(agent_id)
            .ok_or_else(|| RouterError::AgentUnavailable {
                agent_id: agent_id.to_string(),
            })?;
        descriptor.last_heartbeat = Utc::now();
        if descriptor.health == Health::Unhealthy {
            descriptor.health = Health::Healthy;
        }
        if let Some(n) = in_flight {
            descriptor.in_flight = n;
        }
        Ok(())
    }

    /// Marks any agent whose last heartbeat is older than the missed-
    /// heartbeat threshold `Unhealthy`. Run this periodically from the
    /// application's background-worker set (spec.md §3 `AgentDescriptor`
    /// lifecycle).
    pub async fn sweep_health(&self) {
        let cutoff = Utc::now() - HEARTBEAT_TIMEOUT;
        let mut registry = self.registry.write().await;
        for descriptor in registry.values_mut() {
            if descriptor.last_heartbeat < cutoff && descriptor.health != Health::Unhealthy {
                warn!(agent_id = %descriptor.agent_id, "agent missed heartbeat, marking unhealthy");
                descriptor.health = Health::Unhealthy;
            }
        }
    }

    // ----- Routing operations (spec.md §4.2) -----

    /// Selects one healthy, circuit-closed descriptor matching `selector`
    /// and increments its `InFlight` counter. Callers must call
    /// [`Router::release`] when the routed work completes.
    pub async fn route(
        &self,
        selector: &TargetSelector,
        strategy: RoutingStrategy,
    ) -> Result<String, RouterError> {
        let eligible = self.eligible_agents(selector).await;
        if eligible.is_empty() {
            return Err(RouterError::NoEligibleAgent {
                selector: selector.to_string(),
            });
        }

        let chosen = self.select(&eligible, strategy, &selector.to_string()).await;

        let mut registry = self.registry.write().await;
        if let Some(descriptor) = registry.get_mut(&chosen) {
            descriptor.in_flight += 1;
        }
        Ok(chosen)
    }

    pub async fn release(&self, agent_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(descriptor) = registry.get_mut(agent_id) {
            descriptor.in_flight = descriptor.in_flight.saturating_sub(1);
        }
    }

    /// Returns the healthy, circuit-closed descriptors for every agent type
    /// listed (spec.md §4.2 `Broadcast`). Publishing to each is the
    /// caller's job — the Router only resolves targets.
    pub async fn broadcast_targets(&self, agent_types: &[String]) -> Vec<AgentDescriptor> {
        let registry = self.registry.read().await;
        let mut out = Vec::new();
        for descriptor in registry.values() {
            if agent_types.contains(&descriptor.agent_type)
                && descriptor.health == Health::Healthy
                && self.breaker_allows(&descriptor.agent_id).await
            {
                out.push(descriptor.clone());
            }
        }
        out
    }

    async fn eligible_agents(&self, selector: &TargetSelector) -> Vec<AgentDescriptor> {
        let registry = self.registry.read().await;
        let mut eligible = Vec::new();
        for descriptor in registry.values() {
            if descriptor.health != Health::Healthy {
                continue;
            }
            if !selector.matches(descriptor) {
                continue;
            }
            if self.breaker_allows(&descriptor.agent_id).await {
                eligible.push(descriptor.clone());
            }
        }
        eligible.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        eligible
    }

    async fn select(&self, eligible: &[AgentDescriptor], strategy: RoutingStrategy, key: &str) -> String {
        match strategy {
            RoutingStrategy::RoundRobin | RoutingStrategy::Capability => {
                let mut cursors = self.round_robin_cursor.lock().await;
                let idx = cursors.entry(key.to_string()).or_insert(0);
                let chosen = eligible[*idx % eligible.len()].agent_id.clone();
                *idx = idx.wrapping_add(1);
                chosen
            }
            RoutingStrategy::LeastLoaded => eligible
                .iter()
                .min_by(|a, b| a.in_flight.cmp(&b.in_flight).then(a.agent_id.cmp(&b.agent_id)))
                .map(|d| d.agent_id.clone())
                .expect("eligible is non-empty"),
            RoutingStrategy::Random => {
                let idx = rand::rng().random_range(0..eligible.len());
                eligible[idx].agent_id.clone()
            }
        }
    }

    // ----- Circuit breaker (spec.md §4.2) -----

    async fn breaker_allows(&self, agent_id: &str) -> bool {
        let mut breakers = self.breakers.lock().await;
        let entry = breakers
            .entry(agent_id.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = entry
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.breaker_config.cooldown && !entry.probing {
                    entry.state = CircuitState::HalfOpen;
                    entry.probing = true;
                    info!(agent_id, "circuit breaker Open -> HalfOpen, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Only the probe already admitted may proceed; route() calls
                // this once per selection so `probing` gates re-entry.
                false
            }
        }
    }

    /// Records a successful call to `agent_id` (spec.md §4.2 `HalfOpen` ->
    /// `Closed`, or a no-op reset of the failure count while `Closed`).
    pub async fn record_success(&self, agent_id: &str) {
        let mut breakers = self.breakers.lock().await;
        let entry = breakers
            .entry(agent_id.to_string())
            .or_insert_with(BreakerEntry::new);
        match entry.state {
            CircuitState::HalfOpen => {
                info!(agent_id, "circuit breaker HalfOpen -> Closed (probe succeeded)");
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.probing = false;
            }
            CircuitState::Closed => {
                entry.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call to `agent_id` (spec.md §4.2 `Closed` -> `Open`
    /// at the threshold, `HalfOpen` -> `Open` on any probe failure).
    pub async fn record_failure(&self, agent_id: &str) {
        let mut breakers = self.breakers.lock().await;
        let entry = breakers
            .entry(agent_id.to_string())
            .or_insert_with(BreakerEntry::new);
        entry.last_failure = Some(Instant::now());
        match entry.state {
            CircuitState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.breaker_config.failure_threshold {
                    warn!(agent_id, failures = entry.failure_count, "circuit breaker Closed -> Open");
                    entry.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(agent_id, "circuit breaker HalfOpen -> Open (probe failed)");
                entry.state = CircuitState::Open;
                entry.probing = false;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn agent_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn circuit_state(&self, agent_id: &str) -> CircuitState {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(agent_id.to_string())
            .or_insert_with(BreakerEntry::new)
            .state
    }

    // ----- A2A request/response (spec.md §4.2 `Request`) -----

    /// Synchronous-looking A2A call: selects a target, assigns a fresh
    /// `CorrelationID`, publishes to the selected agent's endpoint topic,
    /// and awaits a matching reply on [`A2A_RESPONSE_TOPIC`] within
    /// `timeout`.
    pub async fn request(
        &self,
        mut envelope: Envelope,
        selector: &TargetSelector,
        strategy: RoutingStrategy,
        timeout: Duration,
    ) -> Result<Envelope, RouterError> {
        let agent_id = self.route(selector, strategy).await?;
        let endpoint = {
            let registry = self.registry.read().await;
            registry
                .get(&agent_id)
                .map(|d| d.endpoint.clone())
                .ok_or_else(|| RouterError::AgentUnavailable {
                    agent_id: agent_id.clone(),
                })?
        };

        let correlation_id = uuid::Uuid::new_v4().to_string();
        envelope.correlation_id = Some(correlation_id.clone());
        envelope.topic = endpoint.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id.clone(), tx);

        if self.bus.publish(envelope).await.is_err() {
            self.pending.lock().await.remove(&correlation_id);
            self.release(&agent_id).await;
            self.record_failure(&agent_id).await;
            return Err(RouterError::AgentUnavailable { agent_id });
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.release(&agent_id).await;
        self.pending.lock().await.remove(&correlation_id);

        match result {
            Ok(Ok(response)) => {
                self.record_success(&agent_id).await;
                Ok(response)
            }
            Ok(Err(_)) => {
                self.record_failure(&agent_id).await;
                Err(RouterError::AgentUnavailable { agent_id })
            }
            Err(_) => {
                self.record_failure(&agent_id).await;
                Err(RouterError::Timeout {
                    agent_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Resolves a pending [`Router::request`] waiting on `correlation_id`.
    /// Responders publish their reply to [`A2A_RESPONSE_TOPIC`] with the
    /// matching `correlation_id`; this is normally invoked by a background
    /// task subscribed to that topic (see `spawn_response_listener`).
    async fn complete(&self, response: Envelope) {
        if let Some(correlation_id) = response.correlation_id.clone() {
            if let Some(tx) = self.pending.lock().await.remove(&correlation_id) {
                let _ = tx.send(response);
            }
        }
    }

    /// Spawns the background task that drains [`A2A_RESPONSE_TOPIC`] and
    /// wakes up whichever `request()` call is waiting on each reply's
    /// `correlation_id`.
    pub fn spawn_response_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = router.bus.subscribe(A2A_RESPONSE_TOPIC).await;
            while let Ok(envelope) = rx.recv().await {
                router.complete(envelope).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{Payload, SystemHealth};
    use crate::domain::router_types::Health;
    use std::time::Duration;

    fn descriptor(id: &str, ty: &str) -> AgentDescriptor {
        AgentDescriptor::new(id, ty, format!("agent.{id}"))
    }

    #[tokio::test]
    async fn register_then_route_by_type() {
        let router = Router::new(MessageBus::new());
        router.register(descriptor("exec-1", "execution")).await;

        let agent = router
            .route(&TargetSelector::by_type("execution"), RoutingStrategy::RoundRobin)
            .await
            .unwrap();
        assert_eq!(agent, "exec-1");
    }

    #[tokio::test]
    async fn route_with_no_match_is_no_eligible_agent() {
        let router = Router::new(MessageBus::new());
        let result = router
            .route(&TargetSelector::by_type("execution"), RoutingStrategy::RoundRobin)
            .await;
        assert!(matches!(result, Err(RouterError::NoEligibleAgent { .. })));
    }

    #[tokio::test]
    async fn round_robin_cycles_by_agent_id_order() {
        let router = Router::new(MessageBus::new());
        router.register(descriptor("a", "risk")).await;
        router.register(descriptor("b", "risk")).await;

        let selector = TargetSelector::by_type("risk");
        let first = router.route(&selector, RoutingStrategy::RoundRobin).await.unwrap();
        let second = router.route(&selector, RoutingStrategy::RoundRobin).await.unwrap();
        let third = router.route(&selector, RoutingStrategy::RoundRobin).await.unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "b");
        assert_eq!(third, "a");
    }

    #[tokio::test]
    async fn least_loaded_prefers_fewer_in_flight() {
        let router = Router::new(MessageBus::new());
        router.register(descriptor("a", "risk")).await;
        router.register(descriptor("b", "risk")).await;

        let selector = TargetSelector::by_type("risk");
        // Load up "a" twice.
        router.route(&selector, RoutingStrategy::LeastLoaded).await.unwrap();
        router.release("b").await; // no-op, b never routed
        let second = router.route(&selector, RoutingStrategy::LeastLoaded).await.unwrap();
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn capability_strategy_filters_superset() {
        let router = Router::new(MessageBus::new());
        router
            .register(descriptor("a", "analysis").with_capabilities(["technical".to_string()]))
            .await;
        router
            .register(descriptor("b", "analysis").with_capabilities(["sentiment".to_string()]))
            .await;

        let agent = router
            .route(&TargetSelector::by_capability("sentiment"), RoutingStrategy::Capability)
            .await
            .unwrap();
        assert_eq!(agent, "b");
    }

    #[tokio::test]
    async fn unhealthy_agent_is_not_eligible() {
        let router = Router::new(MessageBus::new());
        let mut d = descriptor("a", "risk");
        d.health = Health::Unhealthy;
        router.register(d).await;

        let result = router
            .route(&TargetSelector::by_type("risk"), RoutingStrategy::RoundRobin)
            .await;
        assert!(matches!(result, Err(RouterError::NoEligibleAgent { .. })));
    }

    // --- P7 / S7: circuit breaker ---

    #[tokio::test]
    async fn p7_breaker_opens_at_threshold_and_recovers_via_single_half_open_probe() {
        let router = Router::with_breaker_config(
            MessageBus::new(),
            CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_millis(50),
            },
        );

        for _ in 0..2 {
            router.record_failure("broker-a").await;
        }
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Closed);

        router.record_failure("broker-a").await;
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Open);

        // Before cooldown elapses, breaker still refuses.
        assert!(!router.breaker_allows("broker-a").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Exactly one probe is admitted.
        assert!(router.breaker_allows("broker-a").await);
        assert!(!router.breaker_allows("broker-a").await);

        router.record_success("broker-a").await;
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let router = Router::with_breaker_config(
            MessageBus::new(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(20),
            },
        );
        router.record_failure("broker-a").await;
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(router.breaker_allows("broker-a").await);
        router.record_failure("broker-a").await;
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn s7_breaker_isolates_failing_instance_leaving_healthy_one_routable() {
        let router = Router::with_breaker_config(
            MessageBus::new(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(30),
            },
        );
        router.register(descriptor("broker-a", "execution")).await;
        router.register(descriptor("broker-b", "execution")).await;

        router.record_failure("broker-a").await;
        router.record_failure("broker-a").await;
        assert_eq!(router.circuit_state("broker-a").await, CircuitState::Open);

        let selector = TargetSelector::by_type("execution");
        let chosen = router.route(&selector, RoutingStrategy::RoundRobin).await.unwrap();
        assert_eq!(chosen, "broker-b");
    }

    // --- A2A request/response ---

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        let bus = MessageBus::new();
        let router = Router::new(bus.clone());
        router.register(descriptor("risk-1", "risk")).await;

        let envelope = Envelope::new(
            "order-service",
            Payload::SystemHealth(SystemHealth {
                component: "order-service".into(),
                status: "ok".into(),
                metrics: Default::default(),
                timestamp: chrono::Utc::now(),
            }),
        );

        let result = router
            .request(
                envelope,
                &TargetSelector::by_type("risk"),
                RoutingStrategy::RoundRobin,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(RouterError::Timeout { .. })));
    }

    #[tokio::test]
    async fn request_resolves_when_response_published() {
        let bus = MessageBus::new();
        let router = Arc::new(Router::new(bus.clone()));
        router.register(descriptor("risk-1", "risk")).await;
        let _listener = router.spawn_response_listener();

        let mut endpoint_rx = bus.subscribe("agent.risk-1").await;

        let envelope = Envelope::new(
            "order-service",
            Payload::SystemHealth(SystemHealth {
                component: "order-service".into(),
                status: "ok".into(),
                metrics: Default::default(),
                timestamp: chrono::Utc::now(),
            }),
        );

        let router_clone = Arc::clone(&router);
        let request_fut = tokio::spawn(async move {
            router_clone
                .request(
                    envelope,
                    &TargetSelector::by_type("risk"),
                    RoutingStrategy::RoundRobin,
                    Duration::from_secs(1),
                )
                .await
        });

        let incoming = endpoint_rx.recv().await.unwrap();
        let correlation_id = incoming.correlation_id.clone().unwrap();
        let mut reply = Envelope::new(
            "risk-1",
            Payload::SystemHealth(SystemHealth {
                component: "risk-1".into(),
                status: "ok".into(),
                metrics: Default::default(),
                timestamp: chrono::Utc::now(),
            }),
        );
        reply.correlation_id = Some(correlation_id);
        reply.topic = A2A_RESPONSE_TOPIC.to_string();
        bus.publish(reply).await.unwrap();

        let result = request_fut.await.unwrap();
        assert!(result.is_ok());
    }
}
