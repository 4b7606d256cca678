//! Typed publish/subscribe transport (spec.md §4.1).
//!
//! This is an in-process implementation built on [`tokio::sync::broadcast`],
//! one channel per topic. It satisfies the bus contract — at-least-once
//! delivery to current subscribers, no cross-topic ordering guarantee,
//! idempotent-handler expectation left to callers — without committing to a
//! concrete network transport. Swapping in a networked broker later means
//! replacing this module; `Publish`/`Subscribe`/`Close`/`IsConnected`
//! callers are unaffected.
//!
//! Grounded in the teacher's `infrastructure::event_bus::EventBus`
//! (single `RwLock`-guarded fan-out list), generalized from one list of
//! listeners to per-topic channels so a subscriber only receives the topics
//! it asked for.

use crate::domain::envelope::Envelope;
use crate::domain::errors::BusError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

const TOPIC_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MessageBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
    connected: Arc<std::sync::atomic::AtomicBool>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<Envelope> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Delivers `envelope` to every current subscriber of its topic. A
    /// publish with no subscribers is not an error — at-least-once delivery
    /// only binds subscribers that exist at publish time (spec.md §4.1).
    pub async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Closed);
        }
        let tx = self.sender_for(&envelope.topic).await;
        let topic = envelope.topic.clone();
        match tx.send(envelope) {
            Ok(n) => {
                debug!(topic = %topic, receivers = n, "published");
                Ok(())
            }
            Err(_) => {
                // No active receivers right now; not an error per the bus
                // contract, but worth a trace for operators.
                debug!(topic = %topic, "published with no active subscribers");
                Ok(())
            }
        }
    }

    /// Registers a new subscription to `topic`. The returned receiver must
    /// be drained by the caller's own dispatch loop; a handler error there
    /// is the caller's concern, not the bus's (spec.md §4.1).
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        self.sender_for(topic).await.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Marks the bus unavailable. Existing `broadcast::Receiver`s keep
    /// draining whatever is already queued, matching the "bounded grace
    /// period" drain semantics of spec.md §4.1.
    pub async fn close(&self) {
        warn!("message bus closing");
        self.connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{Payload, SystemHealth};

    fn health_envelope(component: &str) -> Envelope {
        Envelope::new(
            component,
            Payload::SystemHealth(SystemHealth {
                component: component.to_string(),
                status: "ok".to_string(),
                metrics: Default::default(),
                timestamp: chrono::Utc::now(),
            }),
        )
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("system.health").await;
        bus.publish(health_envelope("router")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "system.health");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = MessageBus::new();
        let mut rx1 = bus.subscribe("system.health").await;
        let mut rx2 = bus.subscribe("system.health").await;
        bus.publish(health_envelope("router")).await.unwrap();

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = MessageBus::new();
        assert!(bus.publish(health_envelope("router")).await.is_ok());
    }

    #[tokio::test]
    async fn subscriber_does_not_see_other_topics() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("order.executed").await;
        bus.publish(health_envelope("router")).await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish() {
        let bus = MessageBus::new();
        bus.close().await;
        assert!(!bus.is_connected());
        assert!(bus.publish(health_envelope("router")).await.is_err());
    }
}
