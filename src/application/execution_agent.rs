//! Execution Agent: drives an approved `Order` toward a broker, tracks its
//! progress to a terminal broker state, and emits the corresponding events
//! (spec.md §4.5). The only component permitted to talk to `Trader`.

use crate::domain::envelope::{
    topics, Envelope, OrderCancelled, OrderExecuted, OrderFailed, Payload,
};
use crate::domain::errors::ExecutionError;
use crate::domain::order::{Order, OrderType};
use crate::domain::trader_types::BrokerOrderState;
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::trader::Trader;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub status_check_interval: Duration,
    pub status_check_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ExecutionConfig {
    /// spec.md §6.5 execution defaults.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            status_check_interval: Duration::from_secs(5),
            status_check_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Tracked order awaiting a terminal broker transition (spec.md §4.5 step 6).
#[derive(Debug, Clone)]
struct ExecutionContext {
    order: Order,
    broker_order_id: String,
    submitted_at: DateTime<Utc>,
    retry_count: u32,
}

pub struct ExecutionAgent {
    bus: MessageBus,
    metrics: Arc<Metrics>,
    trader: Arc<dyn Trader>,
    config: ExecutionConfig,
    tracker: RwLock<HashMap<String, ExecutionContext>>,
}

impl ExecutionAgent {
    pub fn new(bus: MessageBus, metrics: Arc<Metrics>, trader: Arc<dyn Trader>, config: ExecutionConfig) -> Self {
        Self {
            bus,
            metrics,
            trader,
            config,
            tracker: RwLock::new(HashMap::new()),
        }
    }

    /// Step 1: defensive re-validation of an order arriving over the bus.
    /// The typed `Order` already enforces these invariants at construction;
    /// this guards against a future untyped transport (spec.md §9 REDESIGN).
    fn revalidate(order: &Order) -> Result<(), ExecutionError> {
        if order.id.is_empty() || order.symbol.as_str().is_empty() {
            return Err(ExecutionError::Broker {
                code: "INVALID_SYMBOL".to_string(),
                message: "order carries an empty id or symbol".to_string(),
            });
        }
        if order.quantity <= rust_decimal::Decimal::ZERO {
            return Err(ExecutionError::Broker {
                code: "ORDER_REJECTED".to_string(),
                message: "quantity must be > 0".to_string(),
            });
        }
        if matches!(order.order_type, OrderType::Limit | OrderType::Stop)
            && order.price.map(|p| p <= rust_decimal::Decimal::ZERO).unwrap_or(true)
        {
            return Err(ExecutionError::Broker {
                code: "ORDER_REJECTED".to_string(),
                message: "limit/stop orders require a positive price".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before the Nth retry attempt (n = 1, 2, ...): `InitialDelay ×
    /// BackoffFactor^(n-1)`, capped at `MaxDelay`. Calibrated against the
    /// elapsed-time example in spec.md §8 S4 (two retries with the default
    /// 1s/2.0 config sum to ~3s: 1s then 2s).
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_factor.powi(retry_count as i32 - 1);
        Duration::from_secs_f64(secs.min(self.config.max_delay.as_secs_f64()))
    }

    /// Steps 2-3: submit with retry, classifying each broker error as
    /// retryable or fatal.
    async fn submit_with_retry(
        &self,
        order: &Order,
    ) -> Result<crate::domain::trader_types::OrderResult, ExecutionError> {
        let mut retry_count = 0u32;
        loop {
            match self.trader.place_order(order).await {
                Ok(result) => return Ok(result),
                Err(broker_err) => {
                    let classified = ExecutionError::Broker {
                        code: broker_err.code.clone(),
                        message: broker_err.message.clone(),
                    };
                    if !classified.is_retryable() {
                        warn!(order_id = %order.id, code = %broker_err.code, "fatal broker error, no retry");
                        return Err(classified);
                    }
                    retry_count += 1;
                    if retry_count >= self.config.max_retries {
                        return Err(ExecutionError::RetriesExhausted {
                            attempts: retry_count,
                            last_error: classified.to_string(),
                        });
                    }
                    self.metrics.inc_execution_retry(self.trader.broker_name());
                    let delay = self.backoff_delay(retry_count);
                    warn!(order_id = %order.id, attempt = retry_count, delay_ms = delay.as_millis() as u64, "retrying broker submission");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn publish_failed(&self, order: &Order, error: &ExecutionError) {
        self.metrics.inc_orders(&order.side.to_string(), "failed");
        let envelope = Envelope::new(
            "execution-agent",
            Payload::OrderFailed(OrderFailed {
                order_id: order.id.clone(),
                error: error.to_string(),
            }),
        );
        let _ = self.bus.publish(envelope).await;
    }

    async fn publish_executed(&self, order: &Order, broker_order_id: &str, price: rust_decimal::Decimal, quantity: rust_decimal::Decimal, fees: rust_decimal::Decimal) {
        self.metrics.inc_orders(&order.side.to_string(), "executed");
        let envelope = Envelope::new(
            "execution-agent",
            Payload::OrderExecuted(OrderExecuted {
                order_id: order.id.clone(),
                broker_order_id: broker_order_id.to_string(),
                symbol: order.symbol.to_string(),
                side: order.side,
                quantity: order.quantity,
                executed_price: price,
                executed_quantity: quantity,
                fees,
                executed_at: Utc::now(),
                broker_name: self.trader.broker_name().to_string(),
            }),
        );
        let _ = self.bus.publish(envelope).await;
    }

    /// Dispatch entry point for an `order.approved` message.
    pub async fn handle_approved(&self, mut order: Order) {
        if let Err(e) = Self::revalidate(&order) {
            error!(order_id = %order.id, error = %e, "order failed re-validation at execution boundary");
            let _ = order.fail();
            self.publish_failed(&order, &e).await;
            return;
        }

        match self.submit_with_retry(&order).await {
            Err(e) => {
                error!(order_id = %order.id, error = %e, "execution exhausted retries or hit a fatal broker error");
                let _ = order.fail();
                self.publish_failed(&order, &e).await;
            }
            Ok(result) => match result.status {
                BrokerOrderState::Filled => {
                    let price = result.executed_price.unwrap_or_default();
                    let quantity = result.executed_quantity.unwrap_or(order.quantity);
                    if order.execute(price, quantity).is_ok() {
                        info!(order_id = %order.id, broker_order_id = %result.broker_order_id, "order filled immediately");
                        self.publish_executed(&order, &result.broker_order_id, price, quantity, result.fees)
                            .await;
                    }
                }
                _ => {
                    info!(order_id = %order.id, broker_order_id = %result.broker_order_id, status = ?result.status, "order accepted, tracking to terminal state");
                    self.tracker.write().await.insert(
                        result.broker_order_id.clone(),
                        ExecutionContext {
                            order,
                            broker_order_id: result.broker_order_id,
                            submitted_at: Utc::now(),
                            retry_count: 0,
                        },
                    );
                }
            },
        }
    }

    /// One status-monitor sweep (spec.md §4.5 status monitor steps 1-3).
    async fn poll_tracked(&self) {
        let keys: Vec<String> = self.tracker.read().await.keys().cloned().collect();
        for broker_order_id in keys {
            let status = tokio::time::timeout(
                self.config.status_check_timeout,
                self.trader.get_order_status(&broker_order_id),
            )
            .await;

            let report = match status {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    warn!(broker_order_id, error = %e.message, "status poll failed");
                    continue;
                }
                Err(_) => {
                    warn!(broker_order_id, "status poll timed out");
                    continue;
                }
            };

            match report.status {
                BrokerOrderState::Filled => {
                    let mut tracker = self.tracker.write().await;
                    if let Some(mut ctx) = tracker.remove(&broker_order_id) {
                        drop(tracker);
                        let price = report.executed_price.unwrap_or_default();
                        let quantity = report.executed_quantity.unwrap_or(ctx.order.quantity);
                        if ctx.order.execute(price, quantity).is_ok() {
                            info!(broker_order_id, order_id = %ctx.order.id, "order filled on status poll");
                            self.publish_executed(&ctx.order, &broker_order_id, price, quantity, report.fees)
                                .await;
                        }
                    }
                }
                BrokerOrderState::Cancelled | BrokerOrderState::Rejected => {
                    let mut tracker = self.tracker.write().await;
                    if let Some(mut ctx) = tracker.remove(&broker_order_id) {
                        drop(tracker);
                        let broker_state = if report.status == BrokerOrderState::Cancelled {
                            "CANCELLED"
                        } else {
                            "REJECTED"
                        };
                        let _ = ctx.order.cancel();
                        info!(broker_order_id, order_id = %ctx.order.id, broker_state, "order left the tracker via a terminal non-fill state");
                        let envelope = Envelope::new(
                            "execution-agent",
                            Payload::OrderCancelled(OrderCancelled {
                                order_id: ctx.order.id.clone(),
                                broker_order_id: broker_order_id.clone(),
                                broker_state: broker_state.to_string(),
                            }),
                        );
                        let _ = self.bus.publish(envelope).await;
                    }
                }
                BrokerOrderState::Accepted | BrokerOrderState::PartiallyFilled => {
                    // Remains in tracker; no intermediate event (spec.md §4.5 step 3).
                }
            }
        }
    }

    /// Runs the dispatch loop (consuming `order.approved`) and the status
    /// monitor on its own periodic cadence, until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut approved_rx = self.bus.subscribe(topics::ORDER_APPROVED).await;
        let mut ticker = tokio::time::interval(self.config.status_check_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.poll_tracked().await;
                }
                msg = approved_rx.recv() => {
                    match msg {
                        Ok(envelope) => {
                            if let Payload::OrderApproved(order) = envelope.data {
                                self.handle_approved(order).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "execution agent lagged on order.approved");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Graceful shutdown (spec.md §4.5 Termination / §5 Cancellation): drain
    /// one last poll within the grace period, then disconnect. A timeout is
    /// logged, never escalated.
    async fn shutdown(&self) {
        info!("execution agent shutting down, draining tracker");
        let drain = tokio::time::timeout(self.config.shutdown_grace, self.poll_tracked());
        if drain.await.is_err() {
            warn!("execution agent shutdown grace period elapsed before the final drain completed");
        }
        if let Err(e) = self.trader.disconnect().await {
            warn!(error = %e.message, "error disconnecting from broker during shutdown");
        }
    }
}
