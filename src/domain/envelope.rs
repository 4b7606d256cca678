use super::order::Order;
use super::risk::RiskAlert;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// `order.executed` payload (spec.md §4.5 / §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecuted {
    pub order_id: String,
    pub broker_order_id: String,
    pub symbol: String,
    pub side: super::order::OrderSide,
    pub quantity: Decimal,
    pub executed_price: Decimal,
    pub executed_quantity: Decimal,
    pub fees: Decimal,
    pub executed_at: DateTime<Utc>,
    pub broker_name: String,
}

/// `order.rejected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejected {
    pub order_id: String,
    pub symbol: String,
    pub reason: String,
}

/// `order.cancelled` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: String,
    pub broker_order_id: String,
    pub broker_state: String,
}

/// `order.failed` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailed {
    pub order_id: String,
    pub error: String,
}

/// `portfolio.update` payload (spec.md §4.6 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    pub portfolio_id: String,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub total_pnl: Decimal,
    pub day_pnl: Decimal,
    pub position_quantities: HashMap<String, Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// `system.health` payload, published by any agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub component: String,
    pub status: String,
    pub metrics: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Concrete, versioned payload for every bus topic this core implements end
/// to end (spec.md §9 REDESIGN: replace dynamically-typed messages with a
/// closed, typed variant set decoded once at the subscriber).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    OrderProposed(Order),
    OrderApproved(Order),
    OrderRejected(OrderRejected),
    OrderExecuted(OrderExecuted),
    OrderCancelled(OrderCancelled),
    OrderFailed(OrderFailed),
    RiskAlert(RiskAlert),
    PortfolioUpdate(PortfolioUpdate),
    SystemHealth(SystemHealth),
}

impl Payload {
    pub fn topic(&self) -> &'static str {
        match self {
            Payload::OrderProposed(_) => topics::ORDER_PROPOSED,
            Payload::OrderApproved(_) => topics::ORDER_APPROVED,
            Payload::OrderRejected(_) => topics::ORDER_REJECTED,
            Payload::OrderExecuted(_) => topics::ORDER_EXECUTED,
            Payload::OrderCancelled(_) => topics::ORDER_CANCELLED,
            Payload::OrderFailed(_) => topics::ORDER_FAILED,
            Payload::RiskAlert(_) => topics::RISK_ALERT,
            Payload::PortfolioUpdate(_) => topics::PORTFOLIO_UPDATE,
            Payload::SystemHealth(_) => topics::SYSTEM_HEALTH,
        }
    }
}

/// Topic name constants (spec.md §6.1). `raw.*`/`insight.*` are declared as
/// payload shapes elsewhere for external analysis agents but have no
/// producer/consumer within this core.
pub mod topics {
    pub const ORDER_PROPOSED: &str = "order.proposed";
    pub const ORDER_APPROVED: &str = "order.approved";
    pub const ORDER_REJECTED: &str = "order.rejected";
    pub const ORDER_EXECUTED: &str = "order.executed";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const ORDER_FAILED: &str = "order.failed";
    pub const RISK_ALERT: &str = "risk.alert";
    pub const PORTFOLIO_UPDATE: &str = "portfolio.update";
    pub const SYSTEM_HEALTH: &str = "system.health";
}

/// Every bus message carries this envelope around its typed `Payload`
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<String>,
    pub data: Payload,
}

impl Envelope {
    pub fn new(source: impl Into<String>, data: Payload) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            topic: data.topic().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
