use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single contribution (partial or whole) to an order's executed quantity
/// (spec.md §6.3, Glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fees: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Remote order state as reported by the broker, independent of our own
/// `OrderStatus` machine (spec.md §4.3 vs §6.3 are deliberately distinct:
/// ours is the business lifecycle, this is the wire-level broker state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderState {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Returned by `Trader::place_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub broker_order_id: String,
    pub status: BrokerOrderState,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub fees: Decimal,
}

/// Returned by `Trader::get_order_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub broker_order_id: String,
    pub status: BrokerOrderState,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub remaining_quantity: Decimal,
    pub fees: Decimal,
    pub last_update: DateTime<Utc>,
    pub fills: Vec<Fill>,
}

/// The only error type `Trader` callers must classify (spec.md §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub cash: Decimal,
    pub buying_power: Decimal,
}
