use super::errors::OrderError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque tradable-instrument identifier. Validated once at the Order
/// Service boundary (`[A-Z0-9]{1,10}`) so every downstream consumer can treat
/// it as an atomic key instead of re-validating a bare `String`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, OrderError> {
        let valid = !raw.is_empty()
            && raw.len() <= 10
            && raw.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid {
            return Err(OrderError::Validation {
                reason: format!("symbol '{}' must match [A-Z0-9]{{1,10}}", raw),
            });
        }
        Ok(Symbol(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl OrderType {
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Stop)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Proposed,
    Approved,
    Rejected,
    Executed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Executed | OrderStatus::Failed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The central lifecycle entity. Never deleted; terminal states are retained
/// for reconciliation (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validates and constructs a brand-new `Proposed` order. Does not
    /// publish anything; that is the Order Service's job.
    pub fn propose(
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Self, OrderError> {
        if quantity <= Decimal::ZERO {
            return Err(OrderError::Validation {
                reason: "quantity must be > 0".to_string(),
            });
        }
        match (order_type.requires_price(), price) {
            (true, None) => {
                return Err(OrderError::Validation {
                    reason: format!("{} orders require a price", order_type),
                });
            }
            (false, Some(_)) => {
                return Err(OrderError::Validation {
                    reason: format!("{} orders must not carry a price", order_type),
                });
            }
            (true, Some(p)) if p <= Decimal::ZERO => {
                return Err(OrderError::Validation {
                    reason: "price must be > 0".to_string(),
                });
            }
            _ => {}
        }

        let now = Utc::now();
        Ok(Order {
            id: Uuid::new_v4().to_string(),
            symbol,
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Proposed,
            executed_price: None,
            executed_quantity: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        let allowed = matches!(
            (self.status, to),
            (OrderStatus::Proposed, OrderStatus::Approved)
                | (OrderStatus::Proposed, OrderStatus::Rejected)
                | (OrderStatus::Proposed, OrderStatus::Cancelled)
                | (OrderStatus::Approved, OrderStatus::Executed)
                | (OrderStatus::Approved, OrderStatus::Cancelled)
                | (OrderStatus::Approved, OrderStatus::Failed)
        );
        if !allowed {
            return Err(OrderError::InvalidStateTransition {
                order_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn approve(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Approved)
    }

    pub fn reject(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Rejected)
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled)
    }

    pub fn fail(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed)
    }

    pub fn execute(
        &mut self,
        executed_price: Decimal,
        executed_quantity: Decimal,
    ) -> Result<(), OrderError> {
        if executed_price <= Decimal::ZERO {
            return Err(OrderError::Validation {
                reason: "executed_price must be > 0".to_string(),
            });
        }
        if executed_quantity <= Decimal::ZERO || executed_quantity > self.quantity {
            return Err(OrderError::Validation {
                reason: format!(
                    "executed_quantity {} must be in (0, {}]",
                    executed_quantity, self.quantity
                ),
            });
        }
        self.transition(OrderStatus::Executed)?;
        self.executed_price = Some(executed_price);
        self.executed_quantity = Some(executed_quantity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn market_order_without_price_is_valid() {
        let order = Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Market, dec!(100), None);
        assert!(order.is_ok());
    }

    #[test]
    fn limit_order_without_price_is_invalid() {
        let order = Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Limit, dec!(100), None);
        assert!(order.is_err());
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let order = Order::propose(
            sym("AAPL"),
            OrderSide::Buy,
            OrderType::Market,
            Decimal::ZERO,
            None,
        );
        assert!(order.is_err());
    }

    #[test]
    fn symbol_must_be_uppercase_alnum() {
        assert!(Symbol::parse("aapl").is_err());
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("TOOLONGSYMBOL1").is_err());
        assert!(Symbol::parse("AAPL").is_ok());
        assert!(Symbol::parse("BRK2").is_ok());
    }

    #[test]
    fn happy_path_transitions() {
        let mut order =
            Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Market, dec!(100), None)
                .unwrap();
        order.approve().unwrap();
        order.execute(dec!(150.00), dec!(100)).unwrap();
        assert_eq!(order.status, OrderStatus::Executed);
        assert_eq!(order.executed_price, Some(dec!(150.00)));
    }

    #[test]
    fn cannot_execute_from_proposed() {
        let mut order =
            Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Market, dec!(100), None)
                .unwrap();
        assert!(order.execute(dec!(150.00), dec!(100)).is_err());
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut order =
            Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Market, dec!(100), None)
                .unwrap();
        order.reject().unwrap();
        assert!(order.approve().is_err());
        assert!(order.cancel().is_err());
    }

    #[test]
    fn execute_rejects_overfill() {
        let mut order =
            Order::propose(sym("AAPL"), OrderSide::Buy, OrderType::Market, dec!(100), None)
                .unwrap();
        order.approve().unwrap();
        assert!(order.execute(dec!(150.00), dec!(101)).is_err());
    }
}
