//! Deterministic in-memory broker for tests and local runs without a live
//! account, grounded in the teacher's `infrastructure::mock::
//! MockMarketDataService` (single `RwLock`-guarded state, no network I/O).

use super::Trader;
use crate::domain::order::{Order, OrderSide};
use crate::domain::trader_types::{
    AccountInfo, BrokerError, BrokerOrderState, Fill, OrderResult, OrderStatusReport,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

struct MockOrderState {
    report: OrderStatusReport,
    side: OrderSide,
}

/// Fills every order immediately at the order's own price (or a supplied
/// mark price for market orders), deterministically, with zero fees unless
/// configured otherwise.
pub struct MockTrader {
    connected: AtomicBool,
    fee_per_fill: Decimal,
    mark_price: Decimal,
    orders: RwLock<HashMap<String, MockOrderState>>,
    cash: RwLock<Decimal>,
    fail_next: RwLock<Option<BrokerError>>,
}

impl MockTrader {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            connected: AtomicBool::new(false),
            fee_per_fill: Decimal::ZERO,
            mark_price: Decimal::new(100, 0),
            orders: RwLock::new(HashMap::new()),
            cash: RwLock::new(starting_cash),
            fail_next: RwLock::new(None),
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee_per_fill = fee;
        self
    }

    pub fn with_mark_price(mut self, price: Decimal) -> Self {
        self.mark_price = price;
        self
    }

    /// Test hook: makes the next `place_order` call return the given error
    /// instead of filling, to exercise Execution Agent retry/classification.
    pub fn fail_next_order(&self, err: BrokerError) {
        *self.fail_next.write().unwrap() = Some(err);
    }
}

#[async_trait]
impl Trader for MockTrader {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<OrderResult, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError {
                code: "NOT_CONNECTED".to_string(),
                message: "broker not connected".to_string(),
                details: None,
            });
        }
        if let Some(err) = self.fail_next.write().unwrap().take() {
            return Err(err);
        }

        let fill_price = order.price.unwrap_or(self.mark_price);
        let broker_order_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let fill = Fill {
            price: fill_price,
            quantity: order.quantity,
            fees: self.fee_per_fill,
            timestamp: now,
        };

        let report = OrderStatusReport {
            broker_order_id: broker_order_id.clone(),
            status: BrokerOrderState::Filled,
            executed_price: Some(fill_price),
            executed_quantity: Some(order.quantity),
            remaining_quantity: Decimal::ZERO,
            fees: self.fee_per_fill,
            last_update: now,
            fills: vec![fill],
        };

        self.orders.write().unwrap().insert(
            broker_order_id.clone(),
            MockOrderState {
                report: report.clone(),
                side: order.side,
            },
        );

        Ok(OrderResult {
            broker_order_id,
            status: BrokerOrderState::Filled,
            executed_price: Some(fill_price),
            executed_quantity: Some(order.quantity),
            fees: self.fee_per_fill,
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut orders = self.orders.write().unwrap();
        match orders.get_mut(broker_order_id) {
            Some(state) if state.report.status == BrokerOrderState::Filled => Err(BrokerError {
                code: "ORDER_ALREADY_FILLED".to_string(),
                message: "cannot cancel a filled order".to_string(),
                details: None,
            }),
            Some(state) => {
                state.report.status = BrokerOrderState::Cancelled;
                Ok(())
            }
            None => Err(BrokerError {
                code: "ORDER_NOT_FOUND".to_string(),
                message: format!("unknown broker order id {broker_order_id}"),
                details: None,
            }),
        }
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        self.orders
            .read()
            .unwrap()
            .get(broker_order_id)
            .map(|s| s.report.clone())
            .ok_or_else(|| BrokerError {
                code: "ORDER_NOT_FOUND".to_string(),
                message: format!("unknown broker order id {broker_order_id}"),
                details: None,
            })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        let cash = *self.cash.read().unwrap();
        Ok(AccountInfo {
            cash,
            buying_power: cash,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn broker_name(&self) -> &str {
        "mock"
    }
}
