//! Broker abstraction the Execution Agent drives (spec.md §4.5 / §6.3).
//!
//! Grounded in the teacher's `domain::ports::ExecutionService` trait shape,
//! widened to the order-lifecycle surface this core needs (status polling,
//! account info, explicit connect/disconnect) instead of the teacher's
//! fire-and-forget `execute`.

pub mod alpaca;
pub mod mock;

use crate::domain::order::Order;
use crate::domain::trader_types::{AccountInfo, BrokerError, OrderResult, OrderStatusReport};
use async_trait::async_trait;

#[async_trait]
pub trait Trader: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
    async fn place_order(&self, order: &Order) -> Result<OrderResult, BrokerError>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;
    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError>;
    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError>;
    fn is_connected(&self) -> bool;
    fn broker_name(&self) -> &str;
}
