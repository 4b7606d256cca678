//! Order Service: validates user-intent orders and emits `order.proposed`
//! (spec.md §4.3).

use crate::domain::envelope::{Envelope, Payload};
use crate::domain::errors::OrderError;
use crate::domain::order::{Order, OrderSide, OrderType, Symbol};
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

pub struct OrderService {
    bus: MessageBus,
    metrics: Arc<Metrics>,
}

impl OrderService {
    pub fn new(bus: MessageBus, metrics: Arc<Metrics>) -> Self {
        Self { bus, metrics }
    }

    /// `CreateOrder` (spec.md §4.3). Validation failures return an error and
    /// publish nothing; success persists nothing beyond the returned `Order`
    /// (there is no durable order store in this core) and publishes
    /// `order.proposed`.
    pub async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order, OrderError> {
        let symbol = Symbol::parse(symbol)?;
        let order = Order::propose(symbol, side, order_type, quantity, price)?;

        info!(order_id = %order.id, symbol = %order.symbol, side = %order.side, "order proposed");
        self.metrics.inc_orders(&order.side.to_string(), "proposed");

        let envelope = Envelope::new("order-service", Payload::OrderProposed(order.clone()));
        if let Err(e) = self.bus.publish(envelope).await {
            warn!(order_id = %order.id, error = %e, "failed to publish order.proposed");
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn service() -> OrderService {
        OrderService::new(MessageBus::new(), Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn market_order_without_price_is_accepted_and_published() {
        let svc = service();
        let mut rx = svc.bus.subscribe("order.proposed").await;
        let order = svc
            .create_order("AAPL", OrderSide::Buy, OrderType::Market, dec!(100), None)
            .await
            .unwrap();
        assert_eq!(order.status.to_string(), "Proposed");
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.data, Payload::OrderProposed(_)));
    }

    #[tokio::test]
    async fn limit_order_without_price_is_rejected_and_not_published() {
        let svc = service();
        let mut rx = svc.bus.subscribe("order.proposed").await;
        let result = svc
            .create_order("AAPL", OrderSide::Buy, OrderType::Limit, dec!(100), None)
            .await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_symbol_is_rejected() {
        let svc = service();
        let result = svc
            .create_order("aapl!", OrderSide::Buy, OrderType::Market, dec!(1), None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let svc = service();
        let result = svc
            .create_order("AAPL", OrderSide::Buy, OrderType::Market, Decimal::ZERO, None)
            .await;
        assert!(result.is_err());
    }
}
