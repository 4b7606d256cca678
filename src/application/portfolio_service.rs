//! Portfolio Service: the single source of truth for cash, positions, and
//! P&L, mutated only in reaction to `order.executed` (spec.md §4.6).

use crate::domain::envelope::{topics, Envelope, OrderExecuted, Payload, PortfolioUpdate};
use crate::domain::errors::PortfolioError;
use crate::domain::order::{Order, OrderType, Symbol};
use crate::domain::portfolio::Portfolio;
use crate::domain::risk::{AlertSeverity, RiskAlert};
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub struct PortfolioService {
    bus: MessageBus,
    metrics: Arc<Metrics>,
    portfolio: RwLock<Portfolio>,
    /// `OrderID`s already applied, so re-delivery of `order.executed` is a
    /// no-op rather than a double fill (spec.md §8 P8/R2).
    applied_orders: RwLock<HashSet<String>>,
}

impl PortfolioService {
    pub fn new(bus: MessageBus, metrics: Arc<Metrics>, portfolio: Portfolio) -> Self {
        Self {
            bus,
            metrics,
            portfolio: RwLock::new(portfolio),
            applied_orders: RwLock::new(HashSet::new()),
        }
    }

    /// `ProcessOrderExecution` (spec.md §4.6). Preconditions — `order.status
    /// == Executed` with both `executed_price` and `executed_quantity` set —
    /// are enforced by `Order::execute` before this is ever reachable.
    pub async fn process_order_execution(&self, order: &Order, fees: Decimal) -> Result<(), PortfolioError> {
        let mut portfolio = self.portfolio.write().await;
        portfolio.apply_executed_order(order, fees)?;
        self.publish_snapshot(&portfolio).await;
        self.refresh_gauges(&portfolio);
        Ok(())
    }

    /// `UpdatePositionPrices` (spec.md §4.6).
    pub async fn update_position_prices(&self, prices: &HashMap<String, Decimal>) {
        let mut portfolio = self.portfolio.write().await;
        portfolio.update_prices(prices);
        self.publish_snapshot(&portfolio).await;
        self.refresh_gauges(&portfolio);
    }

    /// `GetPortfolioPerformance` (spec.md §4.6): read-only aggregate.
    pub async fn get_portfolio_performance(&self) -> Portfolio {
        self.portfolio.read().await.clone()
    }

    async fn publish_snapshot(&self, portfolio: &Portfolio) {
        let update = PortfolioUpdate {
            portfolio_id: portfolio.id.clone(),
            total_value: portfolio.total_value(),
            cash: portfolio.cash,
            total_pnl: portfolio.total_pnl(),
            day_pnl: portfolio.day_pnl,
            position_quantities: portfolio
                .positions
                .values()
                .map(|p| (p.symbol.clone(), p.quantity))
                .collect(),
            timestamp: portfolio.last_updated,
        };
        let envelope = Envelope::new("portfolio-service", Payload::PortfolioUpdate(update));
        if let Err(e) = self.bus.publish(envelope).await {
            warn!(error = %e, "failed to publish portfolio.update");
        }
    }

    fn refresh_gauges(&self, portfolio: &Portfolio) {
        self.metrics
            .portfolio_value_usd
            .set(portfolio.total_value().to_string().parse().unwrap_or(0.0));
        self.metrics
            .portfolio_cash_usd
            .set(portfolio.cash.to_string().parse().unwrap_or(0.0));
        self.metrics.positions_count.set(portfolio.positions.len() as f64);
        self.metrics
            .daily_pnl_usd
            .set(portfolio.day_pnl.to_string().parse().unwrap_or(0.0));
        for position in portfolio.positions.values() {
            let value: f64 = position.market_value().to_string().parse().unwrap_or(0.0);
            self.metrics.set_position_value(&position.symbol, value);
        }
    }

    async fn publish_alert(&self, event: &OrderExecuted, error: &PortfolioError) {
        let (alert_type, current_value, threshold) = match error {
            PortfolioError::InsufficientCash { need, available } => ("INSUFFICIENT_CASH", *available, *need),
            PortfolioError::InsufficientQuantity { need, held, .. } => ("INSUFFICIENT_QUANTITY", *held, *need),
            PortfolioError::PositionNotFound { .. } => ("POSITION_NOT_FOUND", Decimal::ZERO, Decimal::ZERO),
            PortfolioError::NotFound { .. } => ("PORTFOLIO_NOT_FOUND", Decimal::ZERO, Decimal::ZERO),
        };
        let alert = RiskAlert {
            alert_type: alert_type.to_string(),
            severity: AlertSeverity::Critical,
            symbol: Some(event.symbol.clone()),
            current_value,
            threshold,
            message: error.to_string(),
            timestamp: chrono::Utc::now(),
        };
        let envelope = Envelope::new("portfolio-service", Payload::RiskAlert(alert));
        let _ = self.bus.publish(envelope).await;
    }

    /// Reconstructs the minimal `Order` the portfolio math needs from an
    /// `order.executed` envelope. The Portfolio Service only ever sees
    /// terminal fills, so `OrderType::Market` is a safe placeholder — the
    /// type only matters for `Order::propose`'s price invariant, which
    /// doesn't apply to an already-executed order.
    fn order_from_event(event: &OrderExecuted) -> Option<Order> {
        let symbol = Symbol::parse(&event.symbol)
            .map_err(|e| error!(order_id = %event.order_id, error = %e, "portfolio service received an unparseable symbol"))
            .ok()?;
        let mut order = Order::propose(symbol, event.side, OrderType::Market, event.quantity, None)
            .map_err(|e| error!(order_id = %event.order_id, error = %e, "portfolio service could not reconstruct order"))
            .ok()?;
        order.approve().ok()?;
        order.execute(event.executed_price, event.executed_quantity).ok()?;
        Some(order)
    }

    async fn handle_executed(&self, event: OrderExecuted) {
        {
            let mut applied = self.applied_orders.write().await;
            if !applied.insert(event.order_id.clone()) {
                warn!(order_id = %event.order_id, "order.executed redelivered, ignoring");
                return;
            }
        }
        let Some(order) = Self::order_from_event(&event) else {
            return;
        };
        if let Err(err) = self.process_order_execution(&order, event.fees).await {
            warn!(order_id = %event.order_id, error = %err, "executed order violated a portfolio invariant, state left untouched");
            self.publish_alert(&event, &err).await;
        } else {
            info!(order_id = %event.order_id, "portfolio updated from executed order");
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut rx = self.bus.subscribe(topics::ORDER_EXECUTED).await;

        // Publish the starting state so the Risk Service's snapshot isn't
        // empty (and therefore maximally restrictive) before the first fill.
        {
            let portfolio = self.portfolio.read().await;
            self.publish_snapshot(&portfolio).await;
            self.refresh_gauges(&portfolio);
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("portfolio service shutting down");
                        break;
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Ok(envelope) => {
                            if let Payload::OrderExecuted(event) = envelope.data {
                                self.handle_executed(event).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "portfolio service lagged on order.executed");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}
