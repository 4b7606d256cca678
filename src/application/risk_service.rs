//! Risk Service: intercepts `order.proposed`, runs the gating validator
//! pipeline, and emits `order.approved`/`order.rejected` plus `risk.alert`
//! (spec.md §4.4).
//!
//! Grounded in the teacher's `domain::risk::filters::RiskValidator` trait
//! and `application::risk_management::risk_manager::RiskManager`'s
//! validator-vector construction, reduced to the six gating checks and the
//! periodic leverage/VaR/concentration monitor spec.md names.

use crate::domain::envelope::{topics, Envelope, OrderRejected, Payload, PortfolioUpdate};
use crate::domain::errors::RiskError;
use crate::domain::order::{Order, OrderSide};
use crate::domain::risk::{z_score, AlertSeverity, RiskAlert, RiskLimits};
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::observability::Metrics;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Cadence of the periodic portfolio-level monitor (spec.md §4.4: "Also runs
/// periodic portfolio-level monitoring emitting alerts"), independent of the
/// per-order validator pipeline.
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Current market price per symbol, injected so the Risk Service never
/// probes the Portfolio Service directly (spec.md §9: "strategy consumers
/// read `portfolio.update` rather than probing... directly").
pub trait PriceSource: Send + Sync {
    fn price(&self, symbol: &str) -> Option<Decimal>;
}

/// Per-symbol volatility feed for the VaR formula in spec.md §4.4. The
/// prototype hardcodes a constant (spec.md §9 open question); this trait
/// makes that swappable without touching the validator pipeline.
pub trait VolatilitySource: Send + Sync {
    fn volatility(&self, symbol: &str) -> Decimal;
}

/// In-memory price book a market-data adapter can push into; also usable
/// directly as a `PriceSource`.
#[derive(Default)]
pub struct PriceBook(RwLock<HashMap<String, Decimal>>);

impl PriceBook {
    pub fn new() -> Self {
        Self(RwLock::new(HashMap::new()))
    }

    pub fn set(&self, symbol: &str, price: Decimal) {
        self.0.write().unwrap().insert(symbol.to_string(), price);
    }
}

impl PriceSource for PriceBook {
    fn price(&self, symbol: &str) -> Option<Decimal> {
        self.0.read().unwrap().get(symbol).copied()
    }
}

/// Resolution of spec.md §9's open question: ship a constant-volatility
/// placeholder, but behind a trait so a real calibration feed can replace it
/// without touching `VarValidator`.
pub struct ConstantVolatilitySource(pub Decimal);

impl VolatilitySource for ConstantVolatilitySource {
    fn volatility(&self, _symbol: &str) -> Decimal {
        self.0
    }
}

/// The Risk Service's own mirror of portfolio state, rebuilt only from
/// `portfolio.update` events — never by reading the Portfolio Service's
/// owned state directly (spec.md §5 shared-resource policy).
#[derive(Debug, Clone, Default)]
struct PortfolioSnapshot {
    cash: Decimal,
    total_value: Decimal,
    day_pnl: Decimal,
    position_quantities: HashMap<String, Decimal>,
}

impl From<&PortfolioUpdate> for PortfolioSnapshot {
    fn from(update: &PortfolioUpdate) -> Self {
        Self {
            cash: update.cash,
            total_value: update.total_value,
            day_pnl: update.day_pnl,
            position_quantities: update.position_quantities.clone(),
        }
    }
}

pub struct RiskContext<'a> {
    pub order: &'a Order,
    pub effective_price: Decimal,
    pub snapshot: &'a PortfolioSnapshot,
    pub limits: &'a RiskLimits,
    pub prices: &'a dyn PriceSource,
    pub volatility: &'a dyn VolatilitySource,
}

impl<'a> RiskContext<'a> {
    /// Signed quantity after the order is applied, at `effective_price`.
    fn prospective_position_value(&self) -> Decimal {
        let symbol = self.order.symbol.as_str();
        let existing_qty = self
            .snapshot
            .position_quantities
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let delta = match self.order.side {
            OrderSide::Buy => self.order.quantity,
            OrderSide::Sell => -self.order.quantity,
        };
        (existing_qty + delta) * self.effective_price
    }

    fn market_value_of(&self, symbol: &str, quantity: Decimal) -> Decimal {
        let price = self.prices.price(symbol).unwrap_or(self.effective_price);
        quantity * price
    }
}

pub trait RiskValidator: Send + Sync {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError>;
}

/// Folds `Σᵢ (volᵢ × market_valueᵢ × z)²` and takes the square root. Shared
/// between `VarValidator`'s post-trade check and the periodic monitor's
/// whole-book check, since neither can use `Decimal`'s lack of a sqrt.
fn var_from_terms(terms: impl Iterator<Item = (f64, f64)>, z: f64) -> f64 {
    let sum_sq: f64 = terms
        .map(|(vol, market_value)| {
            let term = vol * market_value.abs() * z;
            term * term
        })
        .sum();
    sum_sq.sqrt()
}

/// Pre-check: a Sell may never exceed what the book currently holds
/// (spec.md §8 P5/S6). Runs before the Buy-oriented checks below since it
/// gates on the order's side alone, not on portfolio value.
pub struct PositionHoldingValidator;

impl RiskValidator for PositionHoldingValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.order.side != OrderSide::Sell {
            return Ok(());
        }
        let held = ctx
            .snapshot
            .position_quantities
            .get(ctx.order.symbol.as_str())
            .copied()
            .unwrap_or(Decimal::ZERO);
        if ctx.order.quantity > held {
            return Err(RiskError::InsufficientHoldings {
                symbol: ctx.order.symbol.to_string(),
                requested: ctx.order.quantity,
                held,
            });
        }
        Ok(())
    }
}

/// Check 1 (spec.md §4.4). Buy orders only; Sell raises cash so it never
/// gates here.
pub struct CashSufficiencyValidator;

impl RiskValidator for CashSufficiencyValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.order.side != OrderSide::Buy {
            return Ok(());
        }
        let buffer = Decimal::new(110, 2); // 1.10
        let required = ctx.order.quantity * ctx.effective_price * buffer;
        if ctx.snapshot.cash < required {
            return Err(RiskError::InsufficientCash {
                required,
                available: ctx.snapshot.cash,
            });
        }
        Ok(())
    }
}

/// Check 2: prospective post-trade position value vs `MaxPositionSize *
/// TotalValue`.
pub struct PositionSizeValidator;

impl RiskValidator for PositionSizeValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        let prospective = ctx.prospective_position_value().abs();
        let limit = ctx.limits.max_position_size * ctx.snapshot.total_value;
        if prospective > limit {
            return Err(RiskError::PositionSizeLimit {
                symbol: ctx.order.symbol.to_string(),
                prospective,
                limit,
            });
        }
        Ok(())
    }
}

/// Check 3: the traded symbol's prospective share of the portfolio. Other,
/// untraded positions cannot change concentration as a side effect of this
/// order, so they are left to the periodic portfolio-level monitor rather
/// than re-checked here on every single proposal.
pub struct ConcentrationValidator;

impl RiskValidator for ConcentrationValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.snapshot.total_value.is_zero() {
            return Ok(());
        }
        let prospective = ctx.prospective_position_value().abs();
        let current_pct = (prospective / ctx.snapshot.total_value * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);
        let max_pct = (ctx.limits.max_concentration * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);
        if current_pct > max_pct {
            return Err(RiskError::ConcentrationLimit {
                symbol: ctx.order.symbol.to_string(),
                current_pct,
                max_pct,
            });
        }
        Ok(())
    }
}

/// Check 4: parametric VaR, `sqrt(Σᵢ (Volᵢ × MarketValueᵢ × Z(conf))²)`
/// (spec.md §4.4), evaluated over the post-trade book (the traded symbol's
/// market value is replaced by its prospective value; every other position
/// is unaffected by this order). `Decimal` has no square root, so the sum of
/// squares is folded in `f64` and only the final comparison uses it.
/// `MaxVaR` is a fraction of `TotalValue` (the same scale as the other
/// limits), so the dollar VaR is normalized before comparison.
pub struct VarValidator;

impl RiskValidator for VarValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.snapshot.total_value.is_zero() {
            return Ok(());
        }
        let z = z_score(ctx.limits.var_confidence_level).unwrap_or(Decimal::new(1645, 3));
        let z = z.to_f64().unwrap_or(1.645);
        let traded_symbol = ctx.order.symbol.as_str();

        let mut terms = Vec::with_capacity(ctx.snapshot.position_quantities.len() + 1);
        let mut saw_traded = false;
        for (symbol, &qty) in &ctx.snapshot.position_quantities {
            let mv = if symbol == traded_symbol {
                saw_traded = true;
                ctx.prospective_position_value()
            } else {
                ctx.market_value_of(symbol, qty)
            };
            let vol = ctx.volatility.volatility(symbol).to_f64().unwrap_or(0.0);
            terms.push((vol, mv.to_f64().unwrap_or(0.0)));
        }
        if !saw_traded {
            let mv = ctx.prospective_position_value();
            if !mv.is_zero() {
                let vol = ctx.volatility.volatility(traded_symbol).to_f64().unwrap_or(0.0);
                terms.push((vol, mv.to_f64().unwrap_or(0.0)));
            }
        }

        let var = var_from_terms(terms.into_iter(), z);
        let total_value = ctx.snapshot.total_value.to_f64().unwrap_or(1.0);
        let var_fraction = var / total_value;
        let max_var = ctx.limits.max_var.to_f64().unwrap_or(0.0);
        if var_fraction > max_var {
            return Err(RiskError::VarExceeded {
                var: Decimal::from_f64(var_fraction).unwrap_or(Decimal::ZERO),
                max_var: ctx.limits.max_var,
            });
        }
        Ok(())
    }
}

/// Check 5: blocks every new order once today's realized drawdown breaches
/// the limit, independent of the order itself.
pub struct DailyLossValidator;

impl RiskValidator for DailyLossValidator {
    fn validate(&self, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.snapshot.total_value.is_zero() {
            return Ok(());
        }
        let loss_pct = (ctx.snapshot.day_pnl.abs() / ctx.snapshot.total_value * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);
        let limit_pct = (ctx.limits.max_daily_loss * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);
        if loss_pct > limit_pct {
            return Err(RiskError::DailyLossLimit { loss_pct, limit_pct });
        }
        Ok(())
    }
}

fn default_pipeline() -> Vec<Box<dyn RiskValidator>> {
    vec![
        Box::new(PositionHoldingValidator),
        Box::new(CashSufficiencyValidator),
        Box::new(PositionSizeValidator),
        Box::new(ConcentrationValidator),
        Box::new(VarValidator),
        Box::new(DailyLossValidator),
    ]
}

pub struct RiskService {
    bus: MessageBus,
    metrics: Arc<Metrics>,
    validators: Vec<Box<dyn RiskValidator>>,
    limits: RwLock<RiskLimits>,
    snapshot: RwLock<PortfolioSnapshot>,
    prices: Arc<dyn PriceSource>,
    volatility: Arc<dyn VolatilitySource>,
}

impl RiskService {
    pub fn new(
        bus: MessageBus,
        metrics: Arc<Metrics>,
        limits: RiskLimits,
        prices: Arc<dyn PriceSource>,
        volatility: Arc<dyn VolatilitySource>,
    ) -> Self {
        Self {
            bus,
            metrics,
            validators: default_pipeline(),
            limits: RwLock::new(limits),
            snapshot: RwLock::new(PortfolioSnapshot::default()),
            prices,
            volatility,
        }
    }

    pub fn update_limits(&self, limits: RiskLimits) {
        *self.limits.write().unwrap() = limits;
    }

    fn effective_price(&self, order: &Order) -> Decimal {
        order
            .price
            .or_else(|| self.prices.price(order.symbol.as_str()))
            .unwrap_or(Decimal::ZERO)
    }

    /// Runs the full validator pipeline; stops and returns on the first
    /// failure (spec.md §4.4 "first failure aborts").
    pub fn evaluate(&self, order: &Order) -> Result<(), RiskError> {
        let limits = self.limits.read().unwrap().clone();
        let snapshot = self.snapshot.read().unwrap().clone();
        let effective_price = self.effective_price(order);
        let ctx = RiskContext {
            order,
            effective_price,
            snapshot: &snapshot,
            limits: &limits,
            prices: self.prices.as_ref(),
            volatility: self.volatility.as_ref(),
        };
        for validator in &self.validators {
            validator.validate(&ctx)?;
        }
        Ok(())
    }

    fn alert_for(&self, err: &RiskError) -> RiskAlert {
        let (current_value, threshold, symbol) = match err {
            RiskError::InsufficientCash { required, available } => {
                (*available, *required, None)
            }
            RiskError::PositionSizeLimit { symbol, prospective, limit } => {
                (*prospective, *limit, Some(symbol.clone()))
            }
            RiskError::ConcentrationLimit { symbol, current_pct, max_pct } => (
                Decimal::from_f64(*current_pct).unwrap_or(Decimal::ZERO),
                Decimal::from_f64(*max_pct).unwrap_or(Decimal::ZERO),
                Some(symbol.clone()),
            ),
            RiskError::VarExceeded { var, max_var } => (*var, *max_var, None),
            RiskError::DailyLossLimit { loss_pct, limit_pct } => (
                Decimal::from_f64(*loss_pct).unwrap_or(Decimal::ZERO),
                Decimal::from_f64(*limit_pct).unwrap_or(Decimal::ZERO),
                None,
            ),
            RiskError::LeverageExceeded { leverage, max_leverage } => {
                (*leverage, *max_leverage, None)
            }
            RiskError::InsufficientHoldings { symbol, requested, held } => {
                (*requested, *held, Some(symbol.clone()))
            }
        };
        RiskAlert {
            alert_type: err.alert_type().to_string(),
            severity: err.severity(),
            symbol,
            current_value,
            threshold,
            message: err.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Publishes a `risk.alert` for a validator failure or a monitor-tick
    /// breach alike, so both call sites build the alert the same way.
    async fn publish_alert(&self, err: &RiskError) {
        let alert = Envelope::new("risk-service", Payload::RiskAlert(self.alert_for(err)));
        let _ = self.bus.publish(alert).await;
    }

    async fn handle_proposed(&self, mut order: Order) {
        let started = Instant::now();
        let outcome = self.evaluate(&order);
        self.metrics
            .observe_risk_validation_latency(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                if let Err(e) = order.approve() {
                    warn!(order_id = %order.id, error = %e, "order.proposed arrived for a non-proposed order");
                    return;
                }
                self.metrics.inc_orders(&order.side.to_string(), "approved");
                let envelope = Envelope::new("risk-service", Payload::OrderApproved(order));
                let _ = self.bus.publish(envelope).await;
            }
            Err(err) => {
                info!(order_id = %order.id, reason = err.alert_type(), "order rejected by risk service");
                self.metrics.inc_orders(&order.side.to_string(), "rejected");
                self.metrics.inc_risk_rejection(err.alert_type());

                let rejected = Envelope::new(
                    "risk-service",
                    Payload::OrderRejected(OrderRejected {
                        order_id: order.id.clone(),
                        symbol: order.symbol.to_string(),
                        reason: err.to_string(),
                    }),
                );
                let _ = self.bus.publish(rejected).await;

                self.publish_alert(&err).await;
            }
        }
    }

    fn apply_portfolio_update(&self, update: &PortfolioUpdate) {
        *self.snapshot.write().unwrap() = PortfolioSnapshot::from(update);
    }

    /// Periodic portfolio-level monitor (spec.md §4.4), independent of any
    /// single order: checks the whole book's leverage, VaR, and per-symbol
    /// concentration against the current limits and alerts on breach. Also
    /// keeps the three gauges fresh even when no order arrives to drive them.
    async fn monitor_tick(&self) {
        let limits = self.limits.read().unwrap().clone();
        let snapshot = self.snapshot.read().unwrap().clone();
        if snapshot.total_value.is_zero() {
            return;
        }

        let mut gross = Decimal::ZERO;
        let mut var_terms = Vec::with_capacity(snapshot.position_quantities.len());
        for (symbol, &qty) in &snapshot.position_quantities {
            let mv = self.prices.price(symbol).unwrap_or(Decimal::ZERO) * qty;
            gross += mv.abs();
            let pct = (mv.abs() / snapshot.total_value * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            self.metrics.set_risk_concentration_pct(symbol, pct);
            let max_pct = (limits.max_concentration * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            if pct > max_pct {
                self.publish_alert(&RiskError::ConcentrationLimit {
                    symbol: symbol.clone(),
                    current_pct: pct,
                    max_pct,
                })
                .await;
            }
            let vol = self.volatility.volatility(symbol).to_f64().unwrap_or(0.0);
            var_terms.push((vol, mv.to_f64().unwrap_or(0.0)));
        }

        let leverage = gross / snapshot.total_value;
        self.metrics
            .set_risk_leverage_ratio(leverage.to_f64().unwrap_or(0.0));
        if leverage > limits.max_leverage {
            self.publish_alert(&RiskError::LeverageExceeded {
                leverage,
                max_leverage: limits.max_leverage,
            })
            .await;
        }

        let z = z_score(limits.var_confidence_level)
            .unwrap_or(Decimal::new(1645, 3))
            .to_f64()
            .unwrap_or(1.645);
        let var = var_from_terms(var_terms.into_iter(), z);
        let total_value = snapshot.total_value.to_f64().unwrap_or(1.0);
        let var_fraction = var / total_value;
        self.metrics.set_risk_var_ratio(var_fraction);
        let max_var = limits.max_var.to_f64().unwrap_or(0.0);
        if var_fraction > max_var {
            self.publish_alert(&RiskError::VarExceeded {
                var: Decimal::from_f64(var_fraction).unwrap_or(Decimal::ZERO),
                max_var: limits.max_var,
            })
            .await;
        }
    }

    /// The Risk Service's dispatch loop: `order.proposed` drives the gating
    /// pipeline, `portfolio.update` refreshes the cached snapshot.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut proposed_rx = self.bus.subscribe(topics::ORDER_PROPOSED).await;
        let mut portfolio_rx = self.bus.subscribe(topics::PORTFOLIO_UPDATE).await;
        let mut monitor = tokio::time::interval(MONITOR_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("risk service shutting down");
                        break;
                    }
                }
                _ = monitor.tick() => {
                    self.monitor_tick().await;
                }
                msg = proposed_rx.recv() => {
                    match msg {
                        Ok(envelope) => {
                            if let Payload::OrderProposed(order) = envelope.data {
                                self.handle_proposed(order).await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "risk service lagged on order.proposed");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = portfolio_rx.recv() => {
                    match msg {
                        Ok(envelope) => {
                            if let Payload::PortfolioUpdate(update) = envelope.data {
                                self.apply_portfolio_update(&update);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "risk service lagged on portfolio.update");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderType, Symbol};
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits::default()
    }

    fn snapshot(cash: Decimal, total_value: Decimal, day_pnl: Decimal, positions: &[(&str, Decimal)]) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash,
            total_value,
            day_pnl,
            position_quantities: positions.iter().map(|(s, q)| (s.to_string(), *q)).collect(),
        }
    }

    fn buy(symbol: &str, qty: Decimal, price: Option<Decimal>) -> Order {
        Order::propose(Symbol::parse(symbol).unwrap(), OrderSide::Buy, OrderType::Market, qty, price).unwrap()
    }

    fn sell(symbol: &str, qty: Decimal, price: Option<Decimal>) -> Order {
        Order::propose(Symbol::parse(symbol).unwrap(), OrderSide::Sell, OrderType::Market, qty, price).unwrap()
    }

    #[test]
    fn s2_insufficient_cash_rejects_with_buffer() {
        let order = buy("AAPL", dec!(100), None);
        let snap = snapshot(dec!(1000), dec!(1000), Decimal::ZERO, &[]);
        let lim = limits();
        let prices = PriceBook::new();
        prices.set("AAPL", dec!(150.00));
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        let err = CashSufficiencyValidator.validate(&ctx).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientCash { required, .. } if required == dec!(16500.00)));
    }

    #[test]
    fn s3_position_size_limit_rejects() {
        let order = buy("AAPL", dec!(100), Some(dec!(150.00)));
        let snap = snapshot(dec!(100000), dec!(100000), Decimal::ZERO, &[]);
        let lim = limits(); // MaxPositionSize = 0.10 -> limit 10000
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        let err = PositionSizeValidator.validate(&ctx).unwrap_err();
        assert!(matches!(err, RiskError::PositionSizeLimit { .. }));
    }

    #[test]
    fn boundary_buy_at_exact_cash_limit_passes_one_more_unit_fails() {
        // Cash=16500 exactly covers 100 * 150 * 1.1; one extra unit must fail.
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let snap_ok = snapshot(dec!(16500.00), dec!(16500.00), Decimal::ZERO, &[]);

        let ok_order = buy("AAPL", dec!(100), None);
        let ctx_ok = RiskContext {
            order: &ok_order,
            effective_price: dec!(150.00),
            snapshot: &snap_ok,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(CashSufficiencyValidator.validate(&ctx_ok).is_ok());

        let too_many = buy("AAPL", dec!(101), None);
        let ctx_fail = RiskContext {
            order: &too_many,
            effective_price: dec!(150.00),
            snapshot: &snap_ok,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(CashSufficiencyValidator.validate(&ctx_fail).is_err());
    }

    #[test]
    fn daily_loss_blocks_regardless_of_order_side() {
        let order = buy("AAPL", dec!(1), Some(dec!(10.00)));
        // day_pnl -6000 on total_value 100000 = 6% loss, limit default 5%.
        let snap = snapshot(dec!(100000), dec!(100000), dec!(-6000), &[]);
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(10.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(matches!(
            DailyLossValidator.validate(&ctx),
            Err(RiskError::DailyLossLimit { .. })
        ));
    }

    #[test]
    fn p6_tightening_position_size_never_approves_more() {
        let order = buy("AAPL", dec!(100), Some(dec!(150.00)));
        let snap = snapshot(dec!(100000), dec!(100000), Decimal::ZERO, &[]);
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));

        let mut loose = limits();
        loose.max_position_size = dec!(0.20); // limit 20000, prospective 15000 -> passes
        let ctx_loose = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &loose,
            prices: &prices,
            volatility: &vols,
        };
        assert!(PositionSizeValidator.validate(&ctx_loose).is_ok());

        let mut tight = limits();
        tight.max_position_size = dec!(0.05); // limit 5000 < 15000 -> fails
        let ctx_tight = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &tight,
            prices: &prices,
            volatility: &vols,
        };
        assert!(PositionSizeValidator.validate(&ctx_tight).is_err());
    }

    #[test]
    fn p5_sell_exceeding_held_quantity_is_rejected() {
        let order = sell("AAPL", dec!(100), Some(dec!(150.00)));
        let snap = snapshot(dec!(1000), dec!(16000), Decimal::ZERO, &[("AAPL", dec!(50))]);
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        let err = PositionHoldingValidator.validate(&ctx).unwrap_err();
        assert!(matches!(
            err,
            RiskError::InsufficientHoldings { held, requested, .. }
            if held == dec!(50) && requested == dec!(100)
        ));
    }

    #[test]
    fn sell_without_any_position_is_rejected() {
        let order = sell("AAPL", dec!(1), Some(dec!(150.00)));
        let snap = snapshot(dec!(1000), dec!(1000), Decimal::ZERO, &[]);
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(matches!(
            PositionHoldingValidator.validate(&ctx),
            Err(RiskError::InsufficientHoldings { .. })
        ));
    }

    #[test]
    fn sell_within_held_quantity_passes() {
        let order = sell("AAPL", dec!(30), Some(dec!(150.00)));
        let snap = snapshot(dec!(1000), dec!(16000), Decimal::ZERO, &[("AAPL", dec!(50))]);
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(PositionHoldingValidator.validate(&ctx).is_ok());
    }

    #[test]
    fn buy_orders_never_gate_on_position_holding() {
        let order = buy("AAPL", dec!(1000), Some(dec!(150.00)));
        let snap = snapshot(dec!(1), dec!(1), Decimal::ZERO, &[]);
        let lim = limits();
        let prices = PriceBook::new();
        let vols = ConstantVolatilitySource(dec!(0.02));
        let ctx = RiskContext {
            order: &order,
            effective_price: dec!(150.00),
            snapshot: &snap,
            limits: &lim,
            prices: &prices,
            volatility: &vols,
        };
        assert!(PositionHoldingValidator.validate(&ctx).is_ok());
    }

    #[tokio::test]
    async fn full_pipeline_approves_well_within_limits_order() {
        let bus = MessageBus::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let prices: Arc<dyn PriceSource> = Arc::new(PriceBook::new());
        let vols: Arc<dyn VolatilitySource> = Arc::new(ConstantVolatilitySource(dec!(0.01)));
        let service = RiskService::new(bus.clone(), metrics, RiskLimits::default(), prices, vols);
        service.apply_portfolio_update(&PortfolioUpdate {
            portfolio_id: "default".into(),
            total_value: dec!(100000),
            cash: dec!(100000),
            total_pnl: Decimal::ZERO,
            day_pnl: Decimal::ZERO,
            position_quantities: HashMap::new(),
            timestamp: chrono::Utc::now(),
        });

        let order = buy("AAPL", dec!(10), Some(dec!(150.00)));
        assert!(service.evaluate(&order).is_ok());
    }
}
