//! Prometheus metrics for the trading pipeline, trimmed from the teacher's
//! `infrastructure::observability::metrics::Metrics` (same `Registry` +
//! `GenericGauge`/`CounterVec`/`HistogramVec` shape, renamed `tradecore_`
//! metrics for this pipeline's components instead of strategy/sentiment
//! metrics that no longer apply).

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub portfolio_value_usd: GenericGauge<AtomicF64>,
    pub portfolio_cash_usd: GenericGauge<AtomicF64>,
    pub positions_count: GenericGauge<AtomicF64>,
    pub position_value_usd: GenericGaugeVec<AtomicF64>,
    pub daily_pnl_usd: GenericGauge<AtomicF64>,
    pub orders_total: CounterVec,
    pub risk_rejections_total: CounterVec,
    pub circuit_breaker_open: GenericGaugeVec<AtomicF64>,
    pub uptime_seconds: GenericGauge<AtomicF64>,
    pub broker_latency_seconds: HistogramVec,
    pub execution_retries_total: CounterVec,
    pub risk_var_ratio: GenericGauge<AtomicF64>,
    pub risk_leverage_ratio: GenericGauge<AtomicF64>,
    pub risk_concentration_pct: GenericGaugeVec<AtomicF64>,
    pub risk_validation_latency_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let portfolio_value_usd = Gauge::with_opts(Opts::new(
            "tradecore_portfolio_value_usd",
            "Total portfolio value in USD",
        ))?;
        registry.register(Box::new(portfolio_value_usd.clone()))?;

        let portfolio_cash_usd = Gauge::with_opts(Opts::new(
            "tradecore_portfolio_cash_usd",
            "Available cash in USD",
        ))?;
        registry.register(Box::new(portfolio_cash_usd.clone()))?;

        let positions_count = Gauge::with_opts(Opts::new(
            "tradecore_positions_count",
            "Number of open positions",
        ))?;
        registry.register(Box::new(positions_count.clone()))?;

        let position_value_usd = GaugeVec::new(
            Opts::new("tradecore_position_value_usd", "Position value per symbol in USD"),
            &["symbol"],
        )?;
        registry.register(Box::new(position_value_usd.clone()))?;

        let daily_pnl_usd = Gauge::with_opts(Opts::new("tradecore_daily_pnl_usd", "Daily P&L in USD"))?;
        registry.register(Box::new(daily_pnl_usd.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("tradecore_orders_total", "Total orders by side and status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let risk_rejections_total = CounterVec::new(
            Opts::new("tradecore_risk_rejections_total", "Orders rejected by risk validator"),
            &["reason"],
        )?;
        registry.register(Box::new(risk_rejections_total.clone()))?;

        let circuit_breaker_open = GaugeVec::new(
            Opts::new("tradecore_circuit_breaker_open", "Circuit breaker state (1=open) by agent"),
            &["agent_id"],
        )?;
        registry.register(Box::new(circuit_breaker_open.clone()))?;

        let uptime_seconds =
            Gauge::with_opts(Opts::new("tradecore_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let broker_latency_seconds = HistogramVec::new(
            HistogramOpts::new("tradecore_broker_latency_seconds", "Broker API call latency in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["broker", "operation"],
        )?;
        registry.register(Box::new(broker_latency_seconds.clone()))?;

        let execution_retries_total = CounterVec::new(
            Opts::new("tradecore_execution_retries_total", "Execution Agent retry attempts"),
            &["broker"],
        )?;
        registry.register(Box::new(execution_retries_total.clone()))?;

        let risk_var_ratio = Gauge::with_opts(Opts::new(
            "tradecore_risk_var_ratio",
            "Current parametric VaR as a fraction of total portfolio value",
        ))?;
        registry.register(Box::new(risk_var_ratio.clone()))?;

        let risk_leverage_ratio = Gauge::with_opts(Opts::new(
            "tradecore_risk_leverage_ratio",
            "Current gross exposure divided by total portfolio value",
        ))?;
        registry.register(Box::new(risk_leverage_ratio.clone()))?;

        let risk_concentration_pct = GaugeVec::new(
            Opts::new("tradecore_risk_concentration_pct", "Per-symbol share of total portfolio value"),
            &["symbol"],
        )?;
        registry.register(Box::new(risk_concentration_pct.clone()))?;

        let risk_validation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tradecore_risk_validation_latency_seconds",
                "Time to run the full Risk Service validator pipeline",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(risk_validation_latency_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            portfolio_value_usd,
            portfolio_cash_usd,
            positions_count,
            position_value_usd,
            daily_pnl_usd,
            orders_total,
            risk_rejections_total,
            circuit_breaker_open,
            uptime_seconds,
            broker_latency_seconds,
            execution_retries_total,
            risk_var_ratio,
            risk_leverage_ratio,
            risk_concentration_pct,
            risk_validation_latency_seconds,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    pub fn set_position_value(&self, symbol: &str, value: f64) {
        self.position_value_usd.with_label_values(&[symbol]).set(value);
    }

    pub fn inc_orders(&self, side: &str, status: &str) {
        self.orders_total.with_label_values(&[side, status]).inc();
    }

    pub fn inc_risk_rejection(&self, reason: &str) {
        self.risk_rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn set_circuit_breaker_open(&self, agent_id: &str, open: bool) {
        self.circuit_breaker_open
            .with_label_values(&[agent_id])
            .set(if open { 1.0 } else { 0.0 });
    }

    pub fn observe_broker_latency(&self, broker: &str, operation: &str, seconds: f64) {
        self.broker_latency_seconds
            .with_label_values(&[broker, operation])
            .observe(seconds);
    }

    pub fn inc_execution_retry(&self, broker: &str) {
        self.execution_retries_total.with_label_values(&[broker]).inc();
    }

    pub fn set_risk_var_ratio(&self, value: f64) {
        self.risk_var_ratio.set(value);
    }

    pub fn set_risk_leverage_ratio(&self, value: f64) {
        self.risk_leverage_ratio.set(value);
    }

    pub fn set_risk_concentration_pct(&self, symbol: &str, value: f64) {
        self.risk_concentration_pct.with_label_values(&[symbol]).set(value);
    }

    pub fn observe_risk_validation_latency(&self, seconds: f64) {
        self.risk_validation_latency_seconds.observe(seconds);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to build default Metrics registry")
    }
}
