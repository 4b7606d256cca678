//! Headless entry point: wires the bus, the Router, and the four pipeline
//! agents, then serves the admin/health surface until Ctrl+C (spec.md §4,
//! §6.4). Grounded in the teacher's `main.rs` boot sequence (dotenv, tracing,
//! `Config::from_env`, `Application::build().start()`), stripped of the
//! teacher's UI thread and channel plumbing since this core has no frontend.

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradecore::application::execution_agent::ExecutionAgent;
use tradecore::application::portfolio_service::PortfolioService;
use tradecore::application::risk_service::{ConstantVolatilitySource, PriceBook, RiskService};
use tradecore::config::{BrokerMode, Config};
use tradecore::domain::portfolio::Portfolio;
use tradecore::domain::router_types::AgentDescriptor;
use tradecore::infrastructure::bus::MessageBus;
use tradecore::infrastructure::health;
use tradecore::infrastructure::observability::Metrics;
use tradecore::infrastructure::router::Router;
use tradecore::infrastructure::trader::alpaca::AlpacaTrader;
use tradecore::infrastructure::trader::mock::MockTrader;
use tradecore::infrastructure::trader::Trader;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("loading configuration");
    let config = Config::from_env()?;

    let bus = MessageBus::new();
    let metrics = Arc::new(Metrics::new()?);
    let router = Arc::new(Router::new(bus.clone()));

    let trader: Arc<dyn Trader> = match config.broker_mode {
        BrokerMode::Mock => Arc::new(MockTrader::new(config.initial_cash)),
        BrokerMode::Alpaca => Arc::new(AlpacaTrader::new(
            config.alpaca.api_key.clone(),
            config.alpaca.api_secret.clone(),
            config.alpaca.base_url.clone(),
        )),
    };
    trader.connect().await.map_err(|e| anyhow::anyhow!("broker connect failed: {}", e.message))?;

    let prices = Arc::new(PriceBook::new());
    let volatility = Arc::new(ConstantVolatilitySource(dec!(0.02)));

    let risk_service = Arc::new(RiskService::new(
        bus.clone(),
        metrics.clone(),
        config.risk_limits.clone(),
        prices.clone(),
        volatility,
    ));
    let execution_agent = Arc::new(ExecutionAgent::new(
        bus.clone(),
        metrics.clone(),
        trader.clone(),
        config.execution.clone(),
    ));
    let portfolio_service = Arc::new(PortfolioService::new(
        bus.clone(),
        metrics.clone(),
        Portfolio::new("default", config.initial_cash),
    ));

    router
        .register(AgentDescriptor::new("risk-service", "risk", "inproc://risk-service"))
        .await;
    router
        .register(AgentDescriptor::new("execution-agent", "execution", "inproc://execution-agent"))
        .await;
    router
        .register(AgentDescriptor::new("portfolio-service", "portfolio", "inproc://portfolio-service"))
        .await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let risk_handle = tokio::spawn(risk_service.clone().run(shutdown_rx.clone()));
    let execution_handle = tokio::spawn(execution_agent.clone().run(shutdown_rx.clone()));
    let portfolio_handle = tokio::spawn(portfolio_service.clone().run(shutdown_rx.clone()));

    let router_for_sweep = router.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    router_for_sweep.sweep_health().await;
                }
            }
        }
    });

    let app = health::build(metrics.clone(), router.clone());
    let addr = format!("0.0.0.0:{}", config.observability.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "admin surface listening");

    let serve_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "admin server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(risk_handle, execution_handle, portfolio_handle, sweep_handle);
    serve_handle.abort();

    Ok(())
}
