//! REST adapter over the Alpaca trading API, trimmed from the teacher's
//! `infrastructure::alpaca::AlpacaExecutionService` to the [`Trader`]
//! surface: place/cancel/status/account, no market-data or streaming.

use super::Trader;
use crate::domain::order::{Order, OrderSide, OrderType};
use crate::domain::trader_types::{AccountInfo, BrokerError, BrokerOrderState, OrderResult, OrderStatusReport};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn http_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    reqwest_middleware::ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

#[derive(Debug, Serialize)]
struct AlpacaOrderRequest {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    status: String,
    filled_avg_price: Option<String>,
    filled_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    cash: String,
    buying_power: String,
}

fn parse_broker_state(status: &str) -> BrokerOrderState {
    match status {
        "filled" => BrokerOrderState::Filled,
        "partially_filled" => BrokerOrderState::PartiallyFilled,
        "canceled" | "cancelled" => BrokerOrderState::Cancelled,
        "rejected" | "expired" => BrokerOrderState::Rejected,
        _ => BrokerOrderState::Accepted,
    }
}

fn request_failed(context: &str, err: impl std::fmt::Display) -> BrokerError {
    BrokerError {
        code: "CONNECTION_FAILED".to_string(),
        message: format!("{context}: {err}"),
        details: None,
    }
}

pub struct AlpacaTrader {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    connected: AtomicBool,
}

impl AlpacaTrader {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            api_secret,
            base_url,
            connected: AtomicBool::new(false),
        }
    }

    fn auth(&self, builder: reqwest_middleware::RequestBuilder) -> reqwest_middleware::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }
}

#[async_trait]
impl Trader for AlpacaTrader {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.get_account_info().await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<OrderResult, BrokerError> {
        let side_str = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let (type_str, limit_price) = match order.order_type {
            OrderType::Market => ("market".to_string(), None),
            OrderType::Limit => ("limit".to_string(), order.price.map(|p| p.to_string())),
            OrderType::Stop => ("stop".to_string(), order.price.map(|p| p.to_string())),
        };

        let body = AlpacaOrderRequest {
            symbol: order.symbol.as_str().to_string(),
            qty: order.quantity.to_string(),
            side: side_str.to_string(),
            order_type: type_str,
            time_in_force: "gtc".to_string(),
            limit_price,
        };

        let url = format!("{}/v2/orders", self.base_url);
        let response = self
            .auth(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("place_order", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError {
                code: if status.as_u16() == 422 {
                    "ORDER_REJECTED".to_string()
                } else {
                    "BROKER_ERROR".to_string()
                },
                message: text,
                details: None,
            });
        }

        let parsed: AlpacaOrderResponse = response
            .json()
            .await
            .map_err(|e| request_failed("decode order response", e))?;

        let executed_price = parsed.filled_avg_price.as_deref().and_then(|s| s.parse::<Decimal>().ok());
        let executed_quantity = parsed.filled_qty.as_deref().and_then(|s| s.parse::<Decimal>().ok());

        Ok(OrderResult {
            broker_order_id: parsed.id,
            status: parse_broker_state(&parsed.status),
            executed_price,
            executed_quantity,
            fees: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        let response = self
            .auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| request_failed("cancel_order", e))?;

        if response.status().as_u16() == 404 || response.status().is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(BrokerError {
            code: "BROKER_ERROR".to_string(),
            message: text,
            details: None,
        })
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, broker_order_id);
        let response = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| request_failed("get_order_status", e))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError {
                code: "ORDER_NOT_FOUND".to_string(),
                message: text,
                details: None,
            });
        }

        let parsed: AlpacaOrderResponse = response
            .json()
            .await
            .map_err(|e| request_failed("decode order status", e))?;

        let executed_price = parsed.filled_avg_price.as_deref().and_then(|s| s.parse::<Decimal>().ok());
        let executed_quantity = parsed
            .filled_qty
            .as_deref()
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);

        Ok(OrderStatusReport {
            broker_order_id: parsed.id,
            status: parse_broker_state(&parsed.status),
            executed_price,
            executed_quantity: Some(executed_quantity),
            remaining_quantity: Decimal::ZERO,
            fees: Decimal::ZERO,
            last_update: chrono::Utc::now(),
            fills: Vec::new(),
        })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        let url = format!("{}/v2/account", self.base_url);
        let response = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| request_failed("get_account_info", e))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError {
                code: "BROKER_ERROR".to_string(),
                message: text,
                details: None,
            });
        }

        let account: AlpacaAccount = response
            .json()
            .await
            .map_err(|e| request_failed("decode account", e))?;

        Ok(AccountInfo {
            cash: account.cash.parse().unwrap_or(Decimal::ZERO),
            buying_power: account.buying_power.parse().unwrap_or(Decimal::ZERO),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn broker_name(&self) -> &str {
        "alpaca"
    }
}
