//! Environment-driven configuration (spec.md §6.5). Grounded in the
//! teacher's `config::Config::from_env` / `config::risk_env_config::
//! RiskEnvConfig::from_env` shape: typed fields, `unwrap_or_else` defaults,
//! `anyhow::Context` on required parses. Invalid values fail startup.

use crate::application::execution_agent::ExecutionConfig;
use crate::domain::risk::RiskLimits;
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::time::Duration;

/// Which `Trader` the Execution Agent is built against (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    Mock,
    Alpaca,
}

impl std::str::FromStr for BrokerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(BrokerMode::Mock),
            "alpaca" => Ok(BrokerMode::Alpaca),
            _ => bail!("Invalid BROKER_MODE: {s}. Must be 'mock' or 'alpaca'"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

/// Connection parameters the core treats as opaque (spec.md §6.5: "database
/// connection parameters, opaque to the core").
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bus_url: String,
    pub jwt_secret: String,
    pub database: DatabaseConfig,
    pub risk_limits: RiskLimits,
    pub execution: ExecutionConfig,
    pub observability: ObservabilityConfig,
    pub initial_cash: Decimal,
    pub broker_mode: BrokerMode,
    pub alpaca: AlpacaConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bus_url = env::var("BUS_URL").unwrap_or_else(|_| "inproc://tradecore".to_string());

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is required")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters, got {}", jwt_secret.len());
        }

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
        };

        let risk_limits = RiskLimits {
            max_position_size: Self::parse_decimal("MAX_POSITION_SIZE", "0.1")?,
            max_concentration: Self::parse_decimal("MAX_CONCENTRATION", "0.25")?,
            max_leverage: Self::parse_decimal("MAX_LEVERAGE", "2.0")?,
            max_daily_loss: Self::parse_decimal("MAX_DAILY_LOSS", "0.05")?,
            max_var: Self::parse_decimal("MAX_VAR", "0.02")?,
            var_confidence_level: Self::parse_decimal("VAR_CONFIDENCE_LEVEL", "0.95")?,
        };

        let execution = ExecutionConfig {
            max_retries: Self::parse_u32("MAX_RETRIES", 3)?,
            initial_delay: Duration::from_secs_f64(Self::parse_f64("INITIAL_DELAY_SECONDS", 1.0)?),
            max_delay: Duration::from_secs_f64(Self::parse_f64("MAX_DELAY_SECONDS", 30.0)?),
            backoff_factor: Self::parse_f64("BACKOFF_FACTOR", 2.0)?,
            status_check_interval: Duration::from_secs_f64(Self::parse_f64("STATUS_CHECK_INTERVAL_SECONDS", 5.0)?),
            status_check_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        };

        let observability = ObservabilityConfig {
            enabled: Self::parse_bool("OBSERVABILITY_ENABLED", true),
            port: Self::parse_u16("OBSERVABILITY_PORT", 9090)?,
        };

        let initial_cash = Self::parse_decimal("INITIAL_CASH", "100000.00")?;

        let broker_mode = env::var("BROKER_MODE")
            .unwrap_or_else(|_| "mock".to_string())
            .parse::<BrokerMode>()?;
        let alpaca = AlpacaConfig {
            api_key: env::var("ALPACA_API_KEY").unwrap_or_default(),
            api_secret: env::var("ALPACA_API_SECRET").unwrap_or_default(),
            base_url: env::var("ALPACA_BASE_URL")
                .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),
        };
        if broker_mode == BrokerMode::Alpaca && (alpaca.api_key.is_empty() || alpaca.api_secret.is_empty()) {
            bail!("BROKER_MODE=alpaca requires ALPACA_API_KEY and ALPACA_API_SECRET");
        }

        Ok(Self {
            bus_url,
            jwt_secret,
            database,
            risk_limits,
            execution,
            observability,
            initial_cash,
            broker_mode,
            alpaca,
        })
    }

    fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<Decimal>()
            .context(format!("failed to parse {key}"))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("failed to parse {key}"))
    }

    fn parse_u16(key: &str, default: u16) -> Result<u16> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u16>()
            .context(format!("failed to parse {key}"))
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("failed to parse {key}"))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required_env() {
        unsafe {
            env::set_var("JWT_SECRET", "a".repeat(32));
            env::set_var("DATABASE_URL", "postgres://localhost/tradecore_test");
        }
    }

    #[test]
    fn defaults_parse_cleanly_with_required_keys_set() {
        set_required_env();
        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.risk_limits.max_position_size, Decimal::new(1, 1));
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.observability.port, 9090);
    }

    #[test]
    fn short_jwt_secret_fails_startup() {
        unsafe {
            env::set_var("JWT_SECRET", "too-short");
            env::set_var("DATABASE_URL", "postgres://localhost/tradecore_test");
        }
        assert!(Config::from_env().is_err());
        set_required_env();
    }
}
