use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the Order Service at the validation/state-machine boundary.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid order: {reason}")]
    Validation { reason: String },

    #[error("Illegal transition for order {order_id}: {from} -> {to}")]
    InvalidStateTransition {
        order_id: String,
        from: String,
        to: String,
    },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },
}

/// Reasons the Risk Service rejects a proposed order. Order matters: this is
/// the sequence in which `RiskValidator`s run, and the first failure wins.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    #[error("Insufficient cash: need ${required}, available ${available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },

    #[error("Position size limit exceeded for {symbol}: ${prospective} > ${limit}")]
    PositionSizeLimit {
        symbol: String,
        prospective: Decimal,
        limit: Decimal,
    },

    #[error("Concentration limit exceeded for {symbol}: {current_pct:.2}% > {max_pct:.2}%")]
    ConcentrationLimit {
        symbol: String,
        current_pct: f64,
        max_pct: f64,
    },

    #[error("Portfolio VaR exceeded: {var} > {max_var}")]
    VarExceeded { var: Decimal, max_var: Decimal },

    #[error("Daily loss limit breached: {loss_pct:.2}% > {limit_pct:.2}%")]
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },

    #[error("Leverage limit exceeded: {leverage} > {max_leverage}")]
    LeverageExceeded {
        leverage: Decimal,
        max_leverage: Decimal,
    },

    #[error("Sell of {requested} {symbol} exceeds held quantity {held}")]
    InsufficientHoldings {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },
}

impl RiskError {
    /// Stable, machine-readable reason code used on `order.rejected` / `risk.alert`.
    pub fn alert_type(&self) -> &'static str {
        match self {
            RiskError::InsufficientCash { .. } => "INSUFFICIENT_CASH",
            RiskError::PositionSizeLimit { .. } => "POSITION_SIZE",
            RiskError::ConcentrationLimit { .. } => "CONCENTRATION",
            RiskError::VarExceeded { .. } => "VAR_EXCEEDED",
            RiskError::DailyLossLimit { .. } => "DAILY_LOSS",
            RiskError::LeverageExceeded { .. } => "LEVERAGE_EXCEEDED",
            RiskError::InsufficientHoldings { .. } => "INSUFFICIENT_QUANTITY",
        }
    }

    /// Severity per the mapping in spec.md §4.4.
    pub fn severity(&self) -> super::risk::AlertSeverity {
        use super::risk::AlertSeverity::*;
        match self {
            RiskError::VarExceeded { .. }
            | RiskError::DailyLossLimit { .. }
            | RiskError::LeverageExceeded { .. } => Critical,
            RiskError::InsufficientCash { .. }
            | RiskError::PositionSizeLimit { .. }
            | RiskError::InsufficientHoldings { .. } => High,
            RiskError::ConcentrationLimit { .. } => Medium,
        }
    }
}

/// Broker-facing errors the Execution Agent must classify as retryable or fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("broker error [{code}]: {message}")]
    Broker { code: String, message: String },

    #[error("broker call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ExecutionError {
    const FATAL_CODES: &'static [&'static str] =
        &["ORDER_REJECTED", "INSUFFICIENT_FUNDS", "INVALID_SYMBOL"];
    const RETRYABLE_CODES: &'static [&'static str] =
        &["CONNECTION_FAILED", "TIMEOUT", "TEMPORARY_ERROR"];

    /// Per spec.md §4.5 step 3: known fatal codes short-circuit retries, known
    /// retryable codes retry, and anything unrecognized defaults to retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Timeout { .. } => true,
            ExecutionError::RetriesExhausted { .. } => false,
            ExecutionError::Broker { code, .. } => {
                if Self::FATAL_CODES.contains(&code.as_str()) {
                    false
                } else {
                    true
                }
            }
        }
    }
}

/// Errors the Portfolio Service raises when an executed order violates an
/// invariant that should have been caught upstream by the Risk Service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortfolioError {
    #[error("insufficient cash: need ${need}, available ${available}")]
    InsufficientCash { need: Decimal, available: Decimal },

    #[error("insufficient quantity for {symbol}: need {need}, held {held}")]
    InsufficientQuantity {
        symbol: String,
        need: Decimal,
        held: Decimal,
    },

    #[error("position not found: {symbol}")]
    PositionNotFound { symbol: String },

    #[error("portfolio not found: {portfolio_id}")]
    NotFound { portfolio_id: String },
}

/// Control-plane errors raised by the Central Router.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouterError {
    #[error("no eligible agent for selector {selector}")]
    NoEligibleAgent { selector: String },

    #[error("agent unavailable: {agent_id}")]
    AgentUnavailable { agent_id: String },

    #[error("circuit open for agent {agent_id}")]
    CircuitOpen { agent_id: String },

    #[error("request to {agent_id} timed out after {timeout_ms}ms")]
    Timeout { agent_id: String, timeout_ms: u64 },
}

/// Bus transport errors. The in-process bus only surfaces `Closed`, but the
/// variant set matches what a networked transport (e.g. NATS) would report so
/// swapping the transport later doesn't change caller-facing error handling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("no subscribers on topic {topic}")]
    NoSubscribers { topic: String },

    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fatal_broker_codes_are_not_retryable() {
        let err = ExecutionError::Broker {
            code: "ORDER_REJECTED".to_string(),
            message: "bad symbol".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn known_retryable_codes_retry() {
        let err = ExecutionError::Broker {
            code: "TIMEOUT".to_string(),
            message: "slow".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_broker_codes_default_retryable() {
        let err = ExecutionError::Broker {
            code: "WEIRD_NEW_CODE".to_string(),
            message: "???".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn risk_error_severity_mapping() {
        assert_eq!(
            RiskError::VarExceeded {
                var: dec!(1),
                max_var: dec!(0)
            }
            .severity(),
            super::super::risk::AlertSeverity::Critical
        );
        assert_eq!(
            RiskError::ConcentrationLimit {
                symbol: "AAPL".into(),
                current_pct: 50.0,
                max_pct: 10.0
            }
            .severity(),
            super::super::risk::AlertSeverity::Medium
        );
    }
}
