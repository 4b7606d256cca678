use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Runtime-configurable risk limits (spec.md §3). Updatable only via a
/// `config_update` A2A message through the Router, never mutated directly by
/// the Risk Service while validating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_concentration: Decimal,
    pub max_leverage: Decimal,
    pub max_daily_loss: Decimal,
    pub max_var: Decimal,
    pub var_confidence_level: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        // Mirrors the environment defaults in spec.md §6.5.
        Self {
            max_position_size: Decimal::new(10, 2),   // 0.10
            max_concentration: Decimal::new(25, 2),   // 0.25
            max_leverage: Decimal::new(200, 2),        // 2.00
            max_daily_loss: Decimal::new(5, 2),        // 0.05
            max_var: Decimal::new(2, 2),                // 0.02
            var_confidence_level: Decimal::new(95, 2), // 0.95
        }
    }
}

/// `Z(conf)` lookup table for the parametric VaR formula in spec.md §4.4.
/// Returns `None` for confidence levels the table doesn't carry — callers
/// must fall back to a documented default rather than silently using 0.
pub fn z_score(confidence_level: Decimal) -> Option<Decimal> {
    if confidence_level == Decimal::new(90, 2) {
        Some(Decimal::new(128, 2))
    } else if confidence_level == Decimal::new(95, 2) {
        Some(Decimal::new(1645, 3))
    } else if confidence_level == Decimal::new(99, 2) {
        Some(Decimal::new(233, 2))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Published on `risk.alert` whenever a proposed order is rejected, or when
/// the periodic portfolio-level monitor detects a limit breach (spec.md
/// §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub symbol: Option<String>,
    pub current_value: Decimal,
    pub threshold: Decimal,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn z_scores_match_spec_table() {
        assert_eq!(z_score(dec!(0.90)), Some(dec!(1.28)));
        assert_eq!(z_score(dec!(0.95)), Some(dec!(1.645)));
        assert_eq!(z_score(dec!(0.99)), Some(dec!(2.33)));
        assert_eq!(z_score(dec!(0.50)), None);
    }
}
