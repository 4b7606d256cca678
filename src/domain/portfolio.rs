use super::errors::PortfolioError;
use super::order::{Order, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Per-symbol holding within a portfolio (spec.md §3).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.average_price) * self.quantity
    }
}

/// Aggregate account state. Exactly one "default" portfolio exists in this
/// core's scope (spec.md §3, §9 open question resolved in DESIGN.md).
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub id: String,
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub realized_pnl: Decimal,
    pub day_pnl: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(id: impl Into<String>, starting_cash: Decimal) -> Self {
        Self {
            id: id.into(),
            cash: starting_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            day_pnl: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    /// `TotalValue = Cash + Σ Position.MarketValue` (P2).
    pub fn total_value(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(Position::market_value)
                .sum::<Decimal>()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl
            + self
                .positions
                .values()
                .map(Position::unrealized_pnl)
                .sum::<Decimal>()
    }

    /// Gross exposure relative to portfolio value (spec.md §4.4).
    pub fn leverage(&self) -> Decimal {
        let total = self.total_value();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        let gross: Decimal = self
            .positions
            .values()
            .map(|p| p.market_value().abs())
            .sum();
        gross / total
    }

    /// Applies a terminal `Executed` order, net of broker fees reported on
    /// `order.executed` (spec.md §4.5 schema). Preconditions are the
    /// caller's (`Order::execute` must have already succeeded) per spec.md
    /// §4.6.
    pub fn apply_executed_order(
        &mut self,
        order: &Order,
        fees: Decimal,
    ) -> Result<(), PortfolioError> {
        let price = order
            .executed_price
            .expect("executed order must carry executed_price");
        let qty = order
            .executed_quantity
            .expect("executed order must carry executed_quantity");
        let symbol = order.symbol.as_str().to_string();

        match order.side {
            OrderSide::Buy => {
                let cost = qty * price + fees;
                if self.cash < cost {
                    return Err(PortfolioError::InsufficientCash {
                        need: cost,
                        available: self.cash,
                    });
                }
                self.cash -= cost;
                let position = self.positions.entry(symbol.clone()).or_insert(Position {
                    symbol: symbol.clone(),
                    quantity: Decimal::ZERO,
                    average_price: price,
                    current_price: price,
                });
                let new_qty = position.quantity + qty;
                position.average_price =
                    (position.quantity * position.average_price + qty * price) / new_qty;
                position.quantity = new_qty;
                position.current_price = price;
            }
            OrderSide::Sell => {
                let position = self
                    .positions
                    .get_mut(&symbol)
                    .ok_or_else(|| PortfolioError::PositionNotFound {
                        symbol: symbol.clone(),
                    })?;
                if position.quantity < qty {
                    return Err(PortfolioError::InsufficientQuantity {
                        symbol: symbol.clone(),
                        need: qty,
                        held: position.quantity,
                    });
                }
                let realized = (price - position.average_price) * qty - fees;
                self.realized_pnl += realized;
                self.day_pnl += realized;
                self.cash += qty * price - fees;
                position.quantity -= qty;
                position.current_price = price;
                if position.quantity.is_zero() {
                    self.positions.remove(&symbol);
                }
            }
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Re-marks open positions and recomputes derived values (spec.md §4.6
    /// `UpdatePositionPrices`).
    pub fn update_prices(&mut self, prices: &HashMap<String, Decimal>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.current_price = price;
            }
        }
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderType, Symbol};
    use rust_decimal_macros::dec;

    fn executed_order(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> Order {
        let mut order = Order::propose(
            Symbol::parse(symbol).unwrap(),
            side,
            OrderType::Market,
            qty,
            None,
        )
        .unwrap();
        order.approve().unwrap();
        order.execute(price, qty).unwrap();
        order
    }

    #[test]
    fn s1_happy_path_buy() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let order = executed_order("AAPL", OrderSide::Buy, dec!(100), dec!(150.00));
        portfolio.apply_executed_order(&order, dec!(1.00)).unwrap();

        assert_eq!(portfolio.cash, dec!(84999.00));
        let pos = portfolio.positions.get("AAPL").unwrap();
        assert_eq!(pos.quantity, dec!(100));
        assert_eq!(pos.average_price, dec!(150.00));
        assert_eq!(portfolio.total_value(), dec!(99999.00));
    }

    #[test]
    fn weighted_average_price_on_second_buy() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let first = executed_order("AAPL", OrderSide::Buy, dec!(100), dec!(150.00));
        portfolio.apply_executed_order(&first, Decimal::ZERO).unwrap();
        let second = executed_order("AAPL", OrderSide::Buy, dec!(100), dec!(160.00));
        portfolio.apply_executed_order(&second, Decimal::ZERO).unwrap();

        let pos = portfolio.positions.get("AAPL").unwrap();
        assert_eq!(pos.quantity, dec!(200));
        assert_eq!(pos.average_price, dec!(155.00));
    }

    #[test]
    fn p4_buy_exceeding_cash_is_rejected_and_state_untouched() {
        let mut portfolio = Portfolio::new("default", dec!(1000));
        let order = executed_order("AAPL", OrderSide::Buy, dec!(100), dec!(150.00));
        let result = portfolio.apply_executed_order(&order, Decimal::ZERO);
        assert!(matches!(result, Err(PortfolioError::InsufficientCash { .. })));
        assert_eq!(portfolio.cash, dec!(1000));
        assert!(portfolio.positions.is_empty());
    }

    #[test]
    fn p5_sell_without_position_is_rejected() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let order = executed_order("AAPL", OrderSide::Sell, dec!(10), dec!(150.00));
        let result = portfolio.apply_executed_order(&order, Decimal::ZERO);
        assert!(matches!(result, Err(PortfolioError::PositionNotFound { .. })));
        assert_eq!(portfolio.cash, dec!(100000));
    }

    #[test]
    fn sell_more_than_held_is_rejected() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let buy = executed_order("AAPL", OrderSide::Buy, dec!(10), dec!(150.00));
        portfolio.apply_executed_order(&buy, Decimal::ZERO).unwrap();

        let sell = executed_order("AAPL", OrderSide::Sell, dec!(20), dec!(150.00));
        let result = portfolio.apply_executed_order(&sell, Decimal::ZERO);
        assert!(matches!(
            result,
            Err(PortfolioError::InsufficientQuantity { .. })
        ));
    }

    #[test]
    fn sell_closes_position_and_realizes_pnl() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let buy = executed_order("AAPL", OrderSide::Buy, dec!(10), dec!(150.00));
        portfolio.apply_executed_order(&buy, Decimal::ZERO).unwrap();

        let sell = executed_order("AAPL", OrderSide::Sell, dec!(10), dec!(160.00));
        portfolio.apply_executed_order(&sell, Decimal::ZERO).unwrap();

        assert!(!portfolio.positions.contains_key("AAPL"));
        assert_eq!(portfolio.realized_pnl, dec!(100.00));
    }

    #[test]
    fn p2_total_value_matches_derived_formula() {
        let mut portfolio = Portfolio::new("default", dec!(100000));
        let order = executed_order("AAPL", OrderSide::Buy, dec!(100), dec!(150.00));
        portfolio.apply_executed_order(&order, Decimal::ZERO).unwrap();

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), dec!(155.00));
        portfolio.update_prices(&prices);

        let expected = portfolio.cash + portfolio.positions["AAPL"].market_value();
        assert_eq!(portfolio.total_value(), expected);
    }
}
