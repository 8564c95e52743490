//! Simulated long-only brokerage account used by the backtest engine.

use crate::types::{Trade, TradeSide};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The single open position of an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OpenPosition {
    /// Number of whole shares
    pub shares: f64,
    /// Fill price of the entry
    pub entry_price: f64,
    /// Bar on which the position was opened
    pub opened: NaiveDate,
}

impl OpenPosition {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares * (price - self.entry_price)
    }
}

/// How many shares an entry buys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sizer {
    /// Every whole share the available cash affords
    #[default]
    AllIn,
    /// A fixed stake; the entry is skipped when cash does not cover it
    Fixed(u32),
}

impl Sizer {
    pub fn shares(&self, cash: f64, price: f64) -> f64 {
        match self {
            Self::AllIn => (cash / price).floor(),
            Self::Fixed(stake) => {
                let stake = f64::from(*stake);
                if stake * price <= cash {
                    stake
                } else {
                    0.0
                }
            }
        }
    }
}

/// Cash plus at most one long position, without commissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedAccount {
    pub symbol: String,
    pub cash: f64,
    pub starting_capital: f64,
    pub sizer: Sizer,
    pub position: Option<OpenPosition>,
    pub trades: Vec<Trade>,
}

impl SimulatedAccount {
    pub fn new(symbol: &str, capital: f64) -> Result<Self> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "initial capital must be positive, got {}",
                capital
            )));
        }
        Ok(Self {
            symbol: symbol.to_uppercase(),
            cash: capital,
            starting_capital: capital,
            sizer: Sizer::AllIn,
            position: None,
            trades: Vec::new(),
        })
    }

    pub fn with_sizer(mut self, sizer: Sizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Cash plus the position marked at `price`.
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.position.map_or(0.0, |p| p.market_value(price))
    }

    /// Open a position of whole shares chosen by the account's sizer.
    ///
    /// Returns `Ok(None)` when cash does not cover the order.
    pub fn buy(&mut self, price: f64, date: NaiveDate) -> Result<Option<Trade>> {
        if self.position.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} already holds a position",
                self.symbol
            )));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::InvalidInput(format!("invalid fill price {}", price)));
        }

        let shares = self.sizer.shares(self.cash, price);
        if shares < 1.0 {
            return Ok(None);
        }

        let trade = Trade::new(&self.symbol, TradeSide::Buy, shares, price, date);
        self.cash -= trade.value;
        self.position = Some(OpenPosition {
            shares,
            entry_price: price,
            opened: date,
        });
        self.trades.push(trade.clone());
        Ok(Some(trade))
    }

    /// Close the whole position at `price`.
    pub fn sell(&mut self, price: f64, date: NaiveDate) -> Result<Trade> {
        let position = self
            .position
            .take()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no open position", self.symbol)))?;

        let pnl = position.unrealized_pnl(price);
        let trade = Trade::new(&self.symbol, TradeSide::Sell, position.shares, price, date).with_pnl(pnl);
        self.cash += trade.value;
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Realized P&L of every closed round trip, in order.
    pub fn closed_pnl(&self) -> Vec<f64> {
        self.trades.iter().filter_map(|t| t.pnl).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_buy_whole_shares() {
        let mut account = SimulatedAccount::new("aapl", 1000.0).unwrap();
        let trade = account.buy(30.0, day(1)).unwrap().unwrap();

        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.shares, 33.0);
        assert_relative_eq!(account.cash, 10.0);
        assert_relative_eq!(account.equity(31.0), 10.0 + 33.0 * 31.0);
        assert!(!account.is_flat());
    }

    #[test]
    fn test_round_trip_pnl() {
        let mut account = SimulatedAccount::new("AAPL", 1000.0).unwrap();
        account.buy(50.0, day(1)).unwrap();
        let trade = account.sell(45.0, day(5)).unwrap();

        assert_eq!(trade.side, TradeSide::Sell);
        assert_relative_eq!(trade.pnl.unwrap(), -100.0);
        assert_relative_eq!(account.cash, 900.0);
        assert!(account.is_flat());
        assert_eq!(account.closed_pnl(), vec![-100.0]);
        assert_eq!(account.trades.len(), 2);
    }

    #[test]
    fn test_cannot_afford_a_share() {
        let mut account = SimulatedAccount::new("BRK", 100.0).unwrap();
        assert!(account.buy(500.0, day(1)).unwrap().is_none());
        assert!(account.is_flat());
        assert_relative_eq!(account.cash, 100.0);
    }

    #[test]
    fn test_fixed_stake() {
        let mut account = SimulatedAccount::new("AAPL", 1000.0).unwrap().with_sizer(Sizer::Fixed(1));
        let trade = account.buy(30.0, day(1)).unwrap().unwrap();
        assert_eq!(trade.shares, 1.0);
        assert_relative_eq!(account.cash, 970.0);

        let trade = account.sell(40.0, day(2)).unwrap();
        assert_relative_eq!(trade.pnl.unwrap(), 10.0);

        // A stake the cash cannot cover is not filled
        let mut small = SimulatedAccount::new("AAPL", 100.0).unwrap().with_sizer(Sizer::Fixed(5));
        assert!(small.buy(30.0, day(1)).unwrap().is_none());
        assert!(small.is_flat());
    }

    #[test]
    fn test_sizer_serialization() {
        assert_eq!(serde_json::to_value(Sizer::AllIn).unwrap(), serde_json::json!("all_in"));
        assert_eq!(
            serde_json::to_value(Sizer::Fixed(10)).unwrap(),
            serde_json::json!({"fixed": 10})
        );
    }

    #[test]
    fn test_invalid_operations() {
        assert!(SimulatedAccount::new("X", 0.0).is_err());

        let mut account = SimulatedAccount::new("X", 1000.0).unwrap();
        assert!(account.sell(10.0, day(1)).is_err());
        account.buy(10.0, day(1)).unwrap();
        assert!(account.buy(10.0, day(2)).is_err());
        assert!(SimulatedAccount::new("Y", 10.0).unwrap().buy(0.0, day(1)).is_err());
    }
}
