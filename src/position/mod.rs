// =============================================================================
// Position Module
// =============================================================================
//
// Entities owned exclusively by the paper futures simulator: `Position` (the
// PENDING -> OPEN -> CLOSED|CANCELLED state machine) and `Account` (the
// realized-PnL wallet). Grounded on `position_engine.rs`'s `Position` struct
// shape, generalized to the full state machine and liquidation model.

pub mod simulator;

pub use simulator::{PaperFuturesSimulator, SimulatorParams};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ExitReason, PositionSide, PositionStatus};

/// A single tracked futures position, PENDING through to CLOSED or CANCELLED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub status: PositionStatus,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub margin: f64,
    pub liquidation_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub realized_pnl: f64,
    pub exit_reason: Option<ExitReason>,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub signal_id: Option<Uuid>,
}

impl Position {
    /// `margin = quantity * entry_price / leverage`, the invariant from the
    /// data model. Used in tests and as a sanity check after merges.
    pub fn expected_margin(&self) -> f64 {
        if self.leverage > 0.0 {
            self.quantity * self.entry_price / self.leverage
        } else {
            0.0
        }
    }

    /// Unrealized PnL given a current mark price.
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (mark_price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - mark_price) * self.quantity,
        }
    }

    /// Return on equity, as a percentage of margin.
    pub fn roe_pct(&self, mark_price: f64) -> f64 {
        if self.margin > 0.0 {
            self.unrealized_pnl(mark_price) / self.margin * 100.0
        } else {
            0.0
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PositionStatus::Closed | PositionStatus::Cancelled)
    }
}

/// The singleton realized-PnL wallet. Equity is derived, not stored: equity =
/// `balance + sum(unrealized_pnl)` over open positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
}

impl Account {
    pub fn new(starting_balance: f64) -> Self {
        Self { balance: starting_balance }
    }

    /// Apply a realized PnL atomically (the only mutation path — balance is
    /// never read-modified across a CLOSED transition).
    pub fn apply_realized_pnl(&mut self, pnl: f64) {
        self.balance += pnl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            status: PositionStatus::Open,
            entry_price: 100.0,
            quantity: 2.0,
            leverage: 10.0,
            margin: 20.0,
            liquidation_price: 90.0,
            stop_loss: 98.0,
            take_profit: 104.0,
            open_time: Utc::now(),
            close_time: None,
            close_price: None,
            realized_pnl: 0.0,
            exit_reason: None,
            highest_price: 100.0,
            lowest_price: 100.0,
            signal_id: None,
        }
    }

    #[test]
    fn margin_invariant_holds() {
        let pos = long_position();
        assert!((pos.expected_margin() - pos.margin).abs() < 1e-9);
    }

    #[test]
    fn long_unrealized_pnl_positive_when_price_rises() {
        let pos = long_position();
        assert_eq!(pos.unrealized_pnl(102.0), 4.0);
    }

    #[test]
    fn short_unrealized_pnl_mirrors_long() {
        let mut pos = long_position();
        pos.side = PositionSide::Short;
        assert_eq!(pos.unrealized_pnl(98.0), 4.0);
    }

    #[test]
    fn account_apply_realized_pnl_is_additive() {
        let mut acct = Account::new(10_000.0);
        acct.apply_realized_pnl(20.2020);
        acct.apply_realized_pnl(-5.0);
        assert!((acct.balance - 10_015.2020).abs() < 1e-6);
    }
}
