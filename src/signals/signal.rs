// =============================================================================
// TradingSignal -- the entity produced by the signal generator (C3)
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SignalDirection, SignalStatus};

/// Take-profit ladder produced alongside a signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TpLevels {
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
}

/// A directional trading signal, as defined by the data model: id, symbol,
/// direction, confidence, entry/exit levels, indicator snapshot, reasons and
/// a lifecycle status that only ever moves forward through the DAG
/// GENERATED -> PENDING -> (EXECUTED | EXPIRED).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub price: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub tp_levels: TpLevels,
    pub position_size: f64,
    pub risk_reward_ratio: f64,
    pub indicators: HashMap<String, f64>,
    pub reasons: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub status: SignalStatus,
    pub pending_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub outcome: Option<String>,
}

impl TradingSignal {
    /// Validate the direction/price ordering invariant from the data model:
    /// for BUY, `stop_loss < entry_price < tp1 <= tp2 <= tp3`; mirrored for
    /// SELL. `Neutral` signals have no ordering to validate.
    pub fn has_valid_price_ordering(&self) -> bool {
        match self.direction {
            SignalDirection::Buy => {
                self.stop_loss < self.entry_price
                    && self.entry_price < self.tp_levels.tp1
                    && self.tp_levels.tp1 <= self.tp_levels.tp2
                    && self.tp_levels.tp2 <= self.tp_levels.tp3
            }
            SignalDirection::Sell => {
                self.stop_loss > self.entry_price
                    && self.entry_price > self.tp_levels.tp1
                    && self.tp_levels.tp1 >= self.tp_levels.tp2
                    && self.tp_levels.tp2 >= self.tp_levels.tp3
            }
            SignalDirection::Neutral => true,
        }
    }

    /// Whether this signal is still in an actionable (non-terminal) status.
    pub fn is_actionable(&self) -> bool {
        self.status.is_actionable()
    }

    /// Seconds elapsed since `generated_at`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.generated_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_signal(direction: SignalDirection) -> TradingSignal {
        TradingSignal {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            direction,
            confidence: 0.8,
            price: 99.20,
            entry_price: 99.10,
            stop_loss: 98.10,
            tp_levels: TpLevels {
                tp1: 101.10,
                tp2: 103.10,
                tp3: 105.10,
            },
            position_size: 10.1010,
            risk_reward_ratio: 2.0,
            indicators: HashMap::new(),
            reasons: vec!["vwap_trend".into()],
            generated_at: Utc::now(),
            status: SignalStatus::Generated,
            pending_at: None,
            executed_at: None,
            expired_at: None,
            order_id: None,
            outcome: None,
        }
    }

    #[test]
    fn buy_ordering_valid() {
        assert!(base_signal(SignalDirection::Buy).has_valid_price_ordering());
    }

    #[test]
    fn sell_ordering_valid() {
        let mut s = base_signal(SignalDirection::Sell);
        s.entry_price = 99.10;
        s.stop_loss = 100.10;
        s.tp_levels = TpLevels {
            tp1: 97.10,
            tp2: 95.10,
            tp3: 93.10,
        };
        assert!(s.has_valid_price_ordering());
    }

    #[test]
    fn buy_ordering_invalid_when_sl_above_entry() {
        let mut s = base_signal(SignalDirection::Buy);
        s.stop_loss = 99.50;
        assert!(!s.has_valid_price_ordering());
    }

    #[test]
    fn neutral_always_valid() {
        assert!(base_signal(SignalDirection::Neutral).has_valid_price_ordering());
    }
}
