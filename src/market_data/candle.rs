// =============================================================================
// Candle — a single OHLCV bar
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

/// A single OHLCV candle from the upstream kline stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// Validate the OHLCV invariants from the data model: `low <=
    /// min(open,close) <= max(open,close) <= high`, non-negative volume,
    /// positive prices.
    pub fn is_valid(&self) -> bool {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return false;
        }
        if self.volume < 0.0 {
            return false;
        }
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && hi <= self.high
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 59_999,
            open,
            high,
            low,
            close,
            volume: 10.0,
            quote_volume: 100.0,
            trades_count: 5,
            taker_buy_volume: 5.0,
            taker_buy_quote_volume: 50.0,
            is_closed: true,
        }
    }

    #[test]
    fn valid_candle_passes() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_valid());
    }

    #[test]
    fn high_below_close_is_invalid() {
        assert!(!candle(100.0, 101.0, 95.0, 102.0).is_valid());
    }

    #[test]
    fn low_above_open_is_invalid() {
        assert!(!candle(100.0, 105.0, 101.0, 102.0).is_valid());
    }

    #[test]
    fn negative_volume_is_invalid() {
        let mut c = candle(100.0, 105.0, 95.0, 102.0);
        c.volume = -1.0;
        assert!(!c.is_valid());
    }

    #[test]
    fn zero_price_is_invalid() {
        assert!(!candle(0.0, 105.0, 95.0, 102.0).is_valid());
    }
}
