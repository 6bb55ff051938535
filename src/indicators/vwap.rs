// =============================================================================
// Volume-Weighted Average Price (VWAP), session-reset
// =============================================================================
//
// VWAP = Sum(typical_price * volume) / Sum(volume), accumulated only over
// candles belonging to the current UTC day ("session"). The session resets
// at UTC midnight -- candles from a previous day never contribute.

use crate::market_data::Candle;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

fn utc_day(open_time_ms: i64) -> i64 {
    open_time_ms.div_euclid(MS_PER_DAY)
}

/// Compute the session VWAP over the given closed candles (oldest-first).
///
/// Only candles that fall on the same UTC calendar day as the last candle are
/// included. Returns `None` if `candles` is empty or total volume is zero.
pub fn calculate_vwap(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let session_day = utc_day(last.open_time);

    let mut pv_sum = 0.0_f64;
    let mut vol_sum = 0.0_f64;

    for c in candles.iter().rev() {
        if utc_day(c.open_time) != session_day {
            break;
        }
        let typical = (c.high + c.low + c.close) / 3.0;
        pv_sum += typical * c.volume;
        vol_sum += c.volume;
    }

    if vol_sum <= 0.0 {
        return None;
    }
    let vwap = pv_sum / vol_sum;
    if vwap.is_finite() {
        Some(vwap)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            trades_count: 10,
            taker_buy_volume: volume / 2.0,
            taker_buy_quote_volume: volume * close / 2.0,
            is_closed: true,
        }
    }

    #[test]
    fn vwap_single_candle_equals_typical_price() {
        let candles = vec![candle(0, 102.0, 98.0, 100.0, 50.0)];
        let vwap = calculate_vwap(&candles).unwrap();
        assert!((vwap - 100.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_empty_returns_none() {
        assert!(calculate_vwap(&[]).is_none());
    }

    #[test]
    fn vwap_zero_volume_returns_none() {
        let candles = vec![candle(0, 102.0, 98.0, 100.0, 0.0)];
        assert!(calculate_vwap(&candles).is_none());
    }

    #[test]
    fn vwap_excludes_previous_session() {
        let mut candles = vec![candle(0, 50.0, 50.0, 50.0, 1000.0)]; // day 0, huge volume
        // day 1 candles, far apart in time
        for i in 0..5 {
            candles.push(candle(MS_PER_DAY + i * 60_000, 101.0, 99.0, 100.0, 10.0));
        }
        let vwap = calculate_vwap(&candles).unwrap();
        // Should be dominated purely by day-1 candles (all ~100), not dragged to 50.
        assert!((vwap - 100.0).abs() < 1.0, "got {vwap}");
    }
}
