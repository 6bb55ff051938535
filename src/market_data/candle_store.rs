// =============================================================================
// CandleStore -- thread-safe bounded ring buffer per (symbol, timeframe)
// =============================================================================
//
// Grounded on the teacher's `CandleBuffer` (market_data/candle_buffer.rs):
// same VecDeque-per-key ring, same in-progress-candle replace-in-place update
// rule. Generalized to enforce the monotone-timestamp invariant explicitly and
// to surface gaps so the upstream client (C8) can gap-fill via the historical
// loader (C11) instead of silently dropping bars.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::warn;

use super::candle::{Candle, CandleKey};

/// Minimum ring capacity for 1m series (>= 500 per spec).
pub const MIN_CAPACITY_1M: usize = 500;
/// Minimum ring capacity for 15m/1h series (>= 200 per spec).
pub const MIN_CAPACITY_OTHER: usize = 200;

/// Outcome of an `append_or_update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Replaced the provisional (still-open) slot in place.
    UpdatedProvisional,
    /// Appended as the immediate next closed bar.
    Appended,
    /// Appended, but a gap was detected between the previous close and this
    /// bar's open -- the caller should gap-fill via the historical loader.
    AppendedWithGap,
    /// Rejected: older than the last-seen timestamp (out-of-order delivery).
    RejectedStale,
}

/// Thread-safe ring-buffer that stores the most recent candles per
/// `(symbol, timeframe)` pair.
pub struct CandleStore {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleStore {
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Insert or replace the latest candle for the given key, enforcing the
    /// monotone-timestamp invariant. Returns the outcome so the caller can
    /// decide whether a gap-fill is needed.
    pub fn append_or_update(&self, key: CandleKey, candle: Candle) -> AppendOutcome {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        let last_closed_open_time = ring.iter().rev().find(|c| c.is_closed).map(|c| c.open_time);

        if let Some(last_open) = last_closed_open_time {
            if candle.open_time < last_open {
                warn!(key = %key, candle_open_time = candle.open_time, last_open_time = last_open,
                    "dropping out-of-order candle: older than last seen");
                return AppendOutcome::RejectedStale;
            }
        }

        if !candle.is_closed {
            if let Some(last) = ring.back() {
                if !last.is_closed && last.open_time == candle.open_time {
                    ring.pop_back();
                }
            }
            ring.push_back(candle);
            return AppendOutcome::UpdatedProvisional;
        }

        // Closed candle.
        let mut gap = false;
        if let Some(last) = ring.back() {
            if !last.is_closed && last.open_time == candle.open_time {
                ring.pop_back();
            } else if last.is_closed {
                let step = key.timeframe.step_millis();
                if candle.open_time > last.open_time + step {
                    gap = true;
                }
            }
        }

        ring.push_back(candle);
        while ring.len() > self.max_candles {
            ring.pop_front();
        }

        if gap {
            AppendOutcome::AppendedWithGap
        } else {
            AppendOutcome::Appended
        }
    }

    /// Return the most recent `count` **closed** candles, oldest-first.
    pub fn latest(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Closing prices of the most recent `count` closed candles, oldest-first.
    pub fn closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.latest(key, count).iter().map(|c| c.close).collect()
    }

    /// Close price of the most recent closed candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    /// Timestamp of the most recent closed candle's close_time, used as the
    /// gap-fill cursor after a reconnect.
    pub fn last_close_time(&self, key: &CandleKey) -> Option<i64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close_time))
    }

    /// Total candles (including any in-progress one) stored for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// Whether a key has at least `min_len` closed candles (used for the
    /// indicator warm-up check).
    pub fn is_warmed_up(&self, key: &CandleKey, min_len: usize) -> bool {
        let map = self.buffers.read();
        map.get(key)
            .map(|ring| ring.iter().filter(|c| c.is_closed).count() >= min_len)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    fn sample_candle(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            quote_volume: 200.0,
            trades_count: 50,
            taker_buy_volume: 60.0,
            taker_buy_quote_volume: 120.0,
            is_closed,
        }
    }

    fn key(sym: &str) -> CandleKey {
        CandleKey::new(sym, Timeframe::M1)
    }

    #[test]
    fn ring_buffer_trims_to_capacity() {
        let store = CandleStore::new(3);
        let k = key("BTCUSDT");
        for i in 0..5 {
            store.append_or_update(k.clone(), sample_candle(i * 60_000, 100.0 + i as f64, true));
        }
        assert_eq!(store.count(&k), 3);
        assert_eq!(store.closes(&k, 10), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn provisional_candle_is_replaced_in_place() {
        let store = CandleStore::new(10);
        let k = key("ETHUSDT");
        store.append_or_update(k.clone(), sample_candle(0, 50.0, false));
        assert_eq!(store.count(&k), 1);
        store.append_or_update(k.clone(), sample_candle(0, 51.0, false));
        assert_eq!(store.count(&k), 1);
        let outcome = store.append_or_update(k.clone(), sample_candle(0, 52.0, true));
        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(store.last_close(&k), Some(52.0));
    }

    #[test]
    fn stale_candle_is_rejected() {
        let store = CandleStore::new(10);
        let k = key("BTCUSDT");
        store.append_or_update(k.clone(), sample_candle(120_000, 100.0, true));
        let outcome = store.append_or_update(k.clone(), sample_candle(60_000, 99.0, true));
        assert_eq!(outcome, AppendOutcome::RejectedStale);
        assert_eq!(store.count(&k), 1);
    }

    #[test]
    fn gap_is_detected() {
        let store = CandleStore::new(10);
        let k = key("BTCUSDT");
        store.append_or_update(k.clone(), sample_candle(0, 100.0, true));
        // Skips the 60_000 bar entirely.
        let outcome = store.append_or_update(k.clone(), sample_candle(120_000, 101.0, true));
        assert_eq!(outcome, AppendOutcome::AppendedWithGap);
    }

    #[test]
    fn monotone_series_property() {
        // Invariant 1: after any sequence of updates, closed-candle timestamps
        // are strictly increasing.
        let store = CandleStore::new(50);
        let k = key("BTCUSDT");
        for i in 0..20 {
            store.append_or_update(k.clone(), sample_candle(i * 60_000, 100.0 + i as f64, true));
        }
        let closed = store.latest(&k, 50);
        for pair in closed.windows(2) {
            assert!(pair[0].open_time < pair[1].open_time);
        }
    }

    #[test]
    fn warm_up_check() {
        let store = CandleStore::new(10);
        let k = key("BTCUSDT");
        assert!(!store.is_warmed_up(&k, 5));
        for i in 0..5 {
            store.append_or_update(k.clone(), sample_candle(i * 60_000, 100.0, true));
        }
        assert!(store.is_warmed_up(&k, 5));
        assert!(!store.is_warmed_up(&k, 6));
    }
}
