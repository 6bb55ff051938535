// =============================================================================
// Signal Confirmation Gate (C4)
// =============================================================================
//
// Suppresses 1-bar whipsaws: a direction must repeat `min_confirmations`
// times within `max_wait_seconds` before the (best) signal is released.
// New file -- grounded in the teacher's per-symbol `RwLock<HashMap<...>>`
// keyed-state idiom (app_state.rs's `trade_processors`/`vpin_states`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::types::SignalDirection;

use super::signal::TradingSignal;

pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 2;
pub const DEFAULT_MAX_WAIT_SECONDS: i64 = 180;

struct PendingEntry {
    direction: SignalDirection,
    count: u32,
    first_seen: DateTime<Utc>,
    latest_signal: TradingSignal,
}

/// Observability view of a symbol's pending confirmation state.
#[derive(Debug, Clone, Serialize)]
pub struct PendingStatus {
    pub symbol: String,
    pub direction: SignalDirection,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
}

pub struct ConfirmationGate {
    min_confirmations: u32,
    max_wait_seconds: i64,
    pending: RwLock<HashMap<String, PendingEntry>>,
}

impl ConfirmationGate {
    pub fn new(min_confirmations: u32, max_wait_seconds: i64) -> Self {
        Self {
            min_confirmations,
            max_wait_seconds,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Process an incoming non-NEUTRAL signal. Returns `Some(signal)` when
    /// the gate releases (the latest, best-entry signal for the confirmed
    /// run), `None` otherwise. NEUTRAL signals are never released and do not
    /// affect pending state.
    pub fn process(&self, signal: TradingSignal) -> Option<TradingSignal> {
        if !signal.direction.is_actionable() {
            return None;
        }

        let mut pending = self.pending.write();
        let now = Utc::now();

        let entry = pending.remove(&signal.symbol);
        match entry {
            None => {
                pending.insert(
                    signal.symbol.clone(),
                    PendingEntry {
                        direction: signal.direction,
                        count: 1,
                        first_seen: now,
                        latest_signal: signal,
                    },
                );
                None
            }
            Some(mut e) => {
                let expired = (now - e.first_seen).num_seconds() > self.max_wait_seconds;
                if expired {
                    pending.insert(
                        signal.symbol.clone(),
                        PendingEntry {
                            direction: signal.direction,
                            count: 1,
                            first_seen: now,
                            latest_signal: signal,
                        },
                    );
                    return None;
                }

                if e.direction == signal.direction {
                    e.count += 1;
                    e.latest_signal = signal;
                    if e.count >= self.min_confirmations {
                        return Some(e.latest_signal);
                    }
                    pending.insert(e.latest_signal.symbol.clone(), e);
                    None
                } else {
                    pending.insert(
                        signal.symbol.clone(),
                        PendingEntry {
                            direction: signal.direction,
                            count: 1,
                            first_seen: now,
                            latest_signal: signal,
                        },
                    );
                    None
                }
            }
        }
    }

    pub fn pending_status(&self, symbol: &str) -> Option<PendingStatus> {
        let pending = self.pending.read();
        pending.get(symbol).map(|e| PendingStatus {
            symbol: symbol.to_string(),
            direction: e.direction,
            count: e.count,
            first_seen: e.first_seen,
        })
    }

    pub fn all_pending(&self) -> Vec<PendingStatus> {
        let pending = self.pending.read();
        pending
            .iter()
            .map(|(symbol, e)| PendingStatus {
                symbol: symbol.clone(),
                direction: e.direction,
                count: e.count,
                first_seen: e.first_seen,
            })
            .collect()
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIRMATIONS, DEFAULT_MAX_WAIT_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::signal::TpLevels;
    use crate::types::SignalStatus;
    use std::collections::HashMap as StdHashMap;

    fn signal(symbol: &str, direction: SignalDirection, price: f64) -> TradingSignal {
        TradingSignal {
            id: uuid::Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction,
            confidence: 0.8,
            price,
            entry_price: price,
            stop_loss: price - 1.0,
            tp_levels: TpLevels {
                tp1: price + 1.0,
                tp2: price + 2.0,
                tp3: price + 3.0,
            },
            position_size: 1.0,
            risk_reward_ratio: 2.0,
            indicators: StdHashMap::new(),
            reasons: Vec::new(),
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
    fn s5_alternating_signals_never_release() {
        let gate = ConfirmationGate::new(2, 180);
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Buy, 100.0)).is_none());
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Sell, 100.0)).is_none());
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Buy, 100.0)).is_none());
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Sell, 100.0)).is_none());
    }

    #[test]
    fn n_consecutive_same_direction_releases_exactly_once() {
        let gate = ConfirmationGate::new(3, 180);
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Buy, 100.0)).is_none());
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Buy, 101.0)).is_none());
        let released = gate.process(signal("BTCUSDT", SignalDirection::Buy, 102.0));
        assert!(released.is_some());
        assert_eq!(released.unwrap().price, 102.0);
    }

    #[test]
    fn neutral_signal_is_never_released_and_does_not_affect_state() {
        let gate = ConfirmationGate::new(2, 180);
        assert!(gate.process(signal("BTCUSDT", SignalDirection::Neutral, 100.0)).is_none());
        assert!(gate.pending_status("BTCUSDT").is_none());
    }

    #[test]
    fn opposite_direction_resets_count() {
        let gate = ConfirmationGate::new(2, 180);
        gate.process(signal("BTCUSDT", SignalDirection::Buy, 100.0));
        gate.process(signal("BTCUSDT", SignalDirection::Sell, 100.0));
        let status = gate.pending_status("BTCUSDT").unwrap();
        assert_eq!(status.direction, SignalDirection::Sell);
        assert_eq!(status.count, 1);
    }

    #[test]
    fn independent_per_symbol() {
        let gate = ConfirmationGate::new(2, 180);
        gate.process(signal("BTCUSDT", SignalDirection::Buy, 100.0));
        assert!(gate.pending_status("ETHUSDT").is_none());
    }
}
