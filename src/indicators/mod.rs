// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the trading engine. Every public function returns `Option<T>` so callers
// are forced to handle insufficient-data and numerical-edge-case scenarios.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod derived;
pub mod ema;
pub mod rsi;
pub mod sma_volume;
pub mod stoch_rsi;
pub mod vwap;

use crate::market_data::Candle;

pub const RSI_FAST_PERIOD: usize = 6;
pub const RSI_SLOW_PERIOD: usize = 14;
pub const EMA_FAST_PERIOD: usize = 7;
pub const EMA_MID_PERIOD: usize = 25;
pub const EMA_SLOW_PERIOD: usize = 99;
pub const SMA_VOLUME_PERIOD: usize = 20;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const STOCH_RSI_PERIOD: usize = 14;
pub const STOCH_K_SMOOTH: usize = 3;
pub const STOCH_D_SMOOTH: usize = 3;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;

/// A view combining every computed indicator relevant to a signal decision at
/// the most recent closed candle. Fields are `None` ("NULL") during warm-up;
/// the signal generator treats a `None` as "condition not satisfied".
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub open: f64,

    pub ema_fast: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_slow: Option<f64>,

    pub rsi_fast: Option<f64>,
    pub rsi_slow: Option<f64>,

    pub sma_volume: Option<f64>,
    pub current_volume: f64,

    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,

    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub stoch_k_series: Vec<f64>,

    pub vwap: Option<f64>,

    pub atr: Option<f64>,
    pub adx: Option<f64>,
}

impl IndicatorSnapshot {
    /// Whether the minimum set of indicators required by the signal
    /// generator are all warmed up.
    pub fn is_warmed_up(&self) -> bool {
        self.bb_lower.is_some()
            && self.vwap.is_some()
            && self.stoch_k.is_some()
            && self.sma_volume.is_some()
            && self.adx.is_some()
    }
}

/// Compute a full `IndicatorSnapshot` from a closed-candle window, oldest
/// first. `candles` must end with the candle the snapshot is "as of".
pub fn compute_snapshot(candles: &[Candle]) -> IndicatorSnapshot {
    let mut snap = IndicatorSnapshot::default();

    let Some(last) = candles.last() else {
        return snap;
    };
    snap.price = last.close;
    snap.open = last.open;
    snap.current_volume = last.volume;

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    snap.ema_fast = ema::current_ema(&closes, EMA_FAST_PERIOD);
    snap.ema_mid = ema::current_ema(&closes, EMA_MID_PERIOD);
    snap.ema_slow = ema::current_ema(&closes, EMA_SLOW_PERIOD);

    snap.rsi_fast = rsi::current_rsi(&closes, RSI_FAST_PERIOD).map(|(v, _)| v);
    snap.rsi_slow = rsi::current_rsi(&closes, RSI_SLOW_PERIOD).map(|(v, _)| v);

    snap.sma_volume = sma_volume::calculate_sma_volume(&volumes, SMA_VOLUME_PERIOD);

    if let Some(bb) = bollinger::calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV) {
        snap.bb_upper = Some(bb.upper);
        snap.bb_middle = Some(bb.middle);
        snap.bb_lower = Some(bb.lower);
    }

    snap.stoch_k_series = stoch_rsi::calculate_stoch_rsi_k_series(
        &closes,
        STOCH_RSI_PERIOD,
        STOCH_RSI_PERIOD,
        STOCH_K_SMOOTH,
    );
    if let Some(result) = stoch_rsi::current_stoch_rsi(
        &closes,
        STOCH_RSI_PERIOD,
        STOCH_RSI_PERIOD,
        STOCH_K_SMOOTH,
        STOCH_D_SMOOTH,
    ) {
        snap.stoch_k = Some(result.k);
        snap.stoch_d = Some(result.d);
    }

    snap.vwap = vwap::calculate_vwap(candles);
    snap.atr = atr::calculate_atr(candles, ATR_PERIOD);
    snap.adx = adx::calculate_adx(candles, ADX_PERIOD);

    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: i * 60_000,
            close_time: i * 60_000 + 59_999,
            open: close - 0.1,
            high: close + 0.5,
            low: close - 0.5,
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
    fn snapshot_not_warmed_up_with_little_history() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, 100.0 + i as f64, 10.0)).collect();
        let snap = compute_snapshot(&candles);
        assert!(!snap.is_warmed_up());
    }

    #[test]
    fn snapshot_warmed_up_with_enough_history() {
        let candles: Vec<Candle> = (0..120)
            .map(|i| candle(i, 100.0 + (i as f64 * 0.1).sin() * 5.0, 10.0 + (i % 5) as f64))
            .collect();
        let snap = compute_snapshot(&candles);
        assert!(snap.is_warmed_up());
        assert!(snap.price > 0.0);
    }

    #[test]
    fn empty_candles_yields_default_snapshot() {
        let snap = compute_snapshot(&[]);
        assert!(!snap.is_warmed_up());
        assert_eq!(snap.price, 0.0);
    }
}
