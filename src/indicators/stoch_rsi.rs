// =============================================================================
// Stochastic RSI
// =============================================================================
//
// Applies the stochastic oscillator formula to a window of RSI values rather
// than price, producing a more sensitive 0-100 oscillator:
//
//   StochRSI_t = (RSI_t - min(RSI, stoch_period)) /
//                (max(RSI, stoch_period) - min(RSI, stoch_period)) * 100
//
// %K is the `k_smooth`-period SMA of the raw StochRSI series; %D is the
// `d_smooth`-period SMA of %K. Default parameterization used by the core:
// rsi_period=14, stoch_period=14, k_smooth=3, d_smooth=3.

use crate::indicators::rsi::calculate_rsi;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochRsiResult {
    pub k: f64,
    pub d: f64,
}

fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    (0..=values.len() - period)
        .map(|i| values[i..i + period].iter().sum::<f64>() / period as f64)
        .collect()
}

/// Compute the full %K series (smoothed) for the given closes.
///
/// Returns an empty vec if there is insufficient history for the full
/// rsi_period + stoch_period + k_smooth pipeline.
pub fn calculate_stoch_rsi_k_series(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
) -> Vec<f64> {
    let rsi_series = calculate_rsi(closes, rsi_period);
    if rsi_series.len() < stoch_period {
        return Vec::new();
    }

    let mut raw = Vec::with_capacity(rsi_series.len() - stoch_period + 1);
    for i in stoch_period - 1..rsi_series.len() {
        let window = &rsi_series[i + 1 - stoch_period..=i];
        let lo = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = hi - lo;
        let value = if range.abs() < 1e-12 {
            // Degenerate: RSI constant over the window -- midline.
            50.0
        } else {
            (rsi_series[i] - lo) / range * 100.0
        };
        raw.push(value);
    }

    sma(&raw, k_smooth)
}

/// Compute the most recent (%K, %D) pair.
///
/// Returns `None` when there is insufficient history to produce a warmed-up
/// value for both %K and %D.
pub fn current_stoch_rsi(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> Option<StochRsiResult> {
    let k_series = calculate_stoch_rsi_k_series(closes, rsi_period, stoch_period, k_smooth);
    let d_series = sma(&k_series, d_smooth);
    let k = *k_series.last()?;
    let d = *d_series.last()?;
    if k.is_finite() && d.is_finite() {
        Some(StochRsiResult { k, d })
    } else {
        None
    }
}

/// Whether %K crossed up through `threshold` between the last two samples.
pub fn stoch_k_cross_up(k_series: &[f64], threshold: f64) -> bool {
    if k_series.len() < 2 {
        return false;
    }
    let prev = k_series[k_series.len() - 2];
    let last = k_series[k_series.len() - 1];
    prev <= threshold && last > threshold
}

/// Whether %K crossed down through `threshold` between the last two samples.
pub fn stoch_k_cross_down(k_series: &[f64], threshold: f64) -> bool {
    if k_series.len() < 2 {
        return false;
    }
    let prev = k_series[k_series.len() - 2];
    let last = k_series[k_series.len() - 1];
    prev >= threshold && last < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stoch_rsi_insufficient_data_is_empty() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!(calculate_stoch_rsi_k_series(&closes, 14, 14, 3).is_empty());
    }

    #[test]
    fn stoch_rsi_range_check() {
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0)
            .collect();
        let k_series = calculate_stoch_rsi_k_series(&closes, 14, 14, 3);
        for &k in &k_series {
            assert!((0.0..=100.0).contains(&k), "k={k} out of range");
        }
    }

    #[test]
    fn current_stoch_rsi_none_on_insufficient_data() {
        assert!(current_stoch_rsi(&[1.0, 2.0], 14, 14, 3, 3).is_none());
    }

    #[test]
    fn cross_up_detected() {
        let k_series = vec![10.0, 18.0, 22.0];
        assert!(stoch_k_cross_up(&k_series[0..2], 20.0) == false);
        assert!(stoch_k_cross_up(&k_series[1..3], 20.0));
    }

    #[test]
    fn cross_down_detected() {
        let k_series = vec![90.0, 82.0, 75.0];
        assert!(stoch_k_cross_down(&k_series[1..3], 80.0));
    }

    #[test]
    fn no_cross_when_already_above() {
        let k_series = vec![85.0, 90.0];
        assert!(!stoch_k_cross_up(&k_series, 80.0));
    }
}
