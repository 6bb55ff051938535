// =============================================================================
// Simple Moving Average of Volume
// =============================================================================
//
// Used by the signal generator's volume-spike check: current volume compared
// against the trailing SMA of volume over `period` bars.

/// Compute the SMA of the given `volumes` over the last `period` samples.
///
/// Returns `None` when `period` is zero or there are fewer than `period`
/// samples.
pub fn calculate_sma_volume(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let window = &volumes[volumes.len() - period..];
    let sma = window.iter().sum::<f64>() / period as f64;
    if sma.is_finite() {
        Some(sma)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_volume_basic() {
        let volumes = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(calculate_sma_volume(&volumes, 5), Some(30.0));
    }

    #[test]
    fn sma_volume_insufficient_data() {
        assert_eq!(calculate_sma_volume(&[1.0, 2.0], 5), None);
    }

    #[test]
    fn sma_volume_period_zero() {
        assert_eq!(calculate_sma_volume(&[1.0], 0), None);
    }

    #[test]
    fn sma_volume_uses_trailing_window_only() {
        let volumes = vec![1000.0, 10.0, 20.0, 30.0];
        // period=3 should only look at the last 3 samples, ignoring the 1000.0 outlier.
        assert_eq!(calculate_sma_volume(&volumes, 3), Some(20.0));
    }
}
