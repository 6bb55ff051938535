// =============================================================================
// Derived boolean/numeric checks consumed by the signal generator (C3)
// =============================================================================

/// True iff `price` is within `tol` (fractional) above the Bollinger lower
/// band. Default tolerance 1.5%.
pub fn near_lower_band(price: f64, lower: f64, tol: f64) -> bool {
    price <= lower * (1.0 + tol)
}

/// True iff `price` is within `tol` (fractional) below the Bollinger upper
/// band -- the SELL-side mirror of `near_lower_band`.
pub fn near_upper_band(price: f64, upper: f64, tol: f64) -> bool {
    price >= upper * (1.0 - tol)
}

/// Percentage distance of `price` from `vwap`, signed (positive above VWAP).
pub fn distance_from_vwap_pct(price: f64, vwap: f64) -> Option<f64> {
    if vwap == 0.0 {
        return None;
    }
    Some((price - vwap) / vwap * 100.0)
}

/// Outcome of the volume-spike check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSpike {
    pub is_spike: bool,
    pub intensity: f64,
}

/// A volume spike fires when `current >= threshold * sma_volume`.
/// `intensity` is `current / sma_volume`, useful for confidence scaling.
pub fn volume_spike(current: f64, sma_volume: f64, threshold: f64) -> VolumeSpike {
    if sma_volume <= 0.0 {
        return VolumeSpike {
            is_spike: false,
            intensity: 0.0,
        };
    }
    let intensity = current / sma_volume;
    VolumeSpike {
        is_spike: intensity >= threshold,
        intensity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_lower_band_true_when_touching() {
        assert!(near_lower_band(99.0, 99.0, 0.015));
    }

    #[test]
    fn near_lower_band_true_within_tolerance() {
        assert!(near_lower_band(99.10, 99.0, 0.015));
    }

    #[test]
    fn near_lower_band_false_when_far_above() {
        assert!(!near_lower_band(105.0, 99.0, 0.015));
    }

    #[test]
    fn distance_from_vwap_positive_above() {
        let d = distance_from_vwap_pct(101.0, 100.0).unwrap();
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn distance_from_vwap_none_when_zero() {
        assert!(distance_from_vwap_pct(100.0, 0.0).is_none());
    }

    #[test]
    fn volume_spike_detected_at_threshold() {
        let spike = volume_spike(30.0, 10.0, 2.0);
        assert!(spike.is_spike);
        assert!((spike.intensity - 3.0).abs() < 1e-9);
    }

    #[test]
    fn volume_spike_not_detected_below_threshold() {
        let spike = volume_spike(15.0, 10.0, 2.0);
        assert!(!spike.is_spike);
    }

    #[test]
    fn volume_spike_zero_sma_is_not_a_spike() {
        let spike = volume_spike(100.0, 0.0, 2.0);
        assert!(!spike.is_spike);
    }
}
