//! Multiplier Curve
//!
//! `multiplier = exp(elapsed_secs / growth_rate)`, starting at 1.00 when the
//! round begins and growing without bound.

use std::time::Duration;

/// Default growth-rate constant (seconds per e-fold).
pub const DEFAULT_GROWTH_RATE: f64 = 10.0;

/// Multiplier after `elapsed` time in Running.
///
/// A non-positive growth rate yields a non-finite value, which the engine
/// treats as a tick fault.
#[inline]
pub fn multiplier_at(elapsed: Duration, growth_rate: f64) -> f64 {
    (elapsed.as_secs_f64() / growth_rate).exp()
}

/// Round to two decimal places.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Wire representation: fixed two decimals, e.g. `"1.05"`.
pub fn format_multiplier(value: f64) -> String {
    format!("{:.2}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_one() {
        assert_eq!(multiplier_at(Duration::ZERO, DEFAULT_GROWTH_RATE), 1.0);
        assert_eq!(format_multiplier(1.0), "1.00");
    }

    #[test]
    fn test_known_point() {
        let m = multiplier_at(Duration::from_secs(23), DEFAULT_GROWTH_RATE);
        assert_eq!(format_multiplier(m), "9.97");
        assert!((m - 2.3f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.004), 1.0);
        assert_eq!(round2(2.345_6), 2.35);
        assert_eq!(format_multiplier(round2(3.999)), "4.00");
    }

    proptest! {
        #[test]
        fn prop_non_decreasing(a in 0u64..120_000, b in 0u64..120_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let m_lo = multiplier_at(Duration::from_millis(lo), DEFAULT_GROWTH_RATE);
            let m_hi = multiplier_at(Duration::from_millis(hi), DEFAULT_GROWTH_RATE);
            prop_assert!(m_lo <= m_hi);
            prop_assert!(m_lo >= 1.0);
        }
    }
}
