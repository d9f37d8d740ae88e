//! Two-sided normal p-values

use statrs::distribution::{ContinuousCDF, Normal};

/// `2 * Phi(-|z|)`; `NaN` in, `NaN` out
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return if z.is_nan() { f64::NAN } else { 0.0 };
    }
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| (2.0 * normal.cdf(-z.abs())).min(1.0))
}
