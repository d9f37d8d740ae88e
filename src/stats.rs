//! Small numeric helpers shared by the dispersion, filtering, shrinkage and
//! normalization code.
//!
//! Every function ignores `NaN` inputs unless stated otherwise.

use std::cmp::Ordering;

/// Standard normal quantile at 0.975
pub const QNORM_0975: f64 = 1.959_963_984_540_054;

/// Consistency constant that makes the MAD estimate a normal standard deviation
pub const MAD_SCALE: f64 = 1.4826;

fn finite_sorted(x: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Linear-interpolation sample quantile (Hyndman-Fan type 7).
///
/// `NaN` when no non-`NaN` values remain.
pub fn quantile(x: &[f64], prob: f64) -> f64 {
    quantile_sorted(&finite_sorted(x), prob)
}

/// Type-7 quantile of an already sorted slice
pub fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn median(x: &[f64]) -> f64 {
    quantile(x, 0.5)
}

/// Scaled median absolute deviation from the median
pub fn mad(x: &[f64]) -> f64 {
    let center = median(x);
    let deviations: Vec<f64> = x.iter().filter(|v| !v.is_nan()).map(|v| (v - center).abs()).collect();
    MAD_SCALE * median(&deviations)
}

/// Trigamma function psi'(x) for x > 0.
///
/// Recurrence up to x >= 8, then the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 1.0 / (2.0 * z2) + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Mean after removing `trim` of the observations from each end
pub fn trimmed_mean(x: &[f64], trim: f64) -> f64 {
    let v = finite_sorted(x);
    if v.is_empty() {
        return f64::NAN;
    }
    let cut = ((v.len() as f64) * trim.clamp(0.0, 0.5)).floor() as usize;
    let kept = if 2 * cut < v.len() { &v[cut..v.len() - cut] } else { &v[..] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Weighted quantile with weights rescaled to sum to the number of
/// observations.
///
/// Tied values pool their weight. Positions between the cumulative weights
/// snap to the next value up, and the two neighbouring order statistics are
/// blended linearly.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| !xi.is_nan() && wi.is_finite() && **wi > 0.0)
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();
    let mut values: Vec<f64> = Vec::new();
    let mut cumulative: Vec<f64> = Vec::new();
    let mut running = 0.0;
    for (xi, wi) in pairs {
        running += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = running;
            }
        } else {
            values.push(xi);
            cumulative.push(running);
        }
    }

    let total = running;
    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let at = |pos: f64| {
        let i = cumulative.partition_point(|&c| c < pos).min(values.len() - 1);
        values[i]
    };
    (1.0 - frac) * at(low) + frac * at(high)
}

/// Variance of a zero-centred normal whose `1 - upper_quantile/2` quantile
/// matches the weighted `1 - upper_quantile` quantile of `|x|`.
///
/// Falls back to 1e-6 when the data give no usable spread.
pub fn match_weighted_upper_quantile_for_variance(x: &[f64], weights: &[f64], upper_quantile: f64) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    log::debug!("upper quantile |x| = {:.6}, prior variance = {:.6}", q, var);
    if var.is_finite() && var > 0.0 {
        var
    } else {
        1e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type7_quantile() {
        let x = [4.0, 1.0, 3.0, 2.0, f64::NAN];
        assert_eq!(quantile(&x, 0.0), 1.0);
        assert_eq!(quantile(&x, 1.0), 4.0);
        assert!((quantile(&x, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&x, 0.25) - 1.75).abs() < 1e-12);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_mad_of_symmetric_sample() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((mad(&x) - MAD_SCALE).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-8);
        assert!((trigamma(0.5) - std::f64::consts::PI.powi(2) / 2.0).abs() < 1e-8);
        assert!((trigamma(10.0) - 0.105_166_335_681_685).abs() < 1e-9);
    }

    #[test]
    fn test_trimmed_mean_drops_tails() {
        let x = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(trimmed_mean(&x, 0.2), 3.0);
        assert_eq!(trimmed_mean(&x, 0.0), 22.0);
    }

    #[test]
    fn test_weighted_quantile() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((weighted_quantile(&x, &[1.0; 5], 0.5) - 3.0).abs() < 1e-12);
        let heavy = weighted_quantile(&x, &[1.0, 1.0, 1.0, 1.0, 100.0], 0.5);
        assert!(heavy >= 4.0);
    }

    #[test]
    fn test_upper_quantile_variance() {
        let x = [0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let v = match_weighted_upper_quantile_for_variance(&x, &[1.0; 10], 0.05);
        assert!(v > 0.0 && v < 0.1);
        assert_eq!(match_weighted_upper_quantile_for_variance(&[0.0; 3], &[1.0; 3], 0.05), 1e-6);
    }
}
