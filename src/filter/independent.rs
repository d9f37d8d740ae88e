//! Independent filtering on mean expression
//!
//! Genes are dropped below a baseMean quantile before the BH adjustment; the
//! quantile is chosen to maximize the number of rejections at the target FDR.

use crate::io::DESeqResults;
use crate::stats::{median, quantile_sorted};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Span of the smoother over the rejection curve
const LOWESS_SPAN: f64 = 0.2;

/// Outcome of one filtering pass
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChoice {
    /// Fraction of genes removed
    pub theta: f64,
    /// Genes with baseMean below this get padj = NaN
    pub cutoff: f64,
    pub rejections: usize,
}

/// Replace `results.padj` with BH values computed after removing the genes
/// whose baseMean falls below the selected quantile.
pub fn independent_filtering(results: &mut DESeqResults, alpha: f64) -> Option<FilterChoice> {
    let n = results.n_genes();
    let mut sorted: Vec<f64> = results.base_means.iter().copied().filter(|m| m.is_finite()).collect();
    if n == 0 || sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let lower = results.base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_sorted(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = results
                .pvalues
                .iter()
                .zip(&results.base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count())
        .collect();

    let j = select_theta(&thetas, &rejections);
    log::debug!(
        "rejection curve: {:?}",
        rejections.iter().step_by(5).collect::<Vec<_>>()
    );
    log::info!(
        "Independent filtering at alpha {}: theta {:.3}, baseMean cutoff {:.3}, {} rejections",
        alpha,
        thetas[j],
        cutoffs[j],
        rejections[j]
    );

    results.padj = adjusted.into_iter().nth(j).unwrap_or_default();
    Some(FilterChoice {
        theta: thetas[j],
        cutoff: cutoffs[j],
        rejections: rejections[j],
    })
}

/// Index of the first theta whose rejection count exceeds the smoothed
/// maximum minus the fit's RMSE, with 0.9 and 0.8 of the maximum as
/// fallbacks. With ten or fewer rejections anywhere nothing is filtered.
fn select_theta(thetas: &[f64], rejections: &[usize]) -> usize {
    if rejections.iter().copied().max().unwrap_or(0) <= 10 {
        return 0;
    }
    let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, LOWESS_SPAN, 3);

    let residuals: Vec<f64> = y.iter().zip(&fit).filter(|(r, _)| **r > 0.0).map(|(r, f)| r - f).collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&threshold| y.iter().position(|&r| r > threshold))
        .unwrap_or(0)
}

/// Locally weighted linear smoother with tricube weights and bisquare
/// robustness iterations; `x` must be sorted ascending.
pub fn lowess(x: &[f64], y: &[f64], span: f64, robustness_iters: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let ns = ((span * n as f64 + 1e-7) as usize).clamp(2, n);
    let range = x[n - 1] - x[0];
    let mut robust = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for pass in 0..=robustness_iters {
        let mut left = 0;
        for i in 0..n {
            while left + ns < n && x[i] - x[left] > x[left + ns] - x[i] {
                left += 1;
            }
            let h = (x[i] - x[left]).max(x[left + ns - 1] - x[i]);
            fitted[i] = local_fit(x, y, &robust, x[i], h, range).unwrap_or(y[i]);
        }

        if pass == robustness_iters {
            break;
        }
        let abs_res: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let scale = 6.0 * median(&abs_res);
        let mean_abs_y = y.iter().map(|v| v.abs()).sum::<f64>() / n as f64;
        if scale < 1e-7 * mean_abs_y {
            break;
        }
        for (w, r) in robust.iter_mut().zip(&abs_res) {
            let u = r / scale;
            *w = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn local_fit(x: &[f64], y: &[f64], robust: &[f64], at: f64, h: f64, range: f64) -> Option<f64> {
    let weights: Vec<f64> = x
        .iter()
        .zip(robust)
        .map(|(&xj, &rw)| {
            let r = (xj - at).abs();
            let w = if r <= 0.001 * h {
                1.0
            } else if r <= 0.999 * h {
                (1.0 - (r / h).powi(3)).powi(3)
            } else {
                0.0
            };
            w * rw
        })
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let w: Vec<f64> = weights.iter().map(|v| v / total).collect();
    let x_bar: f64 = w.iter().zip(x).map(|(w, x)| w * x).sum();
    let spread: f64 = w.iter().zip(x).map(|(w, x)| w * (x - x_bar).powi(2)).sum();

    let fit = if h > 0.0 && spread.sqrt() > 0.001 * range {
        let slope = (at - x_bar) / spread;
        w.iter()
            .zip(x)
            .zip(y)
            .map(|((w, xj), yj)| w * (1.0 + slope * (xj - x_bar)) * yj)
            .sum()
    } else {
        w.iter().zip(y).map(|(w, y)| w * y).sum()
    };
    Some(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    fn contrast() -> Contrast {
        Contrast {
            variable: "condition".into(),
            numerator: "dissociated".into(),
            denominator: "chunk".into(),
        }
    }

    #[test]
    fn test_lowess_reproduces_a_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 2.0 * v).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_few_rejections_keep_all_genes() {
        let mut r = DESeqResults::new(vec!["a".into(), "b".into(), "c".into()], contrast(), 0.1);
        r.base_means = vec![1.0, 10.0, 100.0];
        r.pvalues = vec![0.5, 0.01, 0.001];
        let choice = independent_filtering(&mut r, 0.1).unwrap();
        assert_eq!(choice.theta, 0.0);
        assert!(r.padj.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_low_count_noise_is_filtered() {
        // 2000 low-mean nulls with uniform p-values (order scrambled against
        // the means) drown 100 high-mean genes with p in [0.001, 0.01]
        let n_null = 2000;
        let n_signal = 100;
        let ids = (0..n_null + n_signal).map(|i| format!("g{}", i)).collect();
        let mut r = DESeqResults::new(ids, contrast(), 0.1);
        r.base_means = (0..n_null)
            .map(|i| 1.0 + i as f64 * 0.01)
            .chain((0..n_signal).map(|i| 100.0 + i as f64))
            .collect();
        r.pvalues = (0..n_null)
            .map(|i| ((i * 7919) % n_null) as f64 + 0.5)
            .map(|rank| rank / n_null as f64)
            .chain((0..n_signal).map(|i| 0.001 + 0.009 * i as f64 / (n_signal - 1) as f64))
            .collect();

        let unfiltered = benjamini_hochberg(&r.pvalues).iter().filter(|&&p| p < 0.1).count();
        let choice = independent_filtering(&mut r, 0.1).unwrap();
        assert!(unfiltered < 10, "{} rejections without filtering", unfiltered);
        assert!(choice.theta > 0.0);
        assert!(choice.rejections > unfiltered + 50, "{} rejections", choice.rejections);
        assert_eq!(r.padj.iter().filter(|&&p| p < 0.1).count(), choice.rejections);
        assert!(r.padj[0].is_nan());
        assert!(r.padj[n_null + n_signal - 1].is_finite());
    }
}
