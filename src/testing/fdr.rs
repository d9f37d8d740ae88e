//! Benjamini-Hochberg adjustment

/// BH-adjusted p-values. `NaN` entries stay `NaN` and do not count toward
/// the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut running_min = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adjusted = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        padj[i] = running_min;
    }
    padj
}
