//! Differential expression result table

use serde::{Deserialize, Serialize};

/// Per-gene statistics of one contrast at one FDR threshold.
///
/// Columns are parallel vectors in count-matrix gene order. `NaN` marks a
/// value that was not computed (for example `padj` of a gene removed by
/// independent filtering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DESeqResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts
    pub base_means: Vec<f64>,
    pub base_vars: Vec<f64>,
    /// Maximum likelihood log2 fold change
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    /// Normal-prior shrunken log2 fold change; `NaN` when shrinkage was not run
    pub log2_fold_changes_shrunk: Vec<f64>,
    pub lfc_se_shrunk: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
    /// Final (MAP) dispersions
    pub dispersions: Vec<f64>,
    pub contrast: Contrast,
    /// Target FDR used for independent filtering
    pub alpha: f64,
}

/// Two-level contrast `variable: numerator vs denominator`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

impl DESeqResults {
    /// Empty table with every statistic set to `NaN`
    pub fn new(gene_ids: Vec<String>, contrast: Contrast, alpha: f64) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            base_vars: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            log2_fold_changes_shrunk: vec![f64::NAN; n],
            lfc_se_shrunk: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            contrast,
            alpha,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn has_shrunken_lfc(&self) -> bool {
        self.log2_fold_changes_shrunk.iter().any(|v| v.is_finite())
    }

    /// Shrunken LFC when available for the gene, otherwise the MLE
    pub fn ranking_lfc(&self, i: usize) -> f64 {
        let s = self.log2_fold_changes_shrunk[i];
        if s.is_finite() {
            s
        } else {
            self.log2_fold_changes[i]
        }
    }

    /// Row indices with `padj < alpha`; `NaN` never passes
    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        self.padj
            .iter()
            .enumerate()
            .filter(|(_, &p)| p.is_finite() && p < alpha)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        self.significant_indices(alpha)
            .into_iter()
            .map(|i| self.gene_ids[i].as_str())
            .collect()
    }

    pub fn upregulated_genes(&self, alpha: f64) -> Vec<&str> {
        self.significant_indices(alpha)
            .into_iter()
            .filter(|&i| self.log2_fold_changes[i] > 0.0)
            .map(|i| self.gene_ids[i].as_str())
            .collect()
    }

    pub fn downregulated_genes(&self, alpha: f64) -> Vec<&str> {
        self.significant_indices(alpha)
            .into_iter()
            .filter(|&i| self.log2_fold_changes[i] < 0.0)
            .map(|i| self.gene_ids[i].as_str())
            .collect()
    }

    /// Significant rows sorted by log2 fold change, highest first
    pub fn sorted_by_lfc(&self, alpha: f64) -> Vec<usize> {
        let mut idx = self.significant_indices(alpha);
        idx.retain(|&i| self.log2_fold_changes[i].is_finite());
        idx.sort_by(|&a, &b| {
            self.log2_fold_changes[b]
                .total_cmp(&self.log2_fold_changes[a])
                .then_with(|| self.gene_ids[a].cmp(&self.gene_ids[b]))
        });
        idx
    }

    /// `n` most up-regulated significant genes
    pub fn top_n(&self, alpha: f64, n: usize) -> Vec<usize> {
        self.sorted_by_lfc(alpha)
            .into_iter()
            .filter(|&i| self.log2_fold_changes[i] > 0.0)
            .take(n)
            .collect()
    }

    /// `n` most down-regulated significant genes, most negative first
    pub fn bottom_n(&self, alpha: f64, n: usize) -> Vec<usize> {
        let mut idx = self.sorted_by_lfc(alpha);
        idx.reverse();
        idx.into_iter()
            .filter(|&i| self.log2_fold_changes[i] < 0.0)
            .take(n)
            .collect()
    }

    pub fn summary(&self) -> ResultsSummary {
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: self.significant_indices(self.alpha).len(),
            upregulated: self.upregulated_genes(self.alpha).len(),
            downregulated: self.downregulated_genes(self.alpha).len(),
            alpha: self.alpha,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        write!(f, "  Down-regulated: {}", self.downregulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DESeqResults {
        let mut r = DESeqResults::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            Contrast {
                variable: "condition".into(),
                numerator: "dissociated".into(),
                denominator: "chunk".into(),
            },
            0.1,
        );
        r.log2_fold_changes = vec![2.0, -3.0, 0.5, 4.0];
        r.pvalues = vec![0.001, 0.002, 0.5, 0.2];
        r.padj = vec![0.01, 0.04, 0.6, f64::NAN];
        r
    }

    #[test]
    fn test_views_exclude_na() {
        let r = table();
        assert_eq!(r.significant_genes(0.1), vec!["a", "b"]);
        assert_eq!(r.upregulated_genes(0.1), vec!["a"]);
        assert_eq!(r.downregulated_genes(0.1), vec!["b"]);
        assert_eq!(r.top_n(0.1, 5), vec![0]);
        assert_eq!(r.bottom_n(0.1, 5), vec![1]);
        let s = r.summary();
        assert_eq!((s.genes_tested, s.significant), (4, 2));
    }

    #[test]
    fn test_ranking_lfc_prefers_shrunken() {
        let mut r = table();
        r.log2_fold_changes_shrunk = vec![1.5, f64::NAN, 0.1, 3.0];
        assert_eq!(r.ranking_lfc(0), 1.5);
        assert_eq!(r.ranking_lfc(1), -3.0);
    }
}
