//! Ranked gene lists for GSEA

use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::io::DESeqResults;

/// Genes sorted by statistic, largest first
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    genes: Vec<String>,
    stats: Vec<f64>,
}

impl RankedList {
    /// Build from `(gene, statistic)` pairs.
    ///
    /// Non-finite statistics are dropped; a gene listed more than once keeps
    /// the entry with the largest absolute statistic. Ties in the statistic
    /// are ordered by gene id.
    pub fn from_pairs(pairs: Vec<(String, f64)>) -> Result<Self> {
        let mut best: HashMap<String, f64> = HashMap::with_capacity(pairs.len());
        let mut duplicates = 0usize;
        for (gene, stat) in pairs.into_iter().filter(|(_, s)| s.is_finite()) {
            match best.get_mut(&gene) {
                Some(prev) => {
                    duplicates += 1;
                    if stat.abs() > prev.abs() {
                        *prev = stat;
                    }
                }
                None => {
                    best.insert(gene, stat);
                }
            }
        }
        if duplicates > 0 {
            log::warn!("{} duplicate genes in the ranking; kept the largest |statistic|", duplicates);
        }
        if best.is_empty() {
            return Err(PipelineError::Enrichment {
                reason: "ranked list is empty".to_string(),
            });
        }

        let mut entries: Vec<(String, f64)> = best.into_iter().collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (genes, stats) = entries.into_iter().unzip();
        Ok(Self { genes, stats })
    }

    /// Significant genes of a result table ranked by shrunken LFC when
    /// available, otherwise by the MLE.
    pub fn from_results(results: &DESeqResults, alpha: f64) -> Result<Self> {
        let pairs: Vec<(String, f64)> = results
            .significant_indices(alpha)
            .into_iter()
            .map(|i| (results.gene_ids[i].clone(), results.ranking_lfc(i)))
            .collect();
        log::info!("{} genes with padj < {} enter the ranking", pairs.len(), alpha);
        Self::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn stats(&self) -> &[f64] {
        &self.stats
    }
}
