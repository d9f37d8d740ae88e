//! Enrichment scores, permutation nulls and the result table

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::RankedList;
use crate::config::GseaConfig;
use crate::error::{PipelineError, Result};
use crate::io::artifacts::format_f64;
use crate::io::GeneSet;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, PartialEq)]
pub struct GseaParams {
    pub nperm: usize,
    pub seed: u64,
    pub min_size: usize,
    pub max_size: usize,
    /// Exponent on |statistic| in the running sum
    pub gsea_param: f64,
}

impl Default for GseaParams {
    fn default() -> Self {
        Self {
            nperm: 1000,
            seed: 42,
            min_size: 15,
            max_size: 500,
            gsea_param: 1.0,
        }
    }
}

impl From<&GseaConfig> for GseaParams {
    fn from(cfg: &GseaConfig) -> Self {
        Self {
            nperm: cfg.nperm,
            seed: cfg.seed,
            min_size: cfg.min_size,
            max_size: cfg.max_size,
            ..Self::default()
        }
    }
}

/// Signed maximum deviation of the running sum and where it happens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichmentScore {
    pub es: f64,
    /// Index into the hit list of the peak (positive ES) or of the first
    /// hit after the trough (negative ES)
    pub extreme_hit: usize,
}

/// Weighted Kolmogorov-Smirnov running sum over `stats` (sorted
/// descending) with the set members at the ascending positions `hits`.
///
/// Only hit positions are visited: the maximum is reached right after a hit
/// and the minimum right before one.
pub fn enrichment_score(stats: &[f64], hits: &[usize], gsea_param: f64) -> EnrichmentScore {
    let n = stats.len();
    let k = hits.len();
    if k == 0 || k >= n {
        return EnrichmentScore { es: 0.0, extreme_hit: 0 };
    }
    let weights: Vec<f64> = hits.iter().map(|&p| stats[p].abs().powf(gsea_param)).collect();
    let nr: f64 = weights.iter().sum();
    let miss = 1.0 / (n - k) as f64;

    let (mut cum, mut max, mut min) = (0.0, 0.0, 0.0);
    let (mut max_at, mut min_at) = (0, 0);
    for (r, &pos) in hits.iter().enumerate() {
        let misses = (pos - r) as f64 * miss;
        let before = cum - misses;
        if before < min {
            min = before;
            min_at = r;
        }
        cum += if nr > 0.0 { weights[r] / nr } else { 1.0 / k as f64 };
        let after = cum - misses;
        if after > max {
            max = after;
            max_at = r;
        }
    }

    if max > -min {
        EnrichmentScore { es: max, extreme_hit: max_at }
    } else {
        EnrichmentScore { es: min, extreme_hit: min_at }
    }
}

/// `nperm` enrichment scores of random position sets of size `k`; draw `i`
/// uses the seed `seed + i`.
fn permutation_scores(stats: &[f64], k: usize, params: &GseaParams) -> Vec<f64> {
    let n = stats.len();
    (0..params.nperm)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let mut pool: Vec<usize> = (0..n).collect();
            for j in 0..k {
                let swap = rng.random_range(j..n);
                pool.swap(j, swap);
            }
            let mut drawn = pool[..k].to_vec();
            drawn.sort_unstable();
            enrichment_score(stats, &drawn, params.gsea_param).es
        })
        .collect()
}

/// One tested gene set
#[derive(Debug, Clone, PartialEq)]
pub struct GseaResult {
    pub pathway: String,
    pub description: String,
    /// Members found in the ranked list
    pub size: usize,
    pub es: f64,
    pub nes: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub leading_edge: Vec<String>,
}

/// Tested sets sorted by NES, highest first; `NaN` NES last
#[derive(Debug, Clone, Default)]
pub struct GseaResults {
    pub rows: Vec<GseaResult>,
}

impl GseaResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most positively enriched sets
    pub fn top_n(&self, n: usize) -> Vec<&GseaResult> {
        self.rows.iter().filter(|r| r.nes > 0.0).take(n).collect()
    }

    /// Most negatively enriched sets, most negative first
    pub fn bottom_n(&self, n: usize) -> Vec<&GseaResult> {
        self.rows.iter().rev().filter(|r| r.nes < 0.0).take(n).collect()
    }
}

/// Preranked GSEA of `sets` against `ranked`
pub fn run_gsea(ranked: &RankedList, sets: &[GeneSet], params: &GseaParams) -> Result<GseaResults> {
    let n = ranked.len();
    if n < 2 {
        return Err(PipelineError::Enrichment {
            reason: format!("ranked list has {} genes; need at least 2", n),
        });
    }
    let position: HashMap<&str, usize> = ranked
        .genes()
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();
    let max_size = params.max_size.min(n - 1);

    let mut tested: Vec<(&GeneSet, Vec<usize>)> = Vec::new();
    for set in sets {
        let mut hits: Vec<usize> = set
            .genes
            .iter()
            .filter_map(|g| position.get(g.as_str()).copied())
            .collect();
        hits.sort_unstable();
        hits.dedup();
        if hits.len() >= params.min_size.max(1) && hits.len() <= max_size {
            tested.push((set, hits));
        }
    }
    log::info!(
        "GSEA: {} of {} gene sets within size bounds [{}, {}] over {} ranked genes",
        tested.len(),
        sets.len(),
        params.min_size,
        max_size,
        n
    );

    let stats = ranked.stats();
    let mut nulls: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for (_, hits) in &tested {
        nulls
            .entry(hits.len())
            .or_insert_with(|| permutation_scores(stats, hits.len(), params));
    }

    let mut rows: Vec<GseaResult> = tested
        .iter()
        .map(|(set, hits)| {
            let score = enrichment_score(stats, hits, params.gsea_param);
            let null = nulls.get(&hits.len()).map(Vec::as_slice).unwrap_or_default();
            let positive = score.es >= 0.0;
            let same_sign: Vec<f64> = null
                .iter()
                .copied()
                .filter(|&e| if positive { e >= 0.0 } else { e <= 0.0 })
                .collect();
            let more_extreme = same_sign
                .iter()
                .filter(|&&e| if positive { e >= score.es } else { e <= score.es })
                .count();
            let nes = if same_sign.is_empty() {
                f64::NAN
            } else {
                score.es / (same_sign.iter().sum::<f64>() / same_sign.len() as f64).abs()
            };
            let edge = if score.es > 0.0 {
                &hits[..=score.extreme_hit]
            } else if score.es < 0.0 {
                &hits[score.extreme_hit..]
            } else {
                &hits[..0]
            };
            GseaResult {
                pathway: set.name.clone(),
                description: set.description.clone(),
                size: hits.len(),
                es: score.es,
                nes,
                pvalue: (more_extreme as f64 + 1.0) / (same_sign.len() as f64 + 1.0),
                padj: f64::NAN,
                leading_edge: edge.iter().map(|&p| ranked.genes()[p].clone()).collect(),
            }
        })
        .collect();

    let pvalues: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
    for (row, padj) in rows.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        row.padj = padj;
    }
    rows.sort_by(|a, b| match (a.nes.is_nan(), b.nes.is_nan()) {
        (false, false) => b.nes.total_cmp(&a.nes).then_with(|| a.pathway.cmp(&b.pathway)),
        (x, y) => x.cmp(&y),
    });
    Ok(GseaResults { rows })
}

const GSEA_COLUMNS: [&str; 8] = [
    "pathway",
    "description",
    "size",
    "es",
    "nes",
    "pvalue",
    "padj",
    "leading_edge",
];

fn write_rows<'a>(path: &Path, rows: impl IntoIterator<Item = &'a GseaResult>) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(GSEA_COLUMNS)?;
    for r in rows {
        writer.write_record([
            r.pathway.clone(),
            r.description.clone(),
            r.size.to_string(),
            format_f64(r.es),
            format_f64(r.nes),
            format_f64(r.pvalue),
            format_f64(r.padj),
            r.leading_edge.join(","),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// `gsea_results.tsv`, `top.tsv` and `bottom.tsv` under `dir`
pub fn write_gsea_tables(dir: &Path, results: &GseaResults, top_n: usize) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    write_rows(&dir.join("gsea_results.tsv"), &results.rows)?;
    write_rows(&dir.join("top.tsv"), results.top_n(top_n))?;
    write_rows(&dir.join("bottom.tsv"), results.bottom_n(top_n))?;
    log::info!("Wrote {} GSEA rows to {}", results.len(), dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str, genes: &[&str]) -> GeneSet {
        GeneSet {
            name: name.to_string(),
            description: format!("{} genes", name),
            genes: genes.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn ranked(n: usize) -> RankedList {
        let pairs = (0..n)
            .map(|i| (format!("g{:03}", i), (n / 2) as f64 - i as f64 + 0.5))
            .collect();
        RankedList::from_pairs(pairs)
            .unwrap()
    }

    #[test]
    fn test_enrichment_score_by_hand() {
        let stats = [3.0, 2.0, 1.0, 0.5, -1.0, -2.0];
        let top = enrichment_score(&stats, &[0, 1], 1.0);
        assert!((top.es - 1.0).abs() < 1e-12);
        assert_eq!(top.extreme_hit, 1);

        let bottom = enrichment_score(&stats, &[4, 5], 1.0);
        assert!((bottom.es + 1.0).abs() < 1e-12);
        assert_eq!(bottom.extreme_hit, 0);

        // 0.75 after the first hit, then three misses of 1/4
        let split = enrichment_score(&stats, &[0, 4], 1.0);
        assert!((split.es - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_top_set_is_enriched() {
        let list = ranked(200);
        let top: Vec<String> = (0..20).map(|i| format!("g{:03}", i * 2)).collect();
        let bottom: Vec<String> = (0..20).map(|i| format!("g{:03}", 199 - i)).collect();
        let sets = vec![
            GeneSet { name: "top".into(), description: String::new(), genes: top },
            GeneSet { name: "bottom".into(), description: String::new(), genes: bottom },
            set("tiny", &["g000", "g001"]),
        ];
        let params = GseaParams { nperm: 200, min_size: 5, ..GseaParams::default() };
        let res = run_gsea(&list, &sets, &params).unwrap();

        assert_eq!(res.len(), 2);
        assert_eq!(res.rows[0].pathway, "top");
        assert!(res.rows[0].nes > 1.0);
        assert!(res.rows[0].pvalue < 0.05);
        assert_eq!(res.rows[1].pathway, "bottom");
        assert!(res.rows[1].nes < -1.0);
        assert_eq!(res.rows[1].leading_edge.len(), 20);
        assert_eq!(res.top_n(5)[0].pathway, "top");
        assert_eq!(res.bottom_n(5)[0].pathway, "bottom");

        let again = run_gsea(&list, &sets, &params).unwrap();
        assert_eq!(res.rows, again.rows);
    }

    #[test]
    fn test_tables_written() {
        let dir = tempfile::tempdir().unwrap();
        let list = ranked(50);
        let genes: Vec<&str> = vec!["g000", "g001", "g002", "g003", "g004"];
        let params = GseaParams { nperm: 50, min_size: 3, ..GseaParams::default() };
        let res = run_gsea(&list, &[set("head", &genes)], &params).unwrap();
        write_gsea_tables(dir.path(), &res, 10).unwrap();

        let text = std::fs::read_to_string(dir.path().join("gsea_results.tsv")).unwrap();
        assert!(text.starts_with("pathway\tdescription\tsize"));
        assert!(text.contains("head\thead genes\t5\t"));
        assert!(dir.path().join("top.tsv").exists());
        assert!(dir.path().join("bottom.tsv").exists());
    }
}
