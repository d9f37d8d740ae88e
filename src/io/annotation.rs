//! Per-gene annotation: biotype, length and GC content
//!
//! Two sources are supported: a GTF file (names, biotypes, exon-union
//! lengths) and a local TSV table (`gene_id`, `gene_name`, `biotype`,
//! `length`, `gc`) that supplies GC content and overrides lengths.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// Biotype label used to select genes for the volcano plot
pub const PROTEIN_CODING: &str = "protein_coding";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneRecord {
    pub gene_id: String,
    #[serde(default)]
    pub gene_name: Option<String>,
    #[serde(default)]
    pub biotype: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    /// Fraction of G/C bases, in [0, 1]
    #[serde(default)]
    pub gc: Option<f64>,
}

impl GeneRecord {
    fn bare(gene_id: &str) -> Self {
        Self {
            gene_id: gene_id.to_string(),
            gene_name: None,
            biotype: None,
            length: None,
            gc: None,
        }
    }

    /// Both covariates needed by the GC/length normalizer are present
    pub fn has_covariates(&self) -> bool {
        matches!((self.length, self.gc), (Some(l), Some(g)) if l > 0.0 && g.is_finite())
    }

    pub fn is_protein_coding(&self) -> bool {
        self.biotype.as_deref() == Some(PROTEIN_CODING)
    }
}

/// Deduplicated gene annotation keyed by gene id
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotation {
    records: Vec<GeneRecord>,
    index: HashMap<String, usize>,
}

impl GeneAnnotation {
    /// Build from records; the first occurrence of a gene id wins
    pub fn new(records: Vec<GeneRecord>) -> Self {
        let mut out = Self::default();
        let mut duplicates = 0usize;
        for r in records {
            if out.index.contains_key(&r.gene_id) {
                duplicates += 1;
                log::debug!("Duplicate annotation entry for {} ignored", r.gene_id);
                continue;
            }
            out.index.insert(r.gene_id.clone(), out.records.len());
            out.records.push(r);
        }
        if duplicates > 0 {
            log::warn!("Dropped {} duplicate annotation entries (first occurrence kept)", duplicates);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&GeneRecord> {
        self.index.get(gene_id).map(|&i| &self.records[i])
    }

    /// True if any record carries a biotype
    pub fn has_biotypes(&self) -> bool {
        self.records.iter().any(|r| r.biotype.is_some())
    }

    /// Fill gaps in `self` from `other`; `other` wins for length and GC
    pub fn merge(mut self, other: GeneAnnotation) -> Self {
        for r in other.records {
            match self.index.get(&r.gene_id) {
                Some(&i) => {
                    let cur = &mut self.records[i];
                    if r.length.is_some() {
                        cur.length = r.length;
                    }
                    if r.gc.is_some() {
                        cur.gc = r.gc;
                    }
                    if cur.gene_name.is_none() {
                        cur.gene_name = r.gene_name;
                    }
                    if cur.biotype.is_none() {
                        cur.biotype = r.biotype;
                    }
                }
                None => {
                    self.index.insert(r.gene_id.clone(), self.records.len());
                    self.records.push(r);
                }
            }
        }
        self
    }

    /// Annotation rows in the order of `gene_ids`; unknown genes map to `None`
    pub fn align(&self, gene_ids: &[String]) -> AlignedAnnotation {
        let records: Vec<Option<GeneRecord>> = gene_ids.iter().map(|id| self.get(id).cloned()).collect();
        let missing = records.iter().filter(|r| r.is_none()).count();
        if missing > 0 {
            log::warn!("{} of {} genes have no annotation entry", missing, gene_ids.len());
        }
        AlignedAnnotation {
            gene_ids: gene_ids.to_vec(),
            records,
        }
    }
}

/// Annotation aligned row-for-row with a count matrix
#[derive(Debug, Clone)]
pub struct AlignedAnnotation {
    pub gene_ids: Vec<String>,
    pub records: Vec<Option<GeneRecord>>,
}

impl AlignedAnnotation {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lengths(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.as_ref().and_then(|r| r.length)).collect()
    }

    pub fn gc(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.as_ref().and_then(|r| r.gc)).collect()
    }

    pub fn gene_name(&self, i: usize) -> Option<&str> {
        self.records[i].as_ref().and_then(|r| r.gene_name.as_deref())
    }

    pub fn biotype(&self, i: usize) -> Option<&str> {
        self.records[i].as_ref().and_then(|r| r.biotype.as_deref())
    }

    pub fn has_biotypes(&self) -> bool {
        self.records.iter().flatten().any(|r| r.biotype.is_some())
    }

    /// Rows usable by the GC/length normalizer
    pub fn covariate_mask(&self) -> Vec<bool> {
        self.records
            .iter()
            .map(|r| r.as_ref().map_or(false, |r| r.has_covariates()))
            .collect()
    }
}

/// Extract `key "value";` from a GTF attribute column
fn gtf_attribute<'a>(attributes: &'a str, key: &str) -> Option<&'a str> {
    attributes.split(';').find_map(|field| {
        let field = field.trim();
        let rest = field.strip_prefix(key)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim().trim_matches('"'))
    })
}

/// Total length covered by a set of closed intervals
fn union_length(mut intervals: Vec<(u64, u64)>) -> u64 {
    intervals.sort_unstable();
    let mut total = 0;
    let mut current: Option<(u64, u64)> = None;
    for (s, e) in intervals {
        current = match current {
            Some((cs, ce)) if s <= ce + 1 => Some((cs, ce.max(e))),
            Some((cs, ce)) => {
                total += ce - cs + 1;
                Some((s, e))
            }
            None => Some((s, e)),
        };
    }
    if let Some((cs, ce)) = current {
        total += ce - cs + 1;
    }
    total
}

/// Parse gene records from a GTF file.
///
/// Length is the union of exon intervals when exons are present for a gene,
/// otherwise the span of its `gene` feature. GC content is left empty.
pub fn read_gtf<P: AsRef<Path>>(path: P) -> Result<GeneAnnotation> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut genes: Vec<GeneRecord> = Vec::new();
    let mut spans: HashMap<String, u64> = HashMap::new();
    let mut exons: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            return Err(PipelineError::AnnotationMismatch {
                reason: format!("{}: line {} has {} fields, expected 9", path.display(), n + 1, fields.len()),
            });
        }
        let parse_pos = |s: &str| -> Result<u64> {
            s.parse().map_err(|_| PipelineError::AnnotationMismatch {
                reason: format!("{}: line {}: bad coordinate '{}'", path.display(), n + 1, s),
            })
        };
        let (start, end) = (parse_pos(fields[3])?, parse_pos(fields[4])?);
        let attrs = fields[8];
        let Some(gene_id) = gtf_attribute(attrs, "gene_id") else {
            continue;
        };

        match fields[2] {
            "gene" => {
                spans.insert(gene_id.to_string(), end.saturating_sub(start) + 1);
                genes.push(GeneRecord {
                    gene_id: gene_id.to_string(),
                    gene_name: gtf_attribute(attrs, "gene_name").map(str::to_string),
                    biotype: gtf_attribute(attrs, "gene_biotype")
                        .or_else(|| gtf_attribute(attrs, "gene_type"))
                        .map(str::to_string),
                    length: None,
                    gc: None,
                });
            }
            "exon" => exons.entry(gene_id.to_string()).or_default().push((start, end)),
            _ => {}
        }
    }

    for g in genes.iter_mut() {
        g.length = match exons.remove(&g.gene_id) {
            Some(iv) => Some(union_length(iv) as f64),
            None => spans.get(&g.gene_id).map(|&l| l as f64),
        };
    }
    // exons of genes without a gene line
    for (gene_id, iv) in exons {
        let mut r = GeneRecord::bare(&gene_id);
        r.length = Some(union_length(iv) as f64);
        genes.push(r);
    }

    log::info!("Read {} genes from GTF {}", genes.len(), path.display());
    Ok(GeneAnnotation::new(genes))
}

/// Read the tab-separated annotation table
pub fn read_annotation_table<P: AsRef<Path>>(path: P) -> Result<GeneAnnotation> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let mut r: GeneRecord = row?;
        if let Some(gc) = r.gc {
            if !(0.0..=1.0).contains(&gc) {
                return Err(PipelineError::AnnotationMismatch {
                    reason: format!("{}: gc {} for {} is not a fraction", path.display(), gc, r.gene_id),
                });
            }
        }
        r.gene_name = r.gene_name.filter(|s| !s.is_empty());
        r.biotype = r.biotype.filter(|s| !s.is_empty());
        records.push(r);
    }
    log::info!("Read {} annotation rows from {}", records.len(), path.display());
    Ok(GeneAnnotation::new(records))
}

/// Load whichever annotation sources are configured and merge them
pub fn load_annotation(gtf: Option<&Path>, table: Option<&Path>) -> Result<GeneAnnotation> {
    let from_gtf = gtf.map(read_gtf).transpose()?;
    let from_table = table.map(read_annotation_table).transpose()?;
    Ok(match (from_gtf, from_table) {
        (Some(g), Some(t)) => g.merge(t),
        (Some(g), None) => g,
        (None, Some(t)) => t,
        (None, None) => {
            log::warn!("No annotation source configured");
            GeneAnnotation::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GTF: &str = "#!genome-build GRCh38\n\
1\thavana\tgene\t100\t1099\t.\t+\t.\tgene_id \"ENSG1\"; gene_name \"LEP\"; gene_biotype \"protein_coding\";\n\
1\thavana\texon\t100\t199\t.\t+\t.\tgene_id \"ENSG1\"; transcript_id \"T1\";\n\
1\thavana\texon\t150\t299\t.\t+\t.\tgene_id \"ENSG1\"; transcript_id \"T2\";\n\
1\thavana\texon\t500\t599\t.\t+\t.\tgene_id \"ENSG1\"; transcript_id \"T2\";\n\
2\thavana\tgene\t10\t19\t.\t-\t.\tgene_id \"ENSG2\"; gene_type \"lncRNA\";\n";

    #[test]
    fn gtf_lengths_use_exon_union() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(GTF.as_bytes()).unwrap();
        let ann = read_gtf(f.path()).unwrap();
        let g1 = ann.get("ENSG1").unwrap();
        assert_eq!(g1.length, Some(300.0));
        assert_eq!(g1.gene_name.as_deref(), Some("LEP"));
        assert!(g1.is_protein_coding());
        let g2 = ann.get("ENSG2").unwrap();
        assert_eq!(g2.length, Some(10.0));
        assert_eq!(g2.biotype.as_deref(), Some("lncRNA"));
    }

    #[test]
    fn table_overrides_and_align_marks_missing() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id\tgene_name\tbiotype\tlength\tgc").unwrap();
        writeln!(f, "ENSG1\t\t\t1200\t0.45").unwrap();
        writeln!(f, "ENSG3\tHBB\tprotein_coding\t600\t").unwrap();
        writeln!(f, "ENSG3\tdup\tprotein_coding\t1\t0.1").unwrap();
        let table = read_annotation_table(f.path()).unwrap();
        assert_eq!(table.len(), 2);

        let mut g = NamedTempFile::new().unwrap();
        g.write_all(GTF.as_bytes()).unwrap();
        let merged = load_annotation(Some(g.path()), Some(f.path())).unwrap();
        let g1 = merged.get("ENSG1").unwrap();
        assert_eq!(g1.length, Some(1200.0));
        assert_eq!(g1.gc, Some(0.45));
        assert_eq!(g1.gene_name.as_deref(), Some("LEP"));

        let ids: Vec<String> = vec!["ENSG3".into(), "ENSG9".into(), "ENSG1".into()];
        let aligned = merged.align(&ids);
        assert!(aligned.records[1].is_none());
        assert_eq!(aligned.covariate_mask(), vec![false, false, true]);
        assert_eq!(aligned.gene_name(0), Some("HBB"));
    }

    #[test]
    fn union_length_merges_adjacent_intervals() {
        assert_eq!(union_length(vec![(1, 10), (11, 20), (30, 30)]), 21);
        assert_eq!(union_length(vec![]), 0);
    }
}
