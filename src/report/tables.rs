//! Top up- and down-regulated gene tables

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::artifacts::format_f64;
use crate::io::{AlignedAnnotation, DESeqResults};

const COLUMNS: [&str; 10] = [
    "gene_id",
    "gene_name",
    "biotype",
    "base_mean",
    "log2_fold_change",
    "lfc_se",
    "log2_fold_change_shrunk",
    "stat",
    "pvalue",
    "padj",
];

fn write_rows(
    path: &Path,
    results: &DESeqResults,
    annotation: &AlignedAnnotation,
    rows: &[usize],
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(COLUMNS)?;
    for &i in rows {
        writer.write_record([
            results.gene_ids[i].clone(),
            annotation.gene_name(i).unwrap_or_default().to_string(),
            annotation.biotype(i).unwrap_or_default().to_string(),
            format_f64(results.base_means[i]),
            format_f64(results.log2_fold_changes[i]),
            format_f64(results.lfc_se[i]),
            format_f64(results.log2_fold_changes_shrunk[i]),
            format_f64(results.stat[i]),
            format_f64(results.pvalues[i]),
            format_f64(results.padj[i]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `top_<n>_up.tsv` and `top_<n>_down.tsv` with the `n` most up- and
/// down-regulated genes significant at the table's alpha.
///
/// `annotation` must be aligned with `results.gene_ids`.
pub fn write_top_tables(
    dir: &Path,
    results: &DESeqResults,
    annotation: &AlignedAnnotation,
    n: usize,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let up = dir.join(format!("top_{}_up.tsv", n));
    let down = dir.join(format!("top_{}_down.tsv", n));
    let up_rows = results.top_n(results.alpha, n);
    let down_rows = results.bottom_n(results.alpha, n);
    write_rows(&up, results, annotation, &up_rows)?;
    write_rows(&down, results, annotation, &down_rows)?;
    log::info!("Top tables: {} up, {} down", up_rows.len(), down_rows.len());
    Ok((up, down))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Contrast, GeneAnnotation, GeneRecord};

    #[test]
    fn test_top_tables_split_by_direction() {
        let contrast = Contrast {
            variable: "condition".into(),
            numerator: "dissociated".into(),
            denominator: "chunk".into(),
        };
        let ids: Vec<String> = ["fos", "jun", "actb", "gapdh"].iter().map(|s| s.to_string()).collect();
        let mut r = DESeqResults::new(ids.clone(), contrast, 0.1);
        r.log2_fold_changes = vec![4.0, 2.0, -1.5, 0.1];
        r.padj = vec![0.001, 0.01, 0.02, 0.9];
        let annotation = GeneAnnotation::new(vec![GeneRecord {
            gene_id: "fos".into(),
            gene_name: Some("Fos".into()),
            biotype: Some("protein_coding".into()),
            length: None,
            gc: None,
        }])
        .align(&ids);

        let dir = tempfile::tempdir().unwrap();
        let (up, down) = write_top_tables(dir.path(), &r, &annotation, 1).unwrap();
        let up_text = std::fs::read_to_string(up).unwrap();
        let lines: Vec<&str> = up_text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("fos\tFos\tprotein_coding\t"));
        let down_text = std::fs::read_to_string(down).unwrap();
        assert!(down_text.lines().nth(1).unwrap().starts_with("actb\t\t\t"));
    }
}
