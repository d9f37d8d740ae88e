//! Delimited count matrix tables (`gene_id` column followed by one column per sample)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Tab if the header line contains one, otherwise comma
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    Ok(if first.contains('\t') { b'\t' } else { b',' })
}

/// Read a count matrix with genes in rows.
///
/// Counts may be written as integers or as floats with no fractional part
/// (`12` or `12.0`).
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(path)?)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(PipelineError::InvalidCountMatrix {
            reason: format!("{}: header needs a gene column and at least one sample", path.display()),
        });
    }
    let sample_ids: Vec<String> = headers.iter().skip(1).map(|s| s.trim().to_string()).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        gene_ids.push(record[0].trim().to_string());
        for field in record.iter().skip(1) {
            let v: f64 = field.trim().parse().map_err(|_| PipelineError::InvalidCountMatrix {
                reason: format!("{}: invalid count '{}' for gene {}", path.display(), field, &record[0]),
            })?;
            values.push(v);
        }
    }

    if gene_ids.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("{} contains no genes", path.display()),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        PipelineError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!(
        "Read {} genes x {} samples from {}",
        gene_ids.len(),
        n_samples,
        path.display()
    );
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Write a count matrix as TSV with integer formatting
pub fn write_count_matrix<P: AsRef<Path>>(path: P, matrix: &CountMatrix) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(matrix.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    let counts = matrix.counts();
    for (i, gene) in matrix.gene_ids().iter().enumerate() {
        let mut row = Vec::with_capacity(matrix.n_samples() + 1);
        row.push(gene.clone());
        row.extend(counts.row(i).iter().map(|&v| format!("{}", v as u64)));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_matrix_tab_and_comma() {
        let mut tsv = NamedTempFile::new().unwrap();
        writeln!(tsv, "gene_id\tpb1\tpb2\tpb3").unwrap();
        writeln!(tsv, "gene1\t100\t200\t150").unwrap();
        writeln!(tsv, "gene2\t50\t75.0\t60").unwrap();
        let m = read_count_matrix(tsv.path()).unwrap();
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.sample_ids(), &["pb1", "pb2", "pb3"]);
        assert_eq!(m.counts()[[1, 1]], 75.0);

        let mut csv_file = NamedTempFile::new().unwrap();
        writeln!(csv_file, "gene_id,a,b").unwrap();
        writeln!(csv_file, "g,1,2").unwrap();
        assert_eq!(read_count_matrix(csv_file.path()).unwrap().n_samples(), 2);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let mut tsv = NamedTempFile::new().unwrap();
        writeln!(tsv, "gene_id\ta\tb").unwrap();
        writeln!(tsv, "g1\t1").unwrap();
        assert!(read_count_matrix(tsv.path()).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let m = CountMatrix::new(
            ndarray::array![[1.0, 2.0], [30.0, 0.0]],
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        )
        .unwrap();
        let out = NamedTempFile::new().unwrap();
        write_count_matrix(out.path(), &m).unwrap();
        let back = read_count_matrix(out.path()).unwrap();
        assert_eq!(back.counts(), m.counts());
        assert_eq!(back.gene_ids(), m.gene_ids());
    }
}
