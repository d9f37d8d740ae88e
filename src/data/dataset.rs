//! DESeqDataSet: counts, sample table and fitted model state for one comparison

use ndarray::{Array1, Array2, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};

/// Counts plus everything the negative binomial model accumulates while fitting.
///
/// Sample ids of the count matrix and the metadata must agree in order; this
/// is checked once here and never revisited.
#[derive(Debug, Clone)]
pub struct DESeqDataSet {
    counts: CountMatrix,
    sample_metadata: SampleMetadata,
    design_variable: String,

    size_factors: Option<Array1<f64>>,
    /// Fixed per-gene-per-sample factors (genes x samples), row geometric mean 1
    normalization_factors: Option<Array2<f64>>,

    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    /// (asymptDisp, extraPois) of the parametric trend
    dispersion_function: Option<(f64, f64)>,
    dispersion_prior_var: Option<f64>,
    var_log_disp_ests: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,

    design_matrix: Option<Array2<f64>>,
    design_column_names: Option<Vec<String>>,
    /// Natural-log scale coefficients (genes x coefficients)
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
}

impl DESeqDataSet {
    pub fn new(counts: CountMatrix, sample_metadata: SampleMetadata, design_variable: &str) -> Result<Self> {
        if counts.sample_ids() != sample_metadata.sample_ids() {
            return Err(PipelineError::InvalidMetadata {
                reason: format!(
                    "sample ids of counts {:?} and metadata {:?} differ",
                    counts.sample_ids(),
                    sample_metadata.sample_ids()
                ),
            });
        }
        let levels = sample_metadata.levels(design_variable).map_err(|_| PipelineError::InvalidDesignMatrix {
            reason: format!("design variable '{}' not found in metadata", design_variable),
        })?;
        if levels.len() < 2 {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: format!(
                    "design variable '{}' needs at least two levels, found {:?}",
                    design_variable, levels
                ),
            });
        }

        Ok(Self {
            counts,
            sample_metadata,
            design_variable: design_variable.to_string(),
            size_factors: None,
            normalization_factors: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            dispersion_function: None,
            dispersion_prior_var: None,
            var_log_disp_ests: None,
            dispersion_outliers: None,
            design_matrix: None,
            design_column_names: None,
            coefficients: None,
            standard_errors: None,
            converged: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn sample_metadata(&self) -> &SampleMetadata {
        &self.sample_metadata
    }

    pub fn design_variable(&self) -> &str {
        &self.design_variable
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalization_factors(&self) -> Option<&Array2<f64>> {
        self.normalization_factors.as_ref()
    }

    /// True if either size factors or a normalization factor matrix is set
    pub fn has_normalization(&self) -> bool {
        self.size_factors.is_some() || self.normalization_factors.is_some()
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(PipelineError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        Ok(())
    }

    /// Set fixed normalization factors (genes x samples).
    ///
    /// Each row is divided by its geometric mean, so the stored factors of
    /// every gene multiply to 1 across samples. These factors are never
    /// re-estimated by the model.
    pub fn set_normalization_factors(&mut self, mut nf: Array2<f64>) -> Result<()> {
        if nf.dim() != (self.n_genes(), self.n_samples()) {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} x {} normalization factors", self.n_genes(), self.n_samples()),
                got: format!("{} x {}", nf.nrows(), nf.ncols()),
            });
        }
        if nf.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(PipelineError::InvalidInput {
                reason: "normalization factors must be positive finite values".to_string(),
            });
        }
        center_rows_geometric(&mut nf);
        self.normalization_factors = Some(nf);
        Ok(())
    }

    /// Per-observation scaling (genes x samples): the normalization factor
    /// matrix if set, otherwise size factors broadcast over genes.
    pub fn normalization_matrix(&self) -> Result<Array2<f64>> {
        if let Some(nf) = &self.normalization_factors {
            return Ok(nf.clone());
        }
        let sf = self.size_factors.as_ref().ok_or_else(|| PipelineError::InvalidInput {
            reason: "size factors or normalization factors must be estimated first".to_string(),
        })?;
        let mut m = Array2::zeros((self.n_genes(), self.n_samples()));
        for mut row in m.axis_iter_mut(Axis(0)) {
            row.assign(sf);
        }
        Ok(m)
    }

    /// Counts divided by their normalization factors
    pub fn normalized_counts(&self) -> Result<Array2<f64>> {
        let nf = self.normalization_matrix()?;
        Ok(&self.counts.counts() / &nf)
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Result<Array1<f64>> {
        let norm = self.normalized_counts()?;
        Ok(norm.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(self.n_genes())))
    }

    /// Sample variance of normalized counts per gene
    pub fn base_vars(&self) -> Result<Array1<f64>> {
        let norm = self.normalized_counts()?;
        Ok(norm.var_axis(Axis(1), 1.0))
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    /// Final dispersions: MAP if available, otherwise gene-wise
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref().or(self.gene_dispersions.as_ref())
    }

    pub fn dispersion_function(&self) -> Option<(f64, f64)> {
        self.dispersion_function
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn design_matrix(&self) -> Option<&Array2<f64>> {
        self.design_matrix.as_ref()
    }

    pub fn design_column_names(&self) -> Option<&Vec<String>> {
        self.design_column_names.as_ref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    fn check_gene_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len("gene-wise dispersions", d.len())?;
        self.gene_dispersions = Some(d);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len("trended dispersions", d.len())?;
        self.trended_dispersions = Some(d);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len("MAP dispersions", d.len())?;
        self.map_dispersions = Some(d);
        Ok(())
    }

    pub fn set_dispersion_function(&mut self, asympt_disp: f64, extra_pois: f64) {
        self.dispersion_function = Some((asympt_disp, extra_pois));
    }

    pub fn set_dispersion_prior_var(&mut self, v: f64) {
        self.dispersion_prior_var = Some(v);
    }

    pub fn set_var_log_disp_ests(&mut self, v: f64) {
        self.var_log_disp_ests = Some(v);
    }

    pub fn set_dispersion_outliers(&mut self, outliers: Vec<bool>) {
        self.dispersion_outliers = Some(outliers);
    }

    pub fn set_design(&mut self, matrix: Array2<f64>, column_names: Vec<String>) -> Result<()> {
        if matrix.nrows() != self.n_samples() || matrix.ncols() != column_names.len() {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: format!(
                    "design matrix is {} x {}, expected {} rows and {} columns",
                    matrix.nrows(),
                    matrix.ncols(),
                    self.n_samples(),
                    column_names.len()
                ),
            });
        }
        self.design_matrix = Some(matrix);
        self.design_column_names = Some(column_names);
        Ok(())
    }

    pub fn set_glm_results(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        self.check_gene_len("coefficient rows", coefficients.nrows())?;
        self.check_gene_len("standard error rows", standard_errors.nrows())?;
        self.check_gene_len("convergence flags", converged.len())?;
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.converged = Some(converged);
        Ok(())
    }
}

/// Divide every row by its geometric mean
pub(crate) fn center_rows_geometric(m: &mut Array2<f64>) {
    let n = m.ncols() as f64;
    for mut row in m.axis_iter_mut(Axis(0)) {
        let center = (row.iter().map(|&x| x.ln()).sum::<f64>() / n).exp();
        if center.is_finite() && center > 0.0 {
            row.mapv_inplace(|x| x / center);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn test_dds() -> DESeqDataSet {
        let ids: Vec<String> = ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect();
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 30.0, 40.0], [5.0, 5.0, 50.0, 50.0]],
            vec!["g1".into(), "g2".into()],
            ids.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_column(
            "condition",
            vec!["chunk".into(), "chunk".into(), "dissociated".into(), "dissociated".into()],
        )
        .unwrap();
        DESeqDataSet::new(counts, meta, "condition").unwrap()
    }

    #[test]
    fn test_normalization_factors_are_row_centered() {
        let mut dds = test_dds();
        dds.set_normalization_factors(array![[1.0, 2.0, 4.0, 8.0], [3.0, 3.0, 3.0, 3.0]])
            .unwrap();
        let nf = dds.normalization_factors().unwrap();
        for row in nf.axis_iter(Axis(0)) {
            let log_mean = row.iter().map(|x| x.ln()).sum::<f64>() / 4.0;
            assert!(log_mean.abs() < 1e-12);
        }
        assert!((nf[[1, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalization_matrix_broadcasts_size_factors() {
        let mut dds = test_dds();
        assert!(dds.normalization_matrix().is_err());
        dds.set_size_factors(array![0.5, 1.0, 1.0, 2.0]).unwrap();
        let m = dds.normalization_matrix().unwrap();
        assert_eq!(m.dim(), (2, 4));
        assert_eq!(m[[1, 3]], 2.0);
        let norm = dds.normalized_counts().unwrap();
        assert_eq!(norm[[0, 0]], 20.0);
    }

    #[test]
    fn test_single_level_design_rejected() {
        let ids: Vec<String> = vec!["a".into(), "b".into()];
        let counts = CountMatrix::new(array![[1.0, 2.0]], vec!["g".into()], ids.clone()).unwrap();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_column("condition", vec!["x".into(), "x".into()]).unwrap();
        assert!(DESeqDataSet::new(counts, meta, "condition").is_err());
    }
}
