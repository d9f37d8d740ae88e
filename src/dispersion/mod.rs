//! Dispersion estimation: gene-wise, trend, then shrinkage toward the trend

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions};
pub use map::{estimate_map_dispersions, estimate_prior_variance};
pub use trend::{fit_dispersion_trend, trend_curve, TrendFit};

use nalgebra::DMatrix;

use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::create_design_matrix;

/// Controls shared by the gene-wise and MAP optimizers
#[derive(Debug, Clone)]
pub struct DispersionParams {
    pub min_disp: f64,
    /// Smallest accepted log-posterior improvement before the line search stops
    pub disp_tol: f64,
    /// Initial line-search step
    pub kappa_0: f64,
    pub maxit: usize,
    /// Log-scale standard deviations above the trend that mark an outlier
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Group layout of a one-factor design, as the dispersion fits need it
#[derive(Debug, Clone)]
pub struct DispersionDesign {
    /// Intercept plus one indicator per non-reference group
    pub x: DMatrix<f64>,
    /// Group of every sample; 0 is the reference
    pub groups: Vec<usize>,
    pub n_groups: usize,
}

impl DispersionDesign {
    pub fn from_groups(groups: Vec<usize>, n_groups: usize) -> Self {
        let x = DMatrix::from_fn(groups.len(), n_groups, |i, j| {
            if j == 0 || groups[i] == j {
                1.0
            } else {
                0.0
            }
        });
        Self { x, groups, n_groups }
    }

    pub fn from_dataset(dds: &DESeqDataSet) -> Result<Self> {
        let metadata = dds.sample_metadata();
        let (_, info) = create_design_matrix(metadata, dds.design_variable())?;
        let values = metadata.column(&info.variable).ok_or_else(|| PipelineError::InvalidDesignMatrix {
            reason: format!("variable '{}' not found in metadata", info.variable),
        })?;
        let groups = values
            .iter()
            .map(|v| info.levels.iter().position(|l| l == v).unwrap_or(0))
            .collect();
        Ok(Self::from_groups(groups, info.levels.len()))
    }

    pub fn n_samples(&self) -> usize {
        self.groups.len()
    }

    /// m - p
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_groups)
    }

    /// Upper bound on any dispersion estimate: max(m, 10)
    pub fn max_disp(&self) -> f64 {
        (self.n_samples() as f64).max(10.0)
    }
}

/// Gene-wise estimates, trend and MAP shrinkage, in that order
pub fn estimate_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<TrendFit> {
    estimate_gene_dispersions(dds, params)?;
    let trend = fit_dispersion_trend(dds, params.min_disp)?;
    estimate_map_dispersions(dds, params)?;
    Ok(trend)
}
