//! Treatment-contrast design matrix for a single categorical variable

use nalgebra::DMatrix;
use ndarray::Array2;

use crate::data::SampleMetadata;
use crate::error::{PipelineError, Result};

/// Column layout of a `~ variable` design
#[derive(Debug, Clone, PartialEq)]
pub struct DesignInfo {
    /// `Intercept`, then `<variable>_<level>_vs_<reference>` per non-reference level
    pub coef_names: Vec<String>,
    pub variable: String,
    pub reference_level: String,
    /// Reference first, then the remaining levels in column order
    pub levels: Vec<String>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }
}

/// Build `~ variable` with the metadata's current reference level.
///
/// Column 0 is the intercept; column `j >= 1` indicates samples of
/// `levels[j]`. Call [`SampleMetadata::relevel`] beforehand to pick the
/// reference.
pub fn create_design_matrix(metadata: &SampleMetadata, variable: &str) -> Result<(Array2<f64>, DesignInfo)> {
    let values = metadata.column(variable).ok_or_else(|| PipelineError::InvalidDesignMatrix {
        reason: format!("variable '{}' not found in metadata", variable),
    })?;
    let levels = metadata.levels(variable)?;
    if levels.len() < 2 {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!("variable '{}' has {} level(s), need at least 2", variable, levels.len()),
        });
    }

    let reference_level = levels[0].clone();
    let mut design = Array2::zeros((values.len(), levels.len()));
    for (i, value) in values.iter().enumerate() {
        design[[i, 0]] = 1.0;
        if let Some(j) = levels.iter().skip(1).position(|l| l == value) {
            design[[i, j + 1]] = 1.0;
        }
    }

    let coef_names = std::iter::once("Intercept".to_string())
        .chain(
            levels
                .iter()
                .skip(1)
                .map(|l| format!("{}_{}_vs_{}", variable, l, reference_level)),
        )
        .collect();

    check_full_rank(&design)?;
    Ok((
        design,
        DesignInfo {
            coef_names,
            variable: variable.to_string(),
            reference_level,
            levels,
        },
    ))
}

/// Reject designs whose columns are linearly dependent
pub fn check_full_rank(design: &Array2<f64>) -> Result<()> {
    let (n, p) = design.dim();
    if n <= p {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!(
                "{} samples cannot support {} coefficients with residual degrees of freedom",
                n, p
            ),
        });
    }
    let m = DMatrix::from_fn(n, p, |i, j| design[[i, j]]);
    let rank = m.rank(1e-10);
    if rank < p {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!("design matrix has rank {} but {} columns", rank, p),
        });
    }
    Ok(())
}

/// Coefficient index and sign for `numerator vs denominator`.
///
/// One side must be the reference level: the sign is `+1` when the
/// denominator is the reference and `-1` when the numerator is.
pub fn get_contrast_index(info: &DesignInfo, numerator: &str, denominator: &str) -> Result<(usize, f64)> {
    let find = |level: &str| {
        info.levels
            .iter()
            .position(|l| l == level)
            .ok_or_else(|| PipelineError::InvalidContrast {
                reason: format!(
                    "level '{}' not present in '{}' (levels: {:?})",
                    level, info.variable, info.levels
                ),
            })
    };
    let num = find(numerator)?;
    let den = find(denominator)?;

    match (num, den) {
        (n, d) if n == d => Err(PipelineError::InvalidContrast {
            reason: format!("numerator and denominator are both '{}'", numerator),
        }),
        (n, 0) => Ok((n, 1.0)),
        (0, d) => Ok((d, -1.0)),
        _ => Err(PipelineError::InvalidContrast {
            reason: format!(
                "contrast {} vs {} does not involve the reference level '{}'",
                numerator, denominator, info.reference_level
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(conditions: &[&str]) -> SampleMetadata {
        let ids = (0..conditions.len()).map(|i| format!("s{}", i)).collect();
        let mut m = SampleMetadata::new(ids).unwrap();
        m.add_column("condition", conditions.iter().map(|s| s.to_string()).collect())
            .unwrap();
        m
    }

    #[test]
    fn test_treatment_coding_follows_reference() {
        let mut m = metadata(&["dissociated", "chunk", "dissociated", "chunk"]);
        m.relevel("condition", "chunk").unwrap();
        let (x, info) = create_design_matrix(&m, "condition").unwrap();
        assert_eq!(info.coef_names, vec!["Intercept", "condition_dissociated_vs_chunk"]);
        assert_eq!(info.reference_level, "chunk");
        assert_eq!(x.column(0).to_vec(), vec![1.0; 4]);
        assert_eq!(x.column(1).to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_contrast_index_and_sign() {
        let mut m = metadata(&["a", "b", "c", "a", "b", "c"]);
        m.relevel("condition", "b").unwrap();
        let (_, info) = create_design_matrix(&m, "condition").unwrap();
        let a = info.levels.iter().position(|l| l == "a").unwrap();
        assert_eq!(get_contrast_index(&info, "a", "b").unwrap(), (a, 1.0));
        assert_eq!(get_contrast_index(&info, "b", "a").unwrap(), (a, -1.0));
        assert!(get_contrast_index(&info, "a", "c").is_err());
        assert!(get_contrast_index(&info, "a", "zzz").is_err());
    }

    #[test]
    fn test_rank_deficiency_rejected() {
        let x = ndarray::array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        assert!(check_full_rank(&x).is_err());
        let single = metadata(&["a", "a", "a"]);
        assert!(create_design_matrix(&single, "condition").is_err());
    }
}
