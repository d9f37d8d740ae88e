//! Log fold change shrinkage

mod normal;

pub use normal::{beta_prior_variances, shrink_lfc_normal, DEFAULT_UPPER_QUANTILE};
