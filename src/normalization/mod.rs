//! Size factors and GC/length normalization factors

mod cqn;
mod size_factors;

pub use cqn::{cqn_normalization_factors, CqnFactors};
pub use size_factors::{estimate_size_factors, median_of_ratios, SizeFactorMethod};
