//! Gene filters: minimum total reads before modelling and independent
//! filtering of adjusted p-values after testing

pub mod expression;
mod independent;

pub use expression::{filter_min_total_reads, FilterReport};
pub use independent::{independent_filtering, lowess, FilterChoice};
