//! Negative binomial generalized linear model

mod design;
mod fitting;
mod negative_binomial;

pub use design::{check_full_rank, create_design_matrix, get_contrast_index, DesignInfo};
pub use fitting::{default_ridge, fit_gene, fit_glm, refit_glm_with_prior, GeneFit, GlmFitParams};
pub use negative_binomial::{
    nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, LARGE_BETA, MIN_MU,
};
