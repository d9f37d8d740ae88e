//! Negative binomial helpers shared by the GLM and dispersion fits

use statrs::function::gamma::ln_gamma;

/// Lower bound on fitted means before weights are formed
pub const MIN_MU: f64 = 0.5;

/// Iteration stops once any natural-log coefficient exceeds this magnitude
pub const LARGE_BETA: f64 = 30.0;

/// Linear predictor clamp that keeps `exp` finite
pub const MAX_ETA: f64 = 700.0;

/// mu = nf * exp(eta)
pub fn nb_mean(eta: f64, norm_factor: f64) -> f64 {
    norm_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// log P(Y = k) for mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(k: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    ln_gamma(k + size) - ln_gamma(size) - ln_gamma(k + 1.0) + size * (size / (size + mu)).ln()
        + k * (mu / (size + mu)).ln()
}

/// IRLS working weight mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// -2 * log-likelihood of one gene's counts
pub fn nb_deviance(counts: &[f64], mus: &[f64], alpha: f64) -> f64 {
    -2.0 * counts
        .iter()
        .zip(mus)
        .map(|(&k, &mu)| nb_log_likelihood(k, mu, alpha))
        .sum::<f64>()
}
