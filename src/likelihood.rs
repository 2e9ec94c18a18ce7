//! Parzen-window log-likelihood estimation.
//!
//! Fits an isotropic Gaussian kernel density on generated samples and scores
//! held-out rows under it:
//!
//! ```text
//! ll(x) = log_mean_exp_j( -0.5 · ||(x - μ_j) / σ||² ) - d · ln(σ · sqrt(2π))
//! ```
//!
//! Rows are scored in parallel.

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use crate::core::{GsnError, GsnResult};

/// `ln(mean(exp(values)))` computed without overflow.
pub fn log_mean_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + (sum / values.len() as f64).ln()
}

/// Mean log-likelihood and its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LikelihoodSummary {
    pub mean: f64,
    pub std_error: f64,
}

/// Gaussian kernel density over a fixed set of centers.
#[derive(Debug, Clone)]
pub struct ParzenEstimator {
    centers: Array2<f32>,
    sigma: f64,
}

impl ParzenEstimator {
    /// # Errors
    /// - `InvalidConfig` if `sigma` is not positive or there are no centers
    pub fn new(centers: Array2<f32>, sigma: f64) -> GsnResult<Self> {
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(GsnError::InvalidConfig(format!(
                "Parzen sigma must be positive, got {sigma}"
            )));
        }
        if centers.nrows() == 0 {
            return Err(GsnError::InvalidConfig(
                "Parzen estimator needs at least one center".to_string(),
            ));
        }
        Ok(Self { centers, sigma })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Log-density of a single row.
    pub fn log_likelihood_row(&self, x: ArrayView1<'_, f32>) -> f64 {
        let d = self.centers.ncols() as f64;
        let exponents: Vec<f64> = self
            .centers
            .rows()
            .into_iter()
            .map(|mu| {
                let sq: f64 = x
                    .iter()
                    .zip(mu.iter())
                    .map(|(&a, &b)| {
                        let z = (a - b) as f64 / self.sigma;
                        z * z
                    })
                    .sum();
                -0.5 * sq
            })
            .collect();
        let norm = d * (self.sigma * (2.0 * std::f64::consts::PI).sqrt()).ln();
        log_mean_exp(&exponents) - norm
    }

    /// Log-density of every row of `data`, in row order.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `data` and the centers differ in width
    pub fn log_likelihood(&self, data: &Array2<f32>) -> GsnResult<Vec<f64>> {
        if data.ncols() != self.centers.ncols() {
            return Err(GsnError::ShapeMismatch(format!(
                "data has {} columns, centers have {}",
                data.ncols(),
                self.centers.ncols()
            )));
        }
        Ok((0..data.nrows())
            .into_par_iter()
            .map(|i| self.log_likelihood_row(data.row(i)))
            .collect())
    }

    /// Score `data` and summarize as mean ± standard error.
    pub fn evaluate(&self, data: &Array2<f32>) -> GsnResult<LikelihoodSummary> {
        let lls = self.log_likelihood(data)?;
        Ok(summarize(&lls))
    }
}

/// Mean and `std / sqrt(n)` of per-row log-likelihoods.
pub fn summarize(values: &[f64]) -> LikelihoodSummary {
    if values.is_empty() {
        return LikelihoodSummary {
            mean: f64::NAN,
            std_error: f64::NAN,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    LikelihoodSummary {
        mean,
        std_error: var.sqrt() / n.sqrt(),
    }
}
