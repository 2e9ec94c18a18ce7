//! Noise injection for the walkback chain.
//!
//! Every function takes an explicit random source so a seeded generator
//! reproduces the whole chain. A noise level of zero returns the input
//! unchanged without drawing from the generator.

use ndarray::{Array2, Zip};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GsnError, GsnResult};

/// How the visible layer is corrupted before it re-enters the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Corruption {
    /// Zero each element with probability `p`
    #[default]
    Mask,
    /// Replace each element with probability `p` by a fair coin flip in {0, 1}
    SaltAndPepper,
}

impl Corruption {
    pub fn apply<R: Rng + ?Sized>(&self, x: &Array2<f32>, p: f32, rng: &mut R) -> Array2<f32> {
        self.apply_tracked(x, p, rng).0
    }

    /// Corrupt `x` and also return the keep mask, which is the elementwise
    /// derivative of the output with respect to `x`.
    pub fn apply_tracked<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        p: f32,
        rng: &mut R,
    ) -> (Array2<f32>, Array2<f32>) {
        if p <= 0.0 {
            return (x.clone(), Array2::ones(x.dim()));
        }
        let keep = keep_mask(x.dim(), p, rng);
        let mut out = x * &keep;
        if *self == Corruption::SaltAndPepper {
            let coins = keep_mask(x.dim(), 0.5, rng);
            Zip::from(&mut out)
                .and(&keep)
                .and(&coins)
                .for_each(|o, &k, &c| {
                    if k == 0.0 {
                        *o = c;
                    }
                });
        }
        (out, keep)
    }
}

/// Noise settings carried by the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Master switch for training-time hidden noise and input corruption
    pub add_noise: bool,
    /// Corruption probability for the visible layer
    pub salt_and_pepper: f32,
    /// Standard deviation of the Gaussian noise added around hidden activations
    pub hidden_sigma: f32,
    /// Suppress hidden noise on layer 1
    pub noiseless_first_hidden: bool,
    /// Replace the visible reconstruction by a Bernoulli sample before corruption
    pub input_sampling: bool,
    pub corruption: Corruption,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            add_noise: true,
            salt_and_pepper: 0.4,
            hidden_sigma: 2.0,
            noiseless_first_hidden: true,
            input_sampling: true,
            corruption: Corruption::Mask,
        }
    }
}

impl NoiseConfig {
    /// Check that every level is usable by the noise functions.
    ///
    /// # Errors
    /// - `InvalidConfig` if the corruption level is outside `[0, 1]` or the
    ///   hidden sigma is negative or not finite
    pub fn validate(&self) -> GsnResult<()> {
        if !(0.0..=1.0).contains(&self.salt_and_pepper) {
            return Err(GsnError::InvalidConfig(format!(
                "salt_and_pepper must be in [0, 1], got {}",
                self.salt_and_pepper
            )));
        }
        if !(self.hidden_sigma >= 0.0 && self.hidden_sigma.is_finite()) {
            return Err(GsnError::InvalidConfig(format!(
                "hidden_sigma must be finite and non-negative, got {}",
                self.hidden_sigma
            )));
        }
        Ok(())
    }

    /// All noise sources disabled; the chain becomes deterministic.
    pub fn noiseless() -> Self {
        Self {
            add_noise: false,
            salt_and_pepper: 0.0,
            hidden_sigma: 0.0,
            noiseless_first_hidden: true,
            input_sampling: false,
            corruption: Corruption::Mask,
        }
    }
}

/// Draw a {0,1} mask whose entries are 1 with probability `1 - p`.
fn keep_mask<R: Rng + ?Sized>(dim: (usize, usize), p: f32, rng: &mut R) -> Array2<f32> {
    let keep_prob = 1.0 - p;
    Array2::random_using(dim, Uniform::new(0.0f32, 1.0), rng)
        .mapv(|u| if u < keep_prob { 1.0 } else { 0.0 })
}

/// Zero each element independently with probability `p`.
///
/// `p = 0` is the identity, `p = 1` yields all zeros.
pub fn mask_noise<R: Rng + ?Sized>(x: &Array2<f32>, p: f32, rng: &mut R) -> Array2<f32> {
    Corruption::Mask.apply(x, p, rng)
}

/// With probability `p` replace each element by a fair coin flip in {0, 1}.
pub fn salt_and_pepper<R: Rng + ?Sized>(x: &Array2<f32>, p: f32, rng: &mut R) -> Array2<f32> {
    Corruption::SaltAndPepper.apply(x, p, rng)
}

/// Add independent `N(0, sigma²)` noise to each element.
///
/// # Errors
/// - `InvalidConfig` if `sigma` is negative or not finite
pub fn gaussian_noise<R: Rng + ?Sized>(
    x: &Array2<f32>,
    sigma: f32,
    rng: &mut R,
) -> GsnResult<Array2<f32>> {
    if !(sigma >= 0.0 && sigma.is_finite()) {
        return Err(GsnError::InvalidConfig(format!(
            "hidden noise sigma must be finite and non-negative, got {sigma}"
        )));
    }
    if sigma == 0.0 {
        return Ok(x.clone());
    }
    let normal = Normal::new(0.0f32, sigma)
        .map_err(|e| GsnError::InvalidConfig(format!("hidden noise sigma {sigma}: {e}")))?;
    Ok(x + &Array2::random_using(x.dim(), normal, rng))
}

/// Each output element is 1 with probability equal to the input element.
///
/// Inputs outside [0, 1] saturate to always-0 or always-1.
pub fn sample_bernoulli<R: Rng + ?Sized>(p: &Array2<f32>, rng: &mut R) -> Array2<f32> {
    let mut u = Array2::random_using(p.dim(), Uniform::new(0.0f32, 1.0), rng);
    Zip::from(&mut u).and(p).for_each(|u, &p| {
        *u = if *u < p { 1.0 } else { 0.0 };
    });
    u
}
