//! Iterative sampling from a trained GSN.
//!
//! A single-hidden-layer network alternates one sweep with Bernoulli
//! re-binarization and re-corruption of the visible prediction. Deeper
//! networks carry the full layer stack forward between steps and can record
//! hidden-state snapshots.

use ndarray::{concatenate, Array2, Axis};
use rand::Rng;
use tracing::debug;

use crate::core::noise::sample_bernoulli;
use crate::core::{Gsn, GsnError, GsnResult};

/// Output of [`Gsn::sample`].
#[derive(Debug, Clone, Default)]
pub struct SampleOutput {
    /// Visible states; `samples[0]` is the seed
    pub samples: Vec<Array2<f32>>,
    /// Hidden layers (1..=L) captured every `k`-th step in multi-layer mode
    pub hidden_snapshots: Vec<Vec<Array2<f32>>>,
}

impl Gsn {
    /// Generate `count` visible states starting from `seed`.
    ///
    /// Sweeps run with noise enabled. With more than one hidden layer a
    /// snapshot of the hidden layers is stored whenever the step index is a
    /// multiple of `k`; `k == 0` disables snapshots.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the seed width differs from the visible layer
    pub fn sample<R: Rng + ?Sized>(
        &self,
        seed: &Array2<f32>,
        count: usize,
        k: usize,
        rng: &mut R,
    ) -> GsnResult<SampleOutput> {
        self.check_input(seed)?;
        let mut out = SampleOutput::default();
        if count == 0 {
            return Ok(out);
        }
        out.samples.push(seed.clone());

        if self.layers() == 1 {
            let mut x = self.noise_input(seed, rng);
            while out.samples.len() < count {
                let mut stack = vec![x];
                stack.extend(self.zero_hiddens(seed.nrows()));
                let (_, prediction) = self.build_sampling_step(stack, true, rng)?;
                x = self.noise_input(&sample_bernoulli(&prediction, rng), rng);
                out.samples.push(prediction);
            }
        } else {
            let mut stack = vec![self.noise_input(seed, rng)];
            stack.extend(self.zero_hiddens(seed.nrows()));
            let mut step = 0;
            while out.samples.len() < count {
                let (next, prediction) = self.build_sampling_step(stack, true, rng)?;
                out.samples.push(prediction);
                if k > 0 && step % k == 0 {
                    out.hidden_snapshots.push(next[1..].to_vec());
                }
                stack = next;
                step += 1;
            }
        }

        debug!(
            samples = out.samples.len(),
            snapshots = out.hidden_snapshots.len(),
            "sampling complete"
        );
        Ok(out)
    }

    /// Sample and stack the sequence into one `(count * rows, d0)` matrix.
    pub fn sample_rows<R: Rng + ?Sized>(
        &self,
        seed: &Array2<f32>,
        count: usize,
        rng: &mut R,
    ) -> GsnResult<Array2<f32>> {
        let out = self.sample(seed, count, 0, rng)?;
        if out.samples.is_empty() {
            return Ok(Array2::zeros((0, self.input_size())));
        }
        let views: Vec<_> = out.samples.iter().map(|s| s.view()).collect();
        concatenate(Axis(0), &views)
            .map_err(|e| GsnError::ShapeMismatch(format!("could not stack samples: {e}")))
    }
}
