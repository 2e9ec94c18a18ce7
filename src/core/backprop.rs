//! Reverse-mode gradient of the summed chain cost.
//!
//! The tape from [`Gsn::build_training_chain`] is replayed backwards. Each
//! layer keeps an adjoint (d cost / d h_i) that collects contributions from
//! every later update that read it.
//!
//! ```text
//! δ_i      = adj_i ⊙ act'(pre_i)                      (hidden)
//! δ_0      = costδ(p_k) + (adj_0 ⊙ keep) ⊙ act'(pre_0)  (visible)
//! ∇b_i    += Σ_rows δ_i
//! ∇W_{i-1} += h_{i-1}^T · δ_i       adj_{i-1} += δ_i · W_{i-1}^T
//! ∇W_i    += δ_i^T · h_{i+1}        adj_{i+1} += δ_i · W_i
//! ```
//!
//! Gaussian noise is additive so it passes gradients through unchanged, and
//! Bernoulli resampling blocks them.

use ndarray::{Array2, Axis};

use super::walkback::Tape;
use super::{Gsn, GsnError, GsnResult, Params};

impl Gsn {
    /// Gradient of `Σ_k cost(chain[k], target)` with respect to every parameter.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the tape refers to a chain index that does not exist
    pub fn chain_gradients(
        &self,
        tape: &Tape,
        chain: &[Array2<f32>],
        target: &Array2<f32>,
    ) -> GsnResult<Params> {
        let batch = target.nrows();
        let mut grads = Params::zeros(&self.layer_sizes);
        let mut adjoint: Vec<Array2<f32>> = self
            .layer_sizes
            .iter()
            .map(|&n| Array2::zeros((batch, n)))
            .collect();

        for record in tape.records.iter().rev() {
            let i = record.layer;
            // the update overwrote h_i, so earlier values receive nothing from later readers
            let upstream = std::mem::replace(
                &mut adjoint[i],
                Array2::zeros((batch, self.layer_sizes[i])),
            );

            let delta = match &record.visible {
                Some(visible) => {
                    let prediction = chain.get(visible.chain_index).ok_or_else(|| {
                        GsnError::ShapeMismatch(format!(
                            "tape refers to chain step {} of {}",
                            visible.chain_index,
                            chain.len()
                        ))
                    })?;
                    let mut delta = self.cost.output_delta(
                        self.visible_activation.as_ref(),
                        &record.pre,
                        prediction,
                        target,
                    );
                    if let Some(keep) = &visible.keep {
                        let carried = upstream * keep;
                        delta += &(carried * self.visible_activation.derivative_matrix(&record.pre));
                    }
                    delta
                }
                None => upstream * self.hidden_activation.derivative_matrix(&record.pre),
            };

            grads.biases[i] += &delta.sum_axis(Axis(0));

            if let Some(below) = &record.below {
                grads.weights[i - 1] += &below.t().dot(&delta);
                adjoint[i - 1] += &delta.dot(&self.weights[i - 1].t());
            }
            if let Some(above) = &record.above {
                grads.weights[i] += &delta.t().dot(above);
                adjoint[i + 1] += &delta.dot(&self.weights[i]);
            }
        }

        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoiseConfig, SigmoidActivation, TanhActivation};
    use crate::cost::{chain_cost, BinaryCrossEntropy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_single_sweep_visible_bias_gradient() {
        // Zero weights: every prediction is sigmoid(b_0), so ∇b_0 is the
        // sum of (p - x) / N down each column for the single chain step.
        let mut rng = StdRng::seed_from_u64(3);
        let mut gsn = Gsn::new(
            vec![2, 3],
            Box::new(SigmoidActivation),
            Box::new(TanhActivation),
            Box::new(BinaryCrossEntropy),
            NoiseConfig::noiseless(),
            1,
            &mut rng,
        )
        .unwrap();
        gsn.weights[0].fill(0.0);

        let x = ndarray::arr2(&[[1.0, 0.0], [1.0, 1.0]]);
        let mut tape = Tape::default();
        let out = gsn
            .build_training_chain(&x, 1, false, &mut rng, Some(&mut tape))
            .unwrap();
        let grads = gsn.chain_gradients(&tape, &out.chain, &x).unwrap();

        // p = 0.5 everywhere, N = 4, one chain step
        assert_eq!(out.chain.len(), 1);
        let expected_col0 = ((0.5 - 1.0) + (0.5 - 1.0)) / 4.0;
        let expected_col1 = ((0.5 - 0.0) + (0.5 - 1.0)) / 4.0;
        assert!((grads.biases[0][0] - expected_col0).abs() < 1e-6);
        assert!((grads.biases[0][1] - expected_col1).abs() < 1e-6);
        assert!(grads.biases[1].iter().all(|&g| g == 0.0));

        let cost = chain_cost(gsn.cost.as_ref(), &out.chain, &x).unwrap();
        assert!(cost.total > 0.0);
    }
}
