//! Walkback chain: alternating odd/even layer sweeps over the layer stack.
//!
//! ## Layer Update
//!
//! ```text
//! pre_i = h_{i-1} · W_{i-1}  +  h_{i+1} · W_i^T  +  b_i     (missing neighbours drop out)
//! hidden:  h_i = act(pre_i + n1) + n2                        (n ~ N(0, σ²) when noisy)
//! visible: p   = act(pre_0)          -> appended to the chain
//!          h_0 = corrupt(sample(p))                          (sample only with input_sampling)
//! ```
//!
//! One sweep updates every odd layer, then every even layer, so layer 0 emits
//! exactly one prediction per sweep. A training chain with `W` walkbacks
//! runs `W` sweeps and emits `W` predictions.

use ndarray::Array2;
use rand::Rng;
use tracing::{debug, trace};

use super::noise::{gaussian_noise, sample_bernoulli};
use super::{Gsn, GsnError, GsnResult};

/// Current value of every layer, index 0 is the visible layer.
pub type LayerStack = Vec<Array2<f32>>;

/// Order in which layer parities are visited within a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOrder {
    /// Odd layers first, then even layers (training and sampling)
    OddThenEven,
    /// Even layers first, then odd layers (chains seeded from given hiddens)
    EvenThenOdd,
}

/// Values needed to differentiate through one visible update.
#[derive(Debug, Clone)]
pub struct VisibleRecord {
    /// Position of the emitted prediction in the chain
    pub chain_index: usize,
    /// d h_0 / d prediction, `None` when the prediction was resampled
    pub keep: Option<Array2<f32>>,
}

/// Everything one layer update read and computed.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub layer: usize,
    /// Neighbour below as read during the update
    pub below: Option<Array2<f32>>,
    /// Neighbour above as read during the update
    pub above: Option<Array2<f32>>,
    /// Pre-activation after any pre-activation noise
    pub pre: Array2<f32>,
    pub visible: Option<VisibleRecord>,
}

/// Ordered log of layer updates in a training chain.
#[derive(Debug, Clone, Default)]
pub struct Tape {
    pub records: Vec<LayerRecord>,
}

/// Result of a training chain.
#[derive(Debug, Clone)]
pub struct WalkbackOutput {
    /// Visible predictions in emission order
    pub chain: Vec<Array2<f32>>,
    /// Layer stack after the final sweep
    pub stack: LayerStack,
}

impl Gsn {
    /// Zero-valued hidden layers for a batch of `batch_size` rows.
    pub fn zero_hiddens(&self, batch_size: usize) -> Vec<Array2<f32>> {
        self.layer_sizes[1..]
            .iter()
            .map(|&n| Array2::zeros((batch_size, n)))
            .collect()
    }

    /// Corrupt a visible batch with the model's current corruption level.
    pub fn noise_input<R: Rng + ?Sized>(&self, x: &Array2<f32>, rng: &mut R) -> Array2<f32> {
        self.noise
            .corruption
            .apply(x, self.noise.salt_and_pepper, rng)
    }

    fn check_stack(&self, stack: &LayerStack) -> GsnResult<usize> {
        if stack.len() != self.layer_sizes.len() {
            return Err(GsnError::ShapeMismatch(format!(
                "layer stack has {} entries, network has {} layers",
                stack.len(),
                self.layer_sizes.len()
            )));
        }
        let batch = stack[0].nrows();
        for (i, (h, &n)) in stack.iter().zip(&self.layer_sizes).enumerate() {
            if h.dim() != (batch, n) {
                return Err(GsnError::ShapeMismatch(format!(
                    "layer {i} has shape {:?}, expected ({batch}, {n})",
                    h.dim()
                )));
            }
        }
        Ok(batch)
    }

    /// Recompute layer `i` in place from its neighbours.
    ///
    /// Returns the visible prediction when `i == 0`, otherwise `None`. When a
    /// tape is supplied the inputs and intermediates are recorded for the
    /// gradient pass; `chain_len` is the index the prediction will take.
    fn update_layer<R: Rng + ?Sized>(
        &self,
        stack: &mut LayerStack,
        i: usize,
        add_noise: bool,
        rng: &mut R,
        tape: Option<&mut Tape>,
        chain_len: usize,
    ) -> GsnResult<Option<Array2<f32>>> {
        trace!(layer = i, add_noise, "layer update");
        let top = stack.len() - 1;
        let below = (i > 0).then(|| stack[i - 1].clone());
        let above = (i < top).then(|| stack[i + 1].clone());

        let mut pre = match (&below, &above) {
            (Some(b), Some(a)) => b.dot(&self.weights[i - 1]) + a.dot(&self.weights[i].t()),
            (Some(b), None) => b.dot(&self.weights[i - 1]),
            (None, Some(a)) => a.dot(&self.weights[i].t()),
            (None, None) => {
                return Err(GsnError::ShapeMismatch(
                    "layer stack has no hidden layer".to_string(),
                ))
            }
        };
        pre += &self.biases[i];

        if i > 0 {
            let noisy = add_noise && !(i == 1 && self.noise.noiseless_first_hidden);
            if noisy {
                pre = gaussian_noise(&pre, self.noise.hidden_sigma, rng)?;
            }
            let mut h = self.hidden_activation.apply_matrix(&pre);
            if noisy {
                h = gaussian_noise(&h, self.noise.hidden_sigma, rng)?;
            }
            stack[i] = h;
            if let Some(tape) = tape {
                tape.records.push(LayerRecord {
                    layer: i,
                    below,
                    above,
                    pre,
                    visible: None,
                });
            }
            return Ok(None);
        }

        let prediction = self.visible_activation.apply_matrix(&pre);
        let (fed, resampled) = if self.noise.input_sampling {
            (sample_bernoulli(&prediction, rng), true)
        } else {
            (prediction.clone(), false)
        };
        let (corrupted, keep) =
            self.noise
                .corruption
                .apply_tracked(&fed, self.noise.salt_and_pepper, rng);
        stack[0] = corrupted;

        if let Some(tape) = tape {
            tape.records.push(LayerRecord {
                layer: 0,
                below,
                above,
                pre,
                visible: Some(VisibleRecord {
                    chain_index: chain_len,
                    keep: (!resampled).then_some(keep),
                }),
            });
        }
        Ok(Some(prediction))
    }

    /// Update every layer once in the given parity order, returning the
    /// visible prediction emitted by the sweep.
    fn sweep<R: Rng + ?Sized>(
        &self,
        stack: &mut LayerStack,
        order: SweepOrder,
        add_noise: bool,
        rng: &mut R,
        mut tape: Option<&mut Tape>,
        chain_len: usize,
    ) -> GsnResult<Array2<f32>> {
        let (first, second) = match order {
            SweepOrder::OddThenEven => (1, 0),
            SweepOrder::EvenThenOdd => (0, 1),
        };
        let mut prediction = None;
        for start in [first, second] {
            for i in (start..stack.len()).step_by(2) {
                if let Some(p) =
                    self.update_layer(stack, i, add_noise, rng, tape.as_deref_mut(), chain_len)?
                {
                    prediction = Some(p);
                }
            }
        }
        prediction.ok_or_else(|| GsnError::ShapeMismatch("sweep skipped the visible layer".into()))
    }

    fn run_sweeps<R: Rng + ?Sized>(
        &self,
        mut stack: LayerStack,
        sweeps: usize,
        order: SweepOrder,
        add_noise: bool,
        rng: &mut R,
        mut tape: Option<&mut Tape>,
    ) -> GsnResult<WalkbackOutput> {
        let mut chain = Vec::with_capacity(sweeps);
        for step in 0..sweeps {
            let p = self.sweep(&mut stack, order, add_noise, rng, tape.as_deref_mut(), chain.len())?;
            debug!(step, ?order, "sweep");
            chain.push(p);
        }
        Ok(WalkbackOutput { chain, stack })
    }

    /// Run the training chain for a clean batch `x`.
    ///
    /// The visible layer starts at `x` (corrupted when `add_noise` is set), hidden
    /// layers start at zero, and `walkbacks` odd-then-even sweeps follow.
    ///
    /// # Errors
    /// - `InvalidConfig` if `walkbacks == 0`
    /// - `ShapeMismatch` if `x` does not match the visible width
    pub fn build_training_chain<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        walkbacks: usize,
        add_noise: bool,
        rng: &mut R,
        tape: Option<&mut Tape>,
    ) -> GsnResult<WalkbackOutput> {
        if walkbacks == 0 {
            return Err(GsnError::InvalidConfig(
                "walkbacks must be at least 1".to_string(),
            ));
        }
        self.check_input(x)?;

        let x_init = if add_noise {
            self.noise_input(x, rng)
        } else {
            x.clone()
        };
        let mut stack = vec![x_init];
        stack.extend(self.zero_hiddens(x.nrows()));

        self.run_sweeps(stack, walkbacks, SweepOrder::OddThenEven, add_noise, rng, tape)
    }

    /// Advance an externally supplied stack by one odd-then-even sweep.
    ///
    /// Returns the updated stack and the single visible prediction it emitted.
    pub fn build_sampling_step<R: Rng + ?Sized>(
        &self,
        stack: LayerStack,
        add_noise: bool,
        rng: &mut R,
    ) -> GsnResult<(LayerStack, Array2<f32>)> {
        self.check_stack(&stack)?;
        let mut out = self.run_sweeps(stack, 1, SweepOrder::OddThenEven, add_noise, rng, None)?;
        let prediction = out
            .chain
            .pop()
            .ok_or_else(|| GsnError::ShapeMismatch("sampling step emitted nothing".into()))?;
        Ok((out.stack, prediction))
    }

    /// Run `walkbacks` even-then-odd sweeps from a supplied stack.
    ///
    /// Used when hidden states come from outside the network (for example a
    /// recurrent controller), so the visible layer is rebuilt first.
    pub fn build_chain_given_hiddens<R: Rng + ?Sized>(
        &self,
        stack: LayerStack,
        walkbacks: usize,
        add_noise: bool,
        rng: &mut R,
    ) -> GsnResult<WalkbackOutput> {
        if walkbacks == 0 {
            return Err(GsnError::InvalidConfig(
                "walkbacks must be at least 1".to_string(),
            ));
        }
        self.check_stack(&stack)?;
        self.run_sweeps(stack, walkbacks, SweepOrder::EvenThenOdd, add_noise, rng, None)
    }

    /// Visible expectation given a visible batch and hidden states.
    ///
    /// The visible layer is corrupted, `walkbacks` odd-then-even noisy sweeps
    /// run, and the last prediction is returned.
    pub fn px_given_h<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        hiddens: Vec<Array2<f32>>,
        walkbacks: usize,
        rng: &mut R,
    ) -> GsnResult<Array2<f32>> {
        if walkbacks == 0 {
            return Err(GsnError::InvalidConfig(
                "walkbacks must be at least 1".to_string(),
            ));
        }
        self.check_input(x)?;
        let mut stack = vec![self.noise_input(x, rng)];
        stack.extend(hiddens);
        self.check_stack(&stack)?;
        let mut out = self.run_sweeps(stack, walkbacks, SweepOrder::OddThenEven, true, rng, None)?;
        out.chain
            .pop()
            .ok_or_else(|| GsnError::ShapeMismatch("empty chain".into()))
    }

    /// Noise-free reconstruction: run the deterministic chain and score the
    /// final prediction against `x`.
    ///
    /// Visible corruption still follows the model's noise settings; set
    /// `salt_and_pepper` to zero and disable `input_sampling` for a fully
    /// deterministic pass.
    pub fn reconstruct<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        rng: &mut R,
    ) -> GsnResult<(f32, Array2<f32>)> {
        let mut out = self.build_training_chain(x, self.walkbacks, false, rng, None)?;
        let prediction = out
            .chain
            .pop()
            .ok_or_else(|| GsnError::ShapeMismatch("empty chain".into()))?;
        Ok((self.cost.cost(&prediction, x), prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoiseConfig, SigmoidActivation, TanhActivation};
    use crate::cost::BinaryCrossEntropy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_gsn(layer_sizes: Vec<usize>) -> Gsn {
        let mut rng = StdRng::seed_from_u64(11);
        Gsn::new(
            layer_sizes,
            Box::new(SigmoidActivation),
            Box::new(TanhActivation),
            Box::new(BinaryCrossEntropy),
            NoiseConfig::noiseless(),
            2,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn test_sweep_orders_visit_visible_once() {
        let gsn = make_gsn(vec![4, 3, 3, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        for order in [SweepOrder::OddThenEven, SweepOrder::EvenThenOdd] {
            let mut stack = vec![Array2::zeros((2, 4))];
            stack.extend(gsn.zero_hiddens(2));
            let mut tape = Tape::default();
            gsn.sweep(&mut stack, order, false, &mut rng, Some(&mut tape), 0)
                .unwrap();
            let visited: Vec<usize> = tape.records.iter().map(|r| r.layer).collect();
            match order {
                SweepOrder::OddThenEven => assert_eq!(visited, vec![1, 3, 0, 2]),
                SweepOrder::EvenThenOdd => assert_eq!(visited, vec![0, 2, 1, 3]),
            }
        }
    }

    #[test]
    fn test_tape_records_neighbours() {
        let gsn = make_gsn(vec![4, 3, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        let x = Array2::from_elem((2, 4), 1.0);
        let mut tape = Tape::default();
        let out = gsn
            .build_training_chain(&x, 2, false, &mut rng, Some(&mut tape))
            .unwrap();
        assert_eq!(out.chain.len(), 2);
        // 2 sweeps × 3 layers
        assert_eq!(tape.records.len(), 6);
        let first = &tape.records[0];
        assert_eq!(first.layer, 1);
        assert_eq!(first.below.as_ref().unwrap(), &x);
        assert!(first.above.as_ref().unwrap().iter().all(|&v| v == 0.0));
        let top = &tape.records[2];
        assert_eq!(top.layer, 2);
        assert!(top.above.is_none());
        assert_eq!(tape.records[1].layer, 0);
        let visible = tape.records[1].visible.as_ref().unwrap();
        assert_eq!(visible.chain_index, 0);
        assert!(visible.keep.is_some());
    }

    #[test]
    fn test_check_stack_rejects_bad_widths() {
        let gsn = make_gsn(vec![4, 3]);
        let mut rng = StdRng::seed_from_u64(0);
        let stack = vec![Array2::zeros((2, 4)), Array2::zeros((2, 5))];
        assert!(matches!(
            gsn.build_sampling_step(stack, false, &mut rng),
            Err(GsnError::ShapeMismatch(_))
        ));
    }
}
