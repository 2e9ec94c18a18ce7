//! Training loop: momentum SGD on the summed walkback cost, annealing, and
//! patience-based early stopping.
//!
//! ## Epoch Schedule
//!
//! ```text
//! for each epoch:
//!     train over every full batch          (momentum update per batch)
//!     evaluate on valid / test if present  (no update)
//!     monitor = valid cost, or train cost without a validation set
//!     if monitor < best * threshold: best = monitor, patience = 0, snapshot params
//!     else: patience += 1
//!     stop when epoch >= n_epoch or patience >= early_stop_length
//!     lr *= annealing; salt_and_pepper *= noise_annealing
//!     report the epoch (the model now carries next epoch's noise level)
//! on stop: restore the best snapshot
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointData;
use crate::config::GsnConfig;
use crate::core::walkback::Tape;
use crate::core::{Gsn, GsnError, GsnResult, Params};
use crate::cost::{chain_cost, ChainCost};
use crate::data::{batches, Dataset};
use crate::sampling::SampleOutput;

/// Why [`Trainer::fit`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxEpochs,
    EarlyStopped,
    NonFiniteCost,
    Cancelled,
}

/// Per-epoch figures handed to the epoch callback.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean last-step cost over training batches
    pub train_cost: f32,
    pub valid_cost: Option<f32>,
    pub test_cost: Option<f32>,
    /// Learning rate used during this epoch
    pub learning_rate: f32,
    /// Annealed rate the next epoch will use; this is what a checkpoint stores
    pub next_learning_rate: f32,
    /// Corruption level used during this epoch
    pub salt_and_pepper: f32,
    pub patience: usize,
    pub improved: bool,
    /// Periodic save point or final epoch
    pub save_due: bool,
    /// Set on the last epoch of the run
    pub stopping: Option<StopReason>,
    pub elapsed: Duration,
}

/// Outcome of a full training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub best_cost: f32,
    pub reason: StopReason,
    pub elapsed: Duration,
}

/// Mutable optimizer state carried across steps and epochs.
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub learning_rate: f32,
    /// Momentum buffer, same layout as the parameters
    pub velocity: Params,
    pub epoch: usize,
    pub best_cost: f32,
    pub patience: usize,
    pub best_params: Option<Params>,
}

impl TrainingState {
    pub fn new(model: &Gsn, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            velocity: Params::zeros(&model.layer_sizes),
            epoch: 0,
            best_cost: f32::INFINITY,
            patience: 0,
            best_params: None,
        }
    }
}

/// Owns a model, its optimizer state, and the random source for a run.
pub struct Trainer {
    model: Gsn,
    config: GsnConfig,
    state: TrainingState,
    rng: StdRng,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    /// Trainer seeded from `config.seed`.
    pub fn new(model: Gsn, config: GsnConfig) -> GsnResult<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(model, config, rng)
    }

    pub fn with_rng(model: Gsn, config: GsnConfig, rng: StdRng) -> GsnResult<Self> {
        config.validate()?;
        let state = TrainingState::new(&model, config.learning_rate);
        Ok(Self {
            model,
            config,
            state,
            rng,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Continue a run from a checkpoint written by an earlier run.
    ///
    /// The epoch counter and learning rate pick up where the checkpoint left
    /// off; `model` should come from the same checkpoint so its corruption
    /// level matches. Momentum and early-stopping bookkeeping start fresh.
    pub fn resume(model: Gsn, config: GsnConfig, checkpoint: &CheckpointData) -> GsnResult<Self> {
        let mut trainer = Self::new(model, config)?;
        trainer.state.epoch = checkpoint.epoch;
        trainer.state.learning_rate = checkpoint.learning_rate;
        info!(
            epoch = checkpoint.epoch,
            learning_rate = checkpoint.learning_rate,
            salt_and_pepper = trainer.model.noise.salt_and_pepper,
            "resuming training"
        );
        Ok(trainer)
    }

    pub fn model(&self) -> &Gsn {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Gsn {
        &mut self.model
    }

    pub fn into_model(self) -> Gsn {
        self.model
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn config(&self) -> &GsnConfig {
        &self.config
    }

    /// Flag checked between epochs; setting it ends [`Trainer::fit`] with
    /// [`StopReason::Cancelled`] after restoring the best parameters.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One momentum update on a single batch.
    ///
    /// Returns the chain costs computed before the update. A non-finite total
    /// leaves the parameters untouched.
    pub fn train_step(&mut self, batch: &Array2<f32>) -> GsnResult<ChainCost> {
        let mut tape = Tape::default();
        let out = self.model.build_training_chain(
            batch,
            self.model.walkbacks,
            self.model.noise.add_noise,
            &mut self.rng,
            Some(&mut tape),
        )?;
        let costs = chain_cost(self.model.cost.as_ref(), &out.chain, batch)?;
        if !costs.total.is_finite() {
            warn!(
                total = costs.total,
                max_abs_param = self.model.params().max_abs(),
                "non-finite chain cost, skipping update"
            );
            return Ok(costs);
        }

        let grads = self.model.chain_gradients(&tape, &out.chain, batch)?;
        self.apply_update(&grads);
        debug!(total = costs.total, last = costs.last, "train step");
        Ok(costs)
    }

    /// `v = m·v + (1 - m)·g; p -= lr·v`
    fn apply_update(&mut self, grads: &Params) {
        let m = self.config.momentum;
        let lr = self.state.learning_rate;
        let velocity = &mut self.state.velocity;

        for ((w, v), g) in self
            .model
            .weights
            .iter_mut()
            .zip(velocity.weights.iter_mut())
            .zip(&grads.weights)
        {
            v.zip_mut_with(g, |v, &g| *v = m * *v + (1.0 - m) * g);
            w.scaled_add(-lr, &*v);
        }
        for ((b, v), g) in self
            .model
            .biases
            .iter_mut()
            .zip(velocity.biases.iter_mut())
            .zip(&grads.biases)
        {
            v.zip_mut_with(g, |v, &g| *v = m * *v + (1.0 - m) * g);
            b.scaled_add(-lr, &*v);
        }
    }

    /// Train over every full batch of `data`, returning the mean last-step cost.
    pub fn train_epoch(&mut self, data: &Array2<f32>) -> GsnResult<f32> {
        let views = batches(data, self.config.batch_size);
        if views.is_empty() {
            return Err(GsnError::ShapeMismatch("no training batches".to_string()));
        }
        let mut total = 0.0;
        for view in &views {
            total += self.train_step(&view.to_owned())?.last;
        }
        Ok(total / views.len() as f32)
    }

    /// Mean last-step chain cost over `data`, without updating parameters.
    pub fn evaluate(&mut self, data: &Array2<f32>) -> GsnResult<f32> {
        let views = batches(data, self.config.batch_size);
        if views.is_empty() {
            return Err(GsnError::ShapeMismatch("no evaluation batches".to_string()));
        }
        let mut total = 0.0;
        for view in &views {
            let batch = view.to_owned();
            let out = self.model.build_training_chain(
                &batch,
                self.model.walkbacks,
                self.model.noise.add_noise,
                &mut self.rng,
                None,
            )?;
            total += chain_cost(self.model.cost.as_ref(), &out.chain, &batch)?.last;
        }
        Ok(total / views.len() as f32)
    }

    /// Noise-free reconstruction of a batch: `(cost, final prediction)`.
    pub fn reconstruct(&mut self, batch: &Array2<f32>) -> GsnResult<(f32, Array2<f32>)> {
        self.model.reconstruct(batch, &mut self.rng)
    }

    /// Draw `count` visible samples starting from `seed`.
    pub fn sample(&mut self, seed: &Array2<f32>, count: usize, k: usize) -> GsnResult<SampleOutput> {
        self.model.sample(seed, count, k, &mut self.rng)
    }

    /// Run epochs until a stop condition, calling `on_epoch` after each one.
    ///
    /// The callback sees the model as it stands after the epoch (restored to
    /// the best snapshot on the final epoch) with its corruption level already
    /// annealed, so a checkpoint written whenever `report.save_due` is set,
    /// together with `report.next_learning_rate`, resumes at the next epoch.
    pub fn fit<F>(&mut self, dataset: &Dataset, mut on_epoch: F) -> GsnResult<TrainingSummary>
    where
        F: FnMut(&EpochReport, &Gsn) -> GsnResult<()>,
    {
        self.model.check_input(&dataset.train)?;
        let run_start = Instant::now();
        info!(
            layer_sizes = ?self.model.layer_sizes,
            walkbacks = self.model.walkbacks,
            parameters = self.model.params().num_values(),
            train_rows = dataset.train.nrows(),
            "starting training"
        );

        let reason = loop {
            if self.stop.load(Ordering::Relaxed) {
                info!(epoch = self.state.epoch, "training cancelled");
                self.restore_best();
                break StopReason::Cancelled;
            }

            let epoch_start = Instant::now();
            self.state.epoch += 1;
            let epoch = self.state.epoch;

            let train_cost = self.train_epoch(&dataset.train)?;
            let valid_cost = match &dataset.valid {
                Some(valid) => Some(self.evaluate(valid)?),
                None => None,
            };
            let test_cost = match &dataset.test {
                Some(test) => Some(self.evaluate(test)?),
                None => None,
            };
            let monitor = valid_cost.unwrap_or(train_cost);

            let mut stopping = None;
            let mut improved = false;
            if !monitor.is_finite() || !train_cost.is_finite() {
                error!(
                    epoch,
                    train_cost,
                    ?valid_cost,
                    max_abs_param = self.model.params().max_abs(),
                    "non-finite cost, stopping"
                );
                stopping = Some(StopReason::NonFiniteCost);
            } else if monitor < self.state.best_cost * self.config.early_stop_threshold {
                self.state.best_cost = monitor;
                self.state.patience = 0;
                self.state.best_params = Some(self.model.params());
                improved = true;
            } else {
                self.state.patience += 1;
            }

            if stopping.is_none() {
                if epoch >= self.config.n_epoch {
                    stopping = Some(StopReason::MaxEpochs);
                } else if self.state.patience >= self.config.early_stop_length {
                    stopping = Some(StopReason::EarlyStopped);
                }
            }
            if stopping.is_some() {
                self.restore_best();
            }

            let report = EpochReport {
                epoch,
                train_cost,
                valid_cost,
                test_cost,
                learning_rate: self.state.learning_rate,
                next_learning_rate: self.state.learning_rate * self.config.annealing,
                salt_and_pepper: self.model.noise.salt_and_pepper,
                patience: self.state.patience,
                improved,
                save_due: epoch % self.config.save_frequency == 0 || stopping.is_some(),
                stopping,
                elapsed: epoch_start.elapsed(),
            };
            info!(
                epoch,
                train_cost,
                ?valid_cost,
                ?test_cost,
                lr = report.learning_rate,
                patience = report.patience,
                "epoch complete"
            );

            self.state.learning_rate = report.next_learning_rate;
            self.model.noise.salt_and_pepper =
                (self.model.noise.salt_and_pepper * self.config.noise_annealing).clamp(0.0, 1.0);
            on_epoch(&report, &self.model)?;

            if let Some(reason) = stopping {
                break reason;
            }
        };

        let summary = TrainingSummary {
            epochs: self.state.epoch,
            best_cost: self.state.best_cost,
            reason,
            elapsed: run_start.elapsed(),
        };
        info!(
            epochs = summary.epochs,
            best_cost = summary.best_cost,
            reason = ?summary.reason,
            "training finished"
        );
        Ok(summary)
    }

    fn restore_best(&mut self) {
        if let Some(best) = self.state.best_params.clone() {
            if let Err(e) = self.model.set_params(best) {
                error!("could not restore best parameters: {e}");
            }
        }
    }
}
