//! Core GSN structures: model parameters, activations, and error types.
//!
//! This module provides the fundamental pieces every other part of the crate
//! builds on:
//! - Tied-weight parameter set (`W_i` shared between the up and down direction)
//! - Named activation registry resolved once at construction
//! - The walkback engine ([`walkback`]) and its reverse-mode gradient pass ([`backprop`])
//! - Noise injection ([`noise`])
//!
//! ## Layer Topology
//!
//! ```text
//! h_0 (visible) <-W_0-> h_1 <-W_1-> h_2 ... <-W_{L-1}-> h_L
//! ```
//!
//! `W_i` has shape `(d_i, d_{i+1})`. Bottom-up flow into layer `i+1` uses `h_i · W_i`,
//! top-down flow into layer `i` uses `h_{i+1} · W_i^T`.

pub mod backprop;
pub mod noise;
pub mod walkback;

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;
use thiserror::Error;

use crate::config::GsnConfig;
use crate::cost::{cost_from_name, CostFunction};
use crate::utils::logit;
pub use noise::{Corruption, NoiseConfig};

/// Error type for GSN operations.
///
/// Configuration, checkpoint, and runtime-shape failures are kept apart so callers
/// can tell a bad config from a bad checkpoint from a bad input batch.
#[derive(Debug, Error)]
pub enum GsnError {
    /// Invalid or incomplete model/training configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Checkpoint unreadable or inconsistent with the layer configuration
    #[error("Bad checkpoint: {0}")]
    Checkpoint(String),
    /// Runtime input whose shape disagrees with the network
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type GsnResult<T> = Result<T, GsnError>;

/// Activation function trait for layer nonlinearities.
///
/// Implementations provide both the activation and its derivative so the
/// gradient pass can differentiate through every layer update.
pub trait Activation: Send + Sync {
    /// Apply activation to a matrix (elementwise): f(X)
    fn apply_matrix(&self, x: &Array2<f32>) -> Array2<f32>;

    /// Derivative of activation at the pre-activation values (elementwise): f'(X)
    fn derivative_matrix(&self, x: &Array2<f32>) -> Array2<f32>;

    /// Registry name, also used to rebuild the activation from a checkpoint
    fn name(&self) -> &'static str;

    fn box_clone(&self) -> Box<dyn Activation>;
}

/// Logistic sigmoid: f(x) = 1 / (1 + e^-x), f'(x) = f(x)(1 - f(x))
///
/// Default visible activation for binary data.
#[derive(Debug, Clone, Copy)]
pub struct SigmoidActivation;

impl Activation for SigmoidActivation {
    fn apply_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(crate::utils::sigmoid)
    }

    fn derivative_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(|v| {
            let s = crate::utils::sigmoid(v);
            s * (1.0 - s)
        })
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn box_clone(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Tanh activation: f(x) = tanh(x), f'(x) = 1 - tanh²(x)
///
/// Default hidden activation.
#[derive(Debug, Clone, Copy)]
pub struct TanhActivation;

impl Activation for TanhActivation {
    fn apply_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(f32::tanh)
    }

    fn derivative_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(|v| {
            let t = v.tanh();
            1.0 - t * t
        })
    }

    fn name(&self) -> &'static str {
        "tanh"
    }

    fn box_clone(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Identity activation: f(x) = x, f'(x) = 1
#[derive(Debug, Clone, Copy)]
pub struct IdentityActivation;

impl Activation for IdentityActivation {
    fn apply_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.clone()
    }

    fn derivative_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        Array2::ones(x.dim())
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn box_clone(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Rectifier: f(x) = max(0, x), f'(x) = 1 if x > 0 else 0
#[derive(Debug, Clone, Copy)]
pub struct RectifierActivation;

impl Activation for RectifierActivation {
    fn apply_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(|v| v.max(0.0))
    }

    fn derivative_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    fn name(&self) -> &'static str {
        "rectifier"
    }

    fn box_clone(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Resolve an activation function from its registry name.
pub fn activation_from_name(name: &str) -> GsnResult<Box<dyn Activation>> {
    match name.to_ascii_lowercase().as_str() {
        "sigmoid" => Ok(Box::new(SigmoidActivation)),
        "tanh" => Ok(Box::new(TanhActivation)),
        "identity" | "linear" => Ok(Box::new(IdentityActivation)),
        "rectifier" | "relu" => Ok(Box::new(RectifierActivation)),
        _ => Err(GsnError::InvalidConfig(format!(
            "Unknown activation function: {name}"
        ))),
    }
}

/// Ordered parameter list: all weight matrices followed by all bias vectors.
///
/// The same shape doubles as the gradient container and the momentum buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub weights: Vec<Array2<f32>>,
    pub biases: Vec<Array1<f32>>,
}

impl Params {
    /// All-zero parameter set shaped for `layer_sizes`.
    pub fn zeros(layer_sizes: &[usize]) -> Self {
        Self {
            weights: layer_sizes
                .windows(2)
                .map(|pair| Array2::zeros((pair[0], pair[1])))
                .collect(),
            biases: layer_sizes.iter().map(|&n| Array1::zeros(n)).collect(),
        }
    }

    /// Total number of scalar values across every tensor.
    pub fn num_values(&self) -> usize {
        self.weights.iter().map(Array2::len).sum::<usize>()
            + self.biases.iter().map(Array1::len).sum::<usize>()
    }

    /// Largest absolute value across every tensor; NaN if any value is NaN.
    pub fn max_abs(&self) -> f32 {
        self.weights
            .iter()
            .flat_map(|w| w.iter())
            .chain(self.biases.iter().flat_map(|b| b.iter()))
            .fold(0.0f32, |m, &v| {
                if m.is_nan() || v.is_nan() {
                    f32::NAN
                } else {
                    m.max(v.abs())
                }
            })
    }
}

/// A Generative Stochastic Network with tied weights.
///
/// # Architecture
///
/// - **Layers:** indexed 0 (visible) to L (top hidden layer)
/// - **Weights:** `weights[i]` connects layer `i` and `i+1`, shape `(d_i, d_{i+1})`
/// - **Biases:** `biases[i]` has shape `(d_i)`, one per layer including the visible one
///
/// # Weight Initialization
///
/// Weights are drawn from `U(-limit, limit)` with `limit = sqrt(6 / (fan_in + fan_out))`,
/// biases start at zero.
pub struct Gsn {
    /// Layer widths: [d0 (visible), d1, ..., dL]
    pub layer_sizes: Vec<usize>,
    pub weights: Vec<Array2<f32>>,
    pub biases: Vec<Array1<f32>>,
    pub visible_activation: Box<dyn Activation>,
    pub hidden_activation: Box<dyn Activation>,
    /// Per-step reconstruction cost
    pub cost: Box<dyn CostFunction>,
    /// Current noise levels (the trainer anneals `salt_and_pepper` in place)
    pub noise: NoiseConfig,
    /// Number of walkback sweeps per training chain
    pub walkbacks: usize,
}

impl Clone for Gsn {
    fn clone(&self) -> Self {
        Self {
            layer_sizes: self.layer_sizes.clone(),
            weights: self.weights.clone(),
            biases: self.biases.clone(),
            visible_activation: self.visible_activation.box_clone(),
            hidden_activation: self.hidden_activation.box_clone(),
            cost: self.cost.box_clone(),
            noise: self.noise,
            walkbacks: self.walkbacks,
        }
    }
}

impl std::fmt::Debug for Gsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gsn")
            .field("layer_sizes", &self.layer_sizes)
            .field("weights", &format!("<{} weight matrices>", self.weights.len()))
            .field("biases", &format!("<{} bias vectors>", self.biases.len()))
            .field("visible_activation", &self.visible_activation.name())
            .field("hidden_activation", &self.hidden_activation.name())
            .field("cost", &self.cost.name())
            .field("noise", &self.noise)
            .field("walkbacks", &self.walkbacks)
            .finish()
    }
}

impl Gsn {
    /// Create a GSN with freshly initialized parameters.
    ///
    /// # Errors
    /// - `InvalidConfig` if there is no hidden layer, any width is zero, or `walkbacks == 0`
    pub fn new<R: Rng + ?Sized>(
        layer_sizes: Vec<usize>,
        visible_activation: Box<dyn Activation>,
        hidden_activation: Box<dyn Activation>,
        cost: Box<dyn CostFunction>,
        noise: NoiseConfig,
        walkbacks: usize,
        rng: &mut R,
    ) -> GsnResult<Self> {
        Self::check_topology(&layer_sizes, walkbacks)?;

        let weights = layer_sizes
            .windows(2)
            .map(|pair| {
                let (n_in, n_out) = (pair[0], pair[1]);
                let limit = (6.0f32 / (n_in + n_out) as f32).sqrt();
                Array2::random_using((n_in, n_out), Uniform::new(-limit, limit), rng)
            })
            .collect();
        let biases = layer_sizes.iter().map(|&n| Array1::zeros(n)).collect();

        Ok(Self {
            layer_sizes,
            weights,
            biases,
            visible_activation,
            hidden_activation,
            cost,
            noise,
            walkbacks,
        })
    }

    /// Build a GSN from a configuration.
    ///
    /// The visible width comes from `data` when given, otherwise from
    /// `config.input_size`. With `vis_init` set and data available, the visible
    /// bias starts at the logit of the per-unit data mean.
    ///
    /// # Errors
    /// - `InvalidConfig` if neither data nor `input_size` supply the visible width,
    ///   or the config fails validation
    pub fn from_config<R: Rng + ?Sized>(
        config: &GsnConfig,
        data: Option<&Array2<f32>>,
        rng: &mut R,
    ) -> GsnResult<Self> {
        config.validate()?;

        let input_size = match (data, config.input_size) {
            (Some(x), _) => x.ncols(),
            (None, Some(n)) => n,
            (None, None) => {
                return Err(GsnError::InvalidConfig(
                    "input_size must be set when no training data is provided".to_string(),
                ))
            }
        };

        let mut layer_sizes = vec![input_size];
        layer_sizes.extend(std::iter::repeat(config.hidden_size).take(config.layers));

        let mut gsn = Self::new(
            layer_sizes,
            activation_from_name(&config.visible_activation)?,
            activation_from_name(&config.hidden_activation)?,
            cost_from_name(&config.cost_function)?,
            config.noise_config(),
            config.walkbacks,
            rng,
        )?;

        if config.vis_init {
            if let Some(x) = data {
                gsn.init_visible_bias(x)?;
            }
        }

        tracing::debug!(layer_sizes = ?gsn.layer_sizes, "constructed GSN");
        Ok(gsn)
    }

    fn check_topology(layer_sizes: &[usize], walkbacks: usize) -> GsnResult<()> {
        if layer_sizes.len() < 2 {
            return Err(GsnError::InvalidConfig(
                "Must have a visible layer and at least one hidden layer".to_string(),
            ));
        }
        if layer_sizes.iter().any(|&n| n == 0) {
            return Err(GsnError::InvalidConfig(format!(
                "Layer widths must be positive, got {layer_sizes:?}"
            )));
        }
        if walkbacks == 0 {
            return Err(GsnError::InvalidConfig(
                "walkbacks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of hidden layers.
    pub fn layers(&self) -> usize {
        self.layer_sizes.len() - 1
    }

    /// Visible (input) dimensionality.
    pub fn input_size(&self) -> usize {
        self.layer_sizes[0]
    }

    /// Set `b_0 = logit(clip(mean(X, axis 0), 0.001, 0.9))`.
    pub fn init_visible_bias(&mut self, data: &Array2<f32>) -> GsnResult<()> {
        self.check_input(data)?;
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| GsnError::ShapeMismatch("empty data for vis_init".to_string()))?;
        self.biases[0] = mean.mapv(|m| logit(m.clamp(0.001, 0.9)));
        Ok(())
    }

    /// Copy of the current parameters, weights first then biases.
    pub fn params(&self) -> Params {
        Params {
            weights: self.weights.clone(),
            biases: self.biases.clone(),
        }
    }

    /// Replace every parameter, refusing any list whose count or shapes disagree.
    ///
    /// # Errors
    /// - `Checkpoint` on a length or shape mismatch; the model is left untouched
    pub fn set_params(&mut self, params: Params) -> GsnResult<()> {
        if params.weights.len() != self.weights.len() || params.biases.len() != self.biases.len() {
            return Err(GsnError::Checkpoint(format!(
                "expected {} weights and {} biases, got {} and {}",
                self.weights.len(),
                self.biases.len(),
                params.weights.len(),
                params.biases.len()
            )));
        }
        for (i, (current, loaded)) in self.weights.iter().zip(&params.weights).enumerate() {
            if current.dim() != loaded.dim() {
                return Err(GsnError::Checkpoint(format!(
                    "W_{i} has shape {:?}, checkpoint has {:?}",
                    current.dim(),
                    loaded.dim()
                )));
            }
        }
        for (i, (current, loaded)) in self.biases.iter().zip(&params.biases).enumerate() {
            if current.len() != loaded.len() {
                return Err(GsnError::Checkpoint(format!(
                    "b_{i} has length {}, checkpoint has {}",
                    current.len(),
                    loaded.len()
                )));
            }
        }
        self.weights = params.weights;
        self.biases = params.biases;
        Ok(())
    }

    /// Reject batches whose width differs from the visible layer.
    pub fn check_input(&self, x: &Array2<f32>) -> GsnResult<()> {
        if x.ncols() != self.input_size() {
            return Err(GsnError::ShapeMismatch(format!(
                "input has {} columns, visible layer has {}",
                x.ncols(),
                self.input_size()
            )));
        }
        Ok(())
    }
}
