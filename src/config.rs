//! Model and training configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{activation_from_name, Corruption, GsnError, GsnResult, NoiseConfig};
use crate::cost::cost_from_name;

/// Full GSN configuration: topology, noise, and optimizer schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GsnConfig {
    /// Visible width; inferred from training data when absent
    pub input_size: Option<usize>,
    /// Number of hidden layers
    pub layers: usize,
    pub hidden_size: usize,
    pub walkbacks: usize,
    pub visible_activation: String,
    pub hidden_activation: String,
    pub cost_function: String,
    /// Initialize the visible bias from the training data mean
    pub vis_init: bool,

    pub add_noise: bool,
    pub noiseless_h1: bool,
    pub hidden_add_noise_sigma: f32,
    pub input_salt_and_pepper: f32,
    pub input_sampling: bool,
    pub input_corruption: Corruption,

    pub learning_rate: f32,
    pub annealing: f32,
    pub momentum: f32,
    pub noise_annealing: f32,
    pub n_epoch: usize,
    pub batch_size: usize,
    pub early_stop_threshold: f32,
    pub early_stop_length: usize,
    pub save_frequency: usize,
    pub seed: u64,
}

impl Default for GsnConfig {
    fn default() -> Self {
        Self {
            input_size: None,
            layers: 3,
            hidden_size: 1500,
            walkbacks: 5,
            visible_activation: "sigmoid".to_string(),
            hidden_activation: "tanh".to_string(),
            cost_function: "binary_crossentropy".to_string(),
            vis_init: false,
            add_noise: true,
            noiseless_h1: true,
            hidden_add_noise_sigma: 2.0,
            input_salt_and_pepper: 0.4,
            input_sampling: true,
            input_corruption: Corruption::Mask,
            learning_rate: 0.25,
            annealing: 0.995,
            momentum: 0.5,
            noise_annealing: 1.0,
            n_epoch: 1000,
            batch_size: 100,
            early_stop_threshold: 0.9995,
            early_stop_length: 30,
            save_frequency: 10,
            seed: 1,
        }
    }
}

impl GsnConfig {
    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> GsnResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GsnConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> GsnResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Noise settings derived from this configuration.
    pub fn noise_config(&self) -> NoiseConfig {
        NoiseConfig {
            add_noise: self.add_noise,
            salt_and_pepper: self.input_salt_and_pepper,
            hidden_sigma: self.hidden_add_noise_sigma,
            noiseless_first_hidden: self.noiseless_h1,
            input_sampling: self.input_sampling,
            corruption: self.input_corruption,
        }
    }

    /// Check ranges and resolve every named function.
    ///
    /// # Errors
    /// - `InvalidConfig` naming the first offending field
    pub fn validate(&self) -> GsnResult<()> {
        let fail = |msg: String| Err(GsnError::InvalidConfig(msg));

        if self.layers == 0 {
            return fail("layers must be at least 1".into());
        }
        if self.hidden_size == 0 {
            return fail("hidden_size must be at least 1".into());
        }
        if self.input_size == Some(0) {
            return fail("input_size must be positive".into());
        }
        if self.walkbacks == 0 {
            return fail("walkbacks must be at least 1".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.input_salt_and_pepper) {
            return fail(format!(
                "input_salt_and_pepper must be in [0, 1], got {}",
                self.input_salt_and_pepper
            ));
        }
        if !self.hidden_add_noise_sigma.is_finite() || self.hidden_add_noise_sigma < 0.0 {
            return fail(format!(
                "hidden_add_noise_sigma must be finite and non-negative, got {}",
                self.hidden_add_noise_sigma
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if self.annealing <= 0.0 || self.noise_annealing <= 0.0 {
            return fail("annealing factors must be positive".into());
        }
        if self.early_stop_length == 0 {
            return fail("early_stop_length must be at least 1".into());
        }
        if self.save_frequency == 0 {
            return fail("save_frequency must be at least 1".into());
        }
        activation_from_name(&self.visible_activation)?;
        activation_from_name(&self.hidden_activation)?;
        cost_from_name(&self.cost_function)?;
        Ok(())
    }
}
