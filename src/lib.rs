//! # GSN (Generative Stochastic Networks)
//!
//! Multi-layer denoising networks trained by unrolling a noisy Markov chain
//! ("walkback") over a stack of tied-weight layers.
//!
//! ## Overview
//!
//! Each training step corrupts a clean batch, then alternately recomputes odd
//! and even layers from their neighbours, injecting noise as it goes. Every
//! time the visible layer is recomputed its reconstruction is scored against
//! the clean input; the summed cost drives a momentum SGD update. A trained
//! network doubles as a generative transition operator: repeatedly applying
//! the same sweep from a seed produces a chain of samples.
//!
//! ## Structure
//!
//! - [`core`]: Parameters, activations, noise, walkback engine and its gradient
//! - [`cost`]: Reconstruction costs and chain cost accumulation
//! - [`config`]: Serializable model/training configuration
//! - [`training`]: Trainer, early stopping, annealing
//! - [`sampling`]: Iterative sample generation
//! - [`likelihood`]: Parzen-window log-likelihood estimates
//! - [`checkpoint`]: JSON checkpoints
//! - [`data`]: Datasets, batching, matrix files
//! - [`utils`]: Math and formatting helpers

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod cost;
pub mod data;
pub mod likelihood;
pub mod sampling;
pub mod training;
pub mod utils;

pub use crate::config::GsnConfig;
pub use crate::core::walkback::{LayerStack, SweepOrder, WalkbackOutput};
pub use crate::core::{
    activation_from_name, Activation, Corruption, Gsn, GsnError, GsnResult, NoiseConfig, Params,
};
pub use crate::cost::{chain_cost, cost_from_name, ChainCost, CostFunction};
pub use crate::data::Dataset;
pub use crate::sampling::SampleOutput;
pub use crate::training::{EpochReport, StopReason, Trainer, TrainingSummary};
