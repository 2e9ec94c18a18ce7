//! Checkpoint save/load for GSN models.
//!
//! Serializes layer sizes, parameters, and the current noise/optimizer levels
//! to JSON. Activation and cost functions are stored by name and resolved
//! again on load.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::{activation_from_name, Gsn, GsnError, GsnResult, NoiseConfig, Params};
use crate::cost::cost_from_name;

/// Serializable checkpoint data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Layer widths, visible first.
    pub layer_sizes: Vec<usize>,
    pub visible_activation: String,
    pub hidden_activation: String,
    pub cost_function: String,
    pub walkbacks: usize,
    /// Weight matrices as nested rows.
    pub weights: Vec<Vec<Vec<f32>>>,
    pub biases: Vec<Vec<f32>>,
    /// Epoch at which this checkpoint was saved.
    pub epoch: usize,
    /// Monitored cost at checkpoint time.
    pub cost: f32,
    pub learning_rate: f32,
    /// Noise levels at checkpoint time, including the annealed corruption level.
    pub noise: NoiseConfig,
}

fn array2_to_vecs(arr: &Array2<f32>) -> Vec<Vec<f32>> {
    arr.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn vecs_to_array2(vecs: &[Vec<f32>]) -> GsnResult<Array2<f32>> {
    let nrows = vecs.len();
    let ncols = vecs.first().map_or(0, Vec::len);
    if vecs.iter().any(|row| row.len() != ncols) {
        return Err(GsnError::Checkpoint("ragged weight matrix".to_string()));
    }
    let flat: Vec<f32> = vecs.iter().flat_map(|r| r.iter().copied()).collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| GsnError::Checkpoint(format!("Failed to reconstruct weight matrix: {e}")))
}

impl CheckpointData {
    fn params(&self) -> GsnResult<Params> {
        Ok(Params {
            weights: self
                .weights
                .iter()
                .map(|w| vecs_to_array2(w))
                .collect::<GsnResult<_>>()?,
            biases: self.biases.iter().map(|b| Array1::from(b.clone())).collect(),
        })
    }
}

/// Save a GSN checkpoint to a JSON file, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the data cannot be serialized.
pub fn save_checkpoint(
    gsn: &Gsn,
    path: &Path,
    epoch: usize,
    cost: f32,
    learning_rate: f32,
) -> GsnResult<()> {
    let data = CheckpointData {
        layer_sizes: gsn.layer_sizes.clone(),
        visible_activation: gsn.visible_activation.name().to_string(),
        hidden_activation: gsn.hidden_activation.name().to_string(),
        cost_function: gsn.cost.name().to_string(),
        walkbacks: gsn.walkbacks,
        weights: gsn.weights.iter().map(array2_to_vecs).collect(),
        biases: gsn.biases.iter().map(|b| b.to_vec()).collect(),
        epoch,
        cost,
        learning_rate,
        noise: gsn.noise,
    };

    let json = serde_json::to_string_pretty(&data)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    tracing::debug!(path = %path.display(), epoch, "checkpoint written");
    Ok(())
}

fn read_checkpoint(path: &Path) -> GsnResult<CheckpointData> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        GsnError::Checkpoint(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&json)
        .map_err(|e| GsnError::Checkpoint(format!("Failed to parse {}: {e}", path.display())))
}

/// Load a GSN checkpoint, rebuilding the model it describes.
///
/// # Errors
///
/// - `Checkpoint` if the file cannot be read or parsed, its parameters
///   disagree with its own layer sizes, or its noise levels or learning rate
///   are out of range
/// - `InvalidConfig` for an unknown activation or cost name
pub fn load_checkpoint(path: &Path) -> GsnResult<(CheckpointData, Gsn)> {
    let data = read_checkpoint(path)?;
    if data.layer_sizes.len() < 2 || data.walkbacks == 0 {
        return Err(GsnError::Checkpoint(format!(
            "invalid topology {:?} with {} walkbacks",
            data.layer_sizes, data.walkbacks
        )));
    }
    data.noise
        .validate()
        .map_err(|e| GsnError::Checkpoint(format!("{}: {e}", path.display())))?;
    if !(data.learning_rate >= 0.0 && data.learning_rate.is_finite()) {
        return Err(GsnError::Checkpoint(format!(
            "invalid learning rate {} in {}",
            data.learning_rate,
            path.display()
        )));
    }

    let mut gsn = Gsn {
        layer_sizes: data.layer_sizes.clone(),
        weights: Params::zeros(&data.layer_sizes).weights,
        biases: Params::zeros(&data.layer_sizes).biases,
        visible_activation: activation_from_name(&data.visible_activation)?,
        hidden_activation: activation_from_name(&data.hidden_activation)?,
        cost: cost_from_name(&data.cost_function)?,
        noise: data.noise,
        walkbacks: data.walkbacks,
    };
    gsn.set_params(data.params()?)?;

    Ok((data, gsn))
}

/// Load parameters from a checkpoint into an existing model.
///
/// The model keeps its own activations and noise settings.
///
/// # Errors
///
/// - `Checkpoint` on unreadable files or any parameter count/shape mismatch
pub fn load_params_into(gsn: &mut Gsn, path: &Path) -> GsnResult<CheckpointData> {
    let data = read_checkpoint(path)?;
    if data.layer_sizes != gsn.layer_sizes {
        return Err(GsnError::Checkpoint(format!(
            "checkpoint layer sizes {:?} differ from model {:?}",
            data.layer_sizes, gsn.layer_sizes
        )));
    }
    gsn.set_params(data.params()?)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoiseConfig, SigmoidActivation, TanhActivation};
    use crate::cost::BinaryCrossEntropy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn make_test_gsn(layer_sizes: Vec<usize>) -> Gsn {
        let mut rng = StdRng::seed_from_u64(4);
        Gsn::new(
            layer_sizes,
            Box::new(SigmoidActivation),
            Box::new(TanhActivation),
            Box::new(BinaryCrossEntropy),
            NoiseConfig::default(),
            3,
            &mut rng,
        )
        .expect("valid topology")
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let gsn = make_test_gsn(vec![4, 3, 2]);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ckpt.json");

        save_checkpoint(&gsn, &path, 5, 0.42, 0.1).expect("save");
        let (data, loaded) = load_checkpoint(&path).expect("load");

        assert_eq!(data.epoch, 5);
        assert_eq!(data.layer_sizes, vec![4, 3, 2]);
        assert_eq!(data.hidden_activation, "tanh");
        assert_eq!(loaded.walkbacks, 3);
        assert_eq!(loaded.noise, gsn.noise);
        assert_eq!(loaded.params(), gsn.params());
    }

    #[test]
    fn test_checkpoint_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deep").join("path").join("ckpt.json");
        save_checkpoint(&make_test_gsn(vec![3, 2]), &path, 0, 0.0, 0.0).expect("save");
        assert!(path.exists());
    }

    #[test]
    fn test_load_params_into_rejects_other_topology() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ckpt.json");
        save_checkpoint(&make_test_gsn(vec![4, 3]), &path, 1, 1.0, 0.1).expect("save");

        let mut other = make_test_gsn(vec![4, 5]);
        assert!(matches!(
            load_params_into(&mut other, &path),
            Err(GsnError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_noise_levels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ckpt.json");
        save_checkpoint(&make_test_gsn(vec![4, 3]), &path, 1, 1.0, 0.1).expect("save");

        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        json["noise"]["hidden_sigma"] = serde_json::json!(-1.0);
        std::fs::write(&path, json.to_string()).expect("write");
        assert!(matches!(load_checkpoint(&path), Err(GsnError::Checkpoint(_))));

        json["noise"]["hidden_sigma"] = serde_json::json!(2.0);
        json["noise"]["salt_and_pepper"] = serde_json::json!(3.0);
        std::fs::write(&path, json.to_string()).expect("write");
        assert!(matches!(load_checkpoint(&path), Err(GsnError::Checkpoint(_))));
    }

    #[test]
    fn test_load_nonexistent_checkpoint() {
        let result = load_checkpoint(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(GsnError::Checkpoint(_))));
    }

    #[test]
    fn test_vecs_to_array2_ragged() {
        let result = vecs_to_array2(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(result.is_err());
    }
}
