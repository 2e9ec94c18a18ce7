//! Reconstruction costs and chain-level cost accumulation.

use ndarray::Array2;

use crate::core::{Activation, GsnError, GsnResult};

/// Probability clamp used by binary cross-entropy.
pub const BCE_EPSILON: f32 = 1e-7;

/// Per-step reconstruction cost between a prediction and the clean input.
pub trait CostFunction: Send + Sync {
    /// Scalar cost, averaged over every element of the batch.
    fn cost(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> f32;

    /// d cost / d prediction.
    fn gradient(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> Array2<f32>;

    /// d cost / d pre-activation for a prediction produced by `activation(pre)`.
    fn output_delta(
        &self,
        activation: &dyn Activation,
        pre: &Array2<f32>,
        prediction: &Array2<f32>,
        target: &Array2<f32>,
    ) -> Array2<f32> {
        self.gradient(prediction, target) * activation.derivative_matrix(pre)
    }

    fn name(&self) -> &'static str;

    fn box_clone(&self) -> Box<dyn CostFunction>;
}

/// `-mean(x ln p + (1 - x) ln(1 - p))` with `p` clamped to `[1e-7, 1 - 1e-7]`.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCrossEntropy;

impl CostFunction for BinaryCrossEntropy {
    fn cost(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> f32 {
        let n = prediction.len().max(1) as f32;
        let total: f32 = prediction
            .iter()
            .zip(target.iter())
            .map(|(&p, &x)| {
                let p = p.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
                -(x * p.ln() + (1.0 - x) * (1.0 - p).ln())
            })
            .sum();
        total / n
    }

    fn gradient(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> Array2<f32> {
        let n = prediction.len().max(1) as f32;
        let mut grad = prediction.clone();
        grad.zip_mut_with(target, |p, &x| {
            let q = p.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
            *p = (q - x) / (q * (1.0 - q)) / n;
        });
        grad
    }

    fn output_delta(
        &self,
        activation: &dyn Activation,
        pre: &Array2<f32>,
        prediction: &Array2<f32>,
        target: &Array2<f32>,
    ) -> Array2<f32> {
        // sigmoid + BCE collapses to (p - x) / N
        if activation.name() == "sigmoid" {
            let n = prediction.len().max(1) as f32;
            return (prediction - target) / n;
        }
        self.gradient(prediction, target) * activation.derivative_matrix(pre)
    }

    fn name(&self) -> &'static str {
        "binary_crossentropy"
    }

    fn box_clone(&self) -> Box<dyn CostFunction> {
        Box::new(*self)
    }
}

/// `mean((p - x)²)`
#[derive(Debug, Clone, Copy)]
pub struct SquaredError;

impl CostFunction for SquaredError {
    fn cost(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> f32 {
        let n = prediction.len().max(1) as f32;
        let diff = prediction - target;
        diff.mapv(|d| d * d).sum() / n
    }

    fn gradient(&self, prediction: &Array2<f32>, target: &Array2<f32>) -> Array2<f32> {
        let n = prediction.len().max(1) as f32;
        (prediction - target) * (2.0 / n)
    }

    fn name(&self) -> &'static str {
        "squared_error"
    }

    fn box_clone(&self) -> Box<dyn CostFunction> {
        Box::new(*self)
    }
}

/// Resolve a cost function from its registry name.
pub fn cost_from_name(name: &str) -> GsnResult<Box<dyn CostFunction>> {
    match name.to_ascii_lowercase().as_str() {
        "binary_crossentropy" | "bce" => Ok(Box::new(BinaryCrossEntropy)),
        "squared_error" | "mse" => Ok(Box::new(SquaredError)),
        _ => Err(GsnError::InvalidConfig(format!(
            "Unknown cost function: {name}"
        ))),
    }
}

/// Costs of every prediction in a walkback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCost {
    /// Cost of each chain step, in chain order
    pub per_step: Vec<f32>,
    /// Sum over all steps (the training objective)
    pub total: f32,
    /// Cost of the final step (the reported figure)
    pub last: f32,
}

/// Score every chain element against the clean input.
///
/// # Errors
/// - `ShapeMismatch` if the chain is empty or a prediction's shape differs from the target
pub fn chain_cost(
    cost: &dyn CostFunction,
    chain: &[Array2<f32>],
    target: &Array2<f32>,
) -> GsnResult<ChainCost> {
    if chain.is_empty() {
        return Err(GsnError::ShapeMismatch("empty walkback chain".to_string()));
    }
    let per_step = chain
        .iter()
        .map(|prediction| {
            if prediction.dim() != target.dim() {
                return Err(GsnError::ShapeMismatch(format!(
                    "prediction {:?} vs target {:?}",
                    prediction.dim(),
                    target.dim()
                )));
            }
            Ok(cost.cost(prediction, target))
        })
        .collect::<GsnResult<Vec<f32>>>()?;

    let total = per_step.iter().sum();
    let last = per_step[per_step.len() - 1];
    Ok(ChainCost {
        per_step,
        total,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SigmoidActivation, TanhActivation};
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_bce_known_value() {
        let p = arr2(&[[0.5, 0.5]]);
        let x = arr2(&[[1.0, 0.0]]);
        assert_abs_diff_eq!(BinaryCrossEntropy.cost(&p, &x), 2.0f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_bce_clamps_extremes() {
        let p = arr2(&[[0.0, 1.0]]);
        let x = arr2(&[[1.0, 0.0]]);
        let c = BinaryCrossEntropy.cost(&p, &x);
        assert!(c.is_finite());
        assert!(c > 10.0);
    }

    #[test]
    fn test_fused_delta_matches_chain_rule() {
        let pre = arr2(&[[0.3, -1.2, 2.0]]);
        let act = SigmoidActivation;
        let p = act.apply_matrix(&pre);
        let x = arr2(&[[1.0, 0.0, 1.0]]);
        let fused = BinaryCrossEntropy.output_delta(&act, &pre, &p, &x);
        let unfused = BinaryCrossEntropy.gradient(&p, &x) * act.derivative_matrix(&pre);
        for (a, b) in fused.iter().zip(unfused.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_unfused_delta_for_other_activation() {
        let pre = arr2(&[[0.1, 0.2]]);
        let act = TanhActivation;
        let p = act.apply_matrix(&pre);
        let x = arr2(&[[0.0, 1.0]]);
        let delta = SquaredError.output_delta(&act, &pre, &p, &x);
        let expected = SquaredError.gradient(&p, &x) * act.derivative_matrix(&pre);
        assert_eq!(delta, expected);
    }

    #[test]
    fn test_chain_cost_sums_steps() {
        let x = arr2(&[[1.0, 0.0]]);
        let chain = vec![arr2(&[[0.9, 0.1]]), arr2(&[[0.6, 0.3]]), arr2(&[[0.7, 0.2]])];
        let summary = chain_cost(&BinaryCrossEntropy, &chain, &x).unwrap();
        let expected: f32 = chain.iter().map(|p| BinaryCrossEntropy.cost(p, &x)).sum();
        assert_abs_diff_eq!(summary.total, expected, epsilon = 1e-6);
        assert_eq!(summary.per_step.len(), 3);
        assert_abs_diff_eq!(summary.last, BinaryCrossEntropy.cost(&chain[2], &x), epsilon = 1e-7);
    }

    #[test]
    fn test_chain_cost_rejects_empty() {
        let x = arr2(&[[1.0]]);
        assert!(chain_cost(&SquaredError, &[], &x).is_err());
    }

    #[test]
    fn test_cost_registry() {
        assert_eq!(cost_from_name("mse").unwrap().name(), "squared_error");
        assert_eq!(
            cost_from_name("binary_crossentropy").unwrap().name(),
            "binary_crossentropy"
        );
        assert!(cost_from_name("hinge").is_err());
    }
}
