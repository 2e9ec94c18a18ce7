//! Walkback chain behaviour: chain length, sweep order, noise gating, and
//! closed-form checks on tiny networks.

use approx::assert_abs_diff_eq;
use gsn::core::noise::mask_noise;
use gsn::{Gsn, GsnConfig, GsnError};
use ndarray::{arr2, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Deterministic configuration: no corruption, no sampling, no hidden noise.
fn quiet_config(input_size: usize, layers: usize, hidden_size: usize) -> GsnConfig {
    GsnConfig {
        input_size: Some(input_size),
        layers,
        hidden_size,
        walkbacks: 1,
        add_noise: false,
        input_salt_and_pepper: 0.0,
        hidden_add_noise_sigma: 0.0,
        input_sampling: false,
        ..GsnConfig::default()
    }
}

fn build(config: &GsnConfig, seed: u64) -> Gsn {
    let mut rng = StdRng::seed_from_u64(seed);
    Gsn::from_config(config, None, &mut rng).expect("valid config")
}

fn sigmoid(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn tanh(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(f32::tanh)
}

fn assert_close(a: &Array2<f32>, b: &Array2<f32>) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
    }
}

// ============================================================================
// Chain shape
// ============================================================================

/// Every sweep emits one prediction, so the chain has one entry per walkback.
#[test]
fn test_chain_length_equals_walkbacks() {
    for layers in 1..=4 {
        for walkbacks in 1..=5 {
            let config = GsnConfig {
                input_size: Some(6),
                layers,
                hidden_size: 5,
                walkbacks,
                ..GsnConfig::default()
            };
            let gsn = build(&config, 1);
            let x = Array2::from_elem((3, 6), 1.0);
            let mut rng = StdRng::seed_from_u64(2);
            let out = gsn
                .build_training_chain(&x, walkbacks, true, &mut rng, None)
                .expect("chain");
            assert_eq!(out.chain.len(), walkbacks, "layers={layers}");
            assert!(out.chain.iter().all(|p| p.dim() == (3, 6)));
        }
    }
}

/// The stack keeps each layer at its configured width after any number of sweeps.
#[test]
fn test_layer_widths_preserved() {
    let config = GsnConfig {
        input_size: Some(7),
        layers: 3,
        hidden_size: 4,
        ..GsnConfig::default()
    };
    let gsn = build(&config, 3);
    let x = Array2::zeros((2, 7));
    let out = gsn
        .build_training_chain(&x, 3, true, &mut StdRng::seed_from_u64(4), None)
        .expect("chain");
    let widths: Vec<usize> = out.stack.iter().map(|h| h.ncols()).collect();
    assert_eq!(widths, vec![7, 4, 4, 4]);
    assert!(out.stack.iter().all(|h| h.nrows() == 2));
}

#[test]
fn test_zero_walkbacks_rejected() {
    let gsn = build(&quiet_config(4, 1, 3), 0);
    let x = Array2::zeros((1, 4));
    let result = gsn.build_training_chain(&x, 0, false, &mut StdRng::seed_from_u64(0), None);
    assert!(matches!(result, Err(GsnError::InvalidConfig(_))));
}

#[test]
fn test_wrong_input_width_rejected() {
    let gsn = build(&quiet_config(4, 1, 3), 0);
    let x = Array2::zeros((1, 5));
    let result = gsn.build_training_chain(&x, 1, false, &mut StdRng::seed_from_u64(0), None);
    assert!(matches!(result, Err(GsnError::ShapeMismatch(_))));
}

// ============================================================================
// Closed-form oracles
// ============================================================================

/// Zero weights and biases: every prediction is sigmoid(0) = 0.5.
#[test]
fn test_zero_parameters_predict_half() {
    let mut gsn = build(&quiet_config(2, 1, 2), 5);
    gsn.weights[0].fill(0.0);
    let x = arr2(&[[1.0f32, 0.0]]);
    let out = gsn
        .build_training_chain(&x, 3, false, &mut StdRng::seed_from_u64(0), None)
        .expect("chain");
    assert_eq!(out.chain.len(), 3);
    for p in &out.chain {
        assert_close(p, &arr2(&[[0.5f32, 0.5]]));
    }
}

/// Single hidden layer, two walkbacks, no noise: two hand-computed sweeps.
#[test]
fn test_single_layer_closed_form() {
    let mut gsn = build(&quiet_config(3, 1, 2), 6);
    gsn.weights[0] = arr2(&[[0.5f32, -0.3], [0.2, 0.8], [-0.6, 0.1]]);
    gsn.biases[0] = ndarray::arr1(&[0.1f32, -0.2, 0.05]);
    gsn.biases[1] = ndarray::arr1(&[-0.1f32, 0.3]);

    let x = arr2(&[[1.0f32, 0.0, 1.0], [0.0, 1.0, 1.0]]);
    let w = &gsn.weights[0];

    let h1 = tanh(&(x.dot(w) + &gsn.biases[1]));
    let p1 = sigmoid(&(h1.dot(&w.t()) + &gsn.biases[0]));
    let h1b = tanh(&(p1.dot(w) + &gsn.biases[1]));
    let p2 = sigmoid(&(h1b.dot(&w.t()) + &gsn.biases[0]));

    let out = gsn
        .build_training_chain(&x, 2, false, &mut StdRng::seed_from_u64(0), None)
        .expect("chain");
    assert_eq!(out.chain.len(), 2);
    assert_close(&out.chain[0], &p1);
    assert_close(&out.chain[1], &p2);
    assert_close(&out.stack[1], &h1b);
}

/// Two hidden layers: odd layers read the previous top layer, even layers read
/// the freshly updated odd layers.
#[test]
fn test_two_layer_sweep_order() {
    let mut gsn = build(&quiet_config(3, 2, 2), 7);
    gsn.weights[0] = arr2(&[[0.4f32, -0.2], [0.1, 0.3], [-0.5, 0.6]]);
    gsn.weights[1] = arr2(&[[0.7f32, -0.4], [0.2, 0.9]]);

    let x = arr2(&[[1.0f32, 1.0, 0.0]]);
    let (w0, w1) = (&gsn.weights[0], &gsn.weights[1]);
    let b = &gsn.biases;

    // sweep 1: h2 is still zero when h1 is computed
    let h1 = tanh(&(x.dot(w0) + &b[1]));
    let p1 = sigmoid(&(h1.dot(&w0.t()) + &b[0]));
    let h2 = tanh(&(h1.dot(w1) + &b[2]));
    // sweep 2
    let h1b = tanh(&(p1.dot(w0) + h2.dot(&w1.t()) + &b[1]));
    let p2 = sigmoid(&(h1b.dot(&w0.t()) + &b[0]));
    let h2b = tanh(&(h1b.dot(w1) + &b[2]));

    let out = gsn
        .build_training_chain(&x, 2, false, &mut StdRng::seed_from_u64(0), None)
        .expect("chain");
    assert_eq!(out.chain.len(), 2);
    assert_close(&out.chain[0], &p1);
    assert_close(&out.chain[1], &p2);
    assert_close(&out.stack[2], &h2b);
}

/// Given hiddens, the visible layer is rebuilt before the hidden layer.
#[test]
fn test_chain_given_hiddens_reverses_order() {
    let mut gsn = build(&quiet_config(2, 1, 2), 8);
    gsn.weights[0] = arr2(&[[0.3f32, -0.7], [0.5, 0.2]]);
    let x = arr2(&[[0.0f32, 1.0]]);
    let h = arr2(&[[0.9f32, -0.4]]);
    let w = &gsn.weights[0];

    let p1 = sigmoid(&(h.dot(&w.t()) + &gsn.biases[0]));
    let h1 = tanh(&(p1.dot(w) + &gsn.biases[1]));
    let p2 = sigmoid(&(h1.dot(&w.t()) + &gsn.biases[0]));

    let out = gsn
        .build_chain_given_hiddens(vec![x, h], 2, false, &mut StdRng::seed_from_u64(0))
        .expect("chain");
    assert_eq!(out.chain.len(), 2);
    assert_close(&out.chain[0], &p1);
    assert_close(&out.chain[1], &p2);
}

/// One noisy forward sweep from supplied hiddens; with zero noise levels it
/// reduces to the deterministic update.
#[test]
fn test_px_given_h_matches_forward_sweep() {
    let gsn = build(&quiet_config(3, 2, 2), 9);
    let x = arr2(&[[1.0f32, 0.0, 1.0]]);
    let h1 = arr2(&[[0.2f32, -0.1]]);
    let h2 = arr2(&[[0.5f32, 0.4]]);
    let (w0, w1) = (&gsn.weights[0], &gsn.weights[1]);

    let h1_new = tanh(&(x.dot(w0) + h2.dot(&w1.t()) + &gsn.biases[1]));
    let expected = sigmoid(&(h1_new.dot(&w0.t()) + &gsn.biases[0]));

    let p = gsn
        .px_given_h(&x, vec![h1, h2], 1, &mut StdRng::seed_from_u64(0))
        .expect("px_given_h");
    assert_close(&p, &expected);
}

// ============================================================================
// Noise gating
// ============================================================================

/// With a single hidden layer and noiseless_h1, hidden noise never fires.
#[test]
fn test_noiseless_h1_suppresses_hidden_noise() {
    let noisy = GsnConfig {
        add_noise: true,
        hidden_add_noise_sigma: 3.0,
        noiseless_h1: true,
        ..quiet_config(5, 1, 4)
    };
    let gsn = build(&noisy, 10);
    let x = Array2::from_elem((2, 5), 1.0);

    let with_flag = gsn
        .build_training_chain(&x, 2, true, &mut StdRng::seed_from_u64(1), None)
        .expect("chain");
    let without_noise = gsn
        .build_training_chain(&x, 2, false, &mut StdRng::seed_from_u64(1), None)
        .expect("chain");
    for (a, b) in with_flag.chain.iter().zip(&without_noise.chain) {
        assert_close(a, b);
    }

    let mut loud = gsn.clone();
    loud.noise.noiseless_first_hidden = false;
    let perturbed = loud
        .build_training_chain(&x, 2, true, &mut StdRng::seed_from_u64(1), None)
        .expect("chain");
    assert_ne!(perturbed.chain[0], without_noise.chain[0]);
}

/// Same seed, same chain.
#[test]
fn test_seeded_chain_reproducible() {
    let config = GsnConfig {
        input_size: Some(6),
        layers: 2,
        hidden_size: 5,
        ..GsnConfig::default()
    };
    let gsn = build(&config, 11);
    let x = Array2::from_elem((4, 6), 1.0);
    let a = gsn
        .build_training_chain(&x, 3, true, &mut StdRng::seed_from_u64(99), None)
        .expect("chain");
    let b = gsn
        .build_training_chain(&x, 3, true, &mut StdRng::seed_from_u64(99), None)
        .expect("chain");
    assert_eq!(a.chain, b.chain);
}

#[test]
fn test_mask_noise_edge_levels() {
    let mut rng = StdRng::seed_from_u64(12);
    let x = Array2::from_elem((8, 8), 0.7f32);
    assert_eq!(mask_noise(&x, 0.0, &mut rng), x);
    assert!(mask_noise(&x, 1.0, &mut rng).iter().all(|&v| v == 0.0));
}

/// The sampling step advances the stack by exactly one sweep.
#[test]
fn test_sampling_step_single_prediction() {
    let gsn = build(&quiet_config(4, 2, 3), 13);
    let mut stack = vec![Array2::from_elem((2, 4), 1.0)];
    stack.extend(gsn.zero_hiddens(2));
    let (next, prediction) = gsn
        .build_sampling_step(stack.clone(), false, &mut StdRng::seed_from_u64(0))
        .expect("step");
    assert_eq!(next.len(), 3);
    assert_eq!(prediction.dim(), (2, 4));

    let chain = gsn
        .build_training_chain(&stack[0], 1, false, &mut StdRng::seed_from_u64(0), None)
        .expect("chain");
    assert_close(&prediction, &chain.chain[0]);
}
