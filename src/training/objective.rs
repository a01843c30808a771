//! PPO loss terms over batched tensors.

use tch::{Kind, Tensor};

/// Lower bound substituted for post-softmax probabilities of exactly zero.
pub const PROBABILITY_FLOOR: f64 = 1e-8;

/// Clamps probabilities to [`PROBABILITY_FLOOR`] so they can be used as a
/// divisor or a log argument.
///
/// Returns the clamped tensor and how many entries were exactly zero.
pub fn stabilize_probabilities(probs: &Tensor) -> (Tensor, usize) {
    let zeros = tch::no_grad(|| probs.eq(0.0).sum(Kind::Int64).int64_value(&[]));
    (probs.clamp_min(PROBABILITY_FLOOR), zeros.max(0) as usize)
}

/// Elementwise `min(ratio * A, clamp(ratio, 1 - ε, 1 + ε) * A)`.
pub fn clipped_surrogate(ratio: &Tensor, advantage: &Tensor, clip_eps: f64) -> Tensor {
    let unclipped = ratio * advantage;
    let clipped = ratio.clamp(1.0 - clip_eps, 1.0 + clip_eps) * advantage;
    unclipped.min_other(&clipped)
}

/// Entropy of categorical distributions along the last dimension.
pub fn categorical_entropy(probs: &Tensor) -> Tensor {
    -(probs * probs.log()).sum_dim_intlist([-1i64].as_slice(), false, Kind::Float)
}

/// `mean(max((V_new - R)², (clamp(V_new, V_old - ε, V_old + ε) - R)²))`.
pub fn clipped_value_loss(
    new_values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
    clip_eps: f64,
) -> Tensor {
    let unclipped = (new_values - returns).square();
    let clipped_values = old_values + (new_values - old_values).clamp(-clip_eps, clip_eps);
    let clipped = (clipped_values - returns).square();
    unclipped.max_other(&clipped).mean(Kind::Float)
}

/// Fraction of ratios outside `[1 - ε, 1 + ε]`.
pub fn clip_fraction(ratio: &Tensor, clip_eps: f64) -> f64 {
    tch::no_grad(|| {
        (ratio - 1.0)
            .abs()
            .gt(clip_eps)
            .to_kind(Kind::Float)
            .mean(Kind::Float)
            .double_value(&[])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(t: &Tensor) -> Vec<f32> {
        Vec::<f32>::try_from(&t.view([-1])).unwrap()
    }

    #[test]
    fn unit_ratio_is_never_clipped() {
        let ratio = Tensor::from_slice(&[1.0f32, 1.0, 1.0]);
        let adv = Tensor::from_slice(&[0.5f32, -2.0, 3.0]);
        let surrogate = clipped_surrogate(&ratio, &adv, 0.3);
        assert_eq!(values(&surrogate), vec![0.5, -2.0, 3.0]);
        assert_eq!(clip_fraction(&ratio, 0.3), 0.0);
    }

    #[test]
    fn large_ratio_with_positive_advantage_is_clipped() {
        let eps = 0.3;
        let ratio = Tensor::from_slice(&[1.0f32 + 0.3 + 0.2]);
        let adv = Tensor::from_slice(&[2.0f32]);
        let surrogate = values(&clipped_surrogate(&ratio, &adv, eps));
        assert!((surrogate[0] - 1.3 * 2.0).abs() < 1e-5);
        assert_eq!(clip_fraction(&ratio, eps), 1.0);
    }

    #[test]
    fn small_ratio_with_negative_advantage_is_clipped() {
        let ratio = Tensor::from_slice(&[0.5f32]);
        let adv = Tensor::from_slice(&[-1.0f32]);
        let surrogate = values(&clipped_surrogate(&ratio, &adv, 0.3));
        // min(-0.5, -0.7)
        assert!((surrogate[0] + 0.7).abs() < 1e-5);
    }

    #[test]
    fn uniform_entropy_is_log_actions() {
        let probs = Tensor::full([2, 5], 0.2, (Kind::Float, tch::Device::Cpu));
        let entropy = values(&categorical_entropy(&probs));
        for h in entropy {
            assert!((h - 5f32.ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn value_loss_takes_pessimistic_branch() {
        // V_old = 0, V_new = 1, R = 1, ε = 0.3:
        // unclipped (1 - 1)² = 0, clipped (0.3 - 1)² = 0.49.
        let loss = clipped_value_loss(
            &Tensor::from_slice(&[1.0f32]),
            &Tensor::from_slice(&[0.0f32]),
            &Tensor::from_slice(&[1.0f32]),
            0.3,
        );
        assert!((loss.double_value(&[]) - 0.49).abs() < 1e-5);
    }

    #[test]
    fn value_loss_without_movement_is_mse() {
        let v = Tensor::from_slice(&[0.5f32, 1.0]);
        let r = Tensor::from_slice(&[1.5f32, 1.0]);
        let loss = clipped_value_loss(&v, &v, &r, 0.3);
        assert!((loss.double_value(&[]) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn zero_probabilities_are_floored_and_counted() {
        let probs = Tensor::from_slice(&[0.0f32, 1.0, 0.0, 0.5]);
        let (stable, zeros) = stabilize_probabilities(&probs);
        assert_eq!(zeros, 2);
        let stable = values(&stable);
        assert!(stable.iter().all(|&p| p > 0.0));
        assert_eq!(stable[1], 1.0);
        assert!(values(&categorical_entropy(&Tensor::from_slice(&stable)))[0].is_finite());
    }
}
