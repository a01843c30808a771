//! Recurrent network capability used by the rollout collector.
//!
//! The collector only needs a single-step forward pass that threads a hidden
//! state. The libtorch implementations live in [`gru`] behind the `nn`
//! feature.

#[cfg(feature = "nn")]
pub mod gru;

#[cfg(feature = "nn")]
pub use gru::{GruCritic, GruPolicy, TorchNetwork};

use crate::error::{Result, TrainingError};

/// Recurrent memory of one cell instance.
///
/// One per agent for the policy, one for the critic. Cloned by value into
/// timesteps and chunk anchors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HiddenState(Vec<f32>);

impl HiddenState {
    /// An all-zero hidden state of `size` entries.
    pub fn zeros(size: usize) -> Self {
        Self(vec![0.0; size])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for HiddenState {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Single-step recurrent forward pass.
pub trait RecurrentNetwork {
    fn hidden_size(&self) -> usize;

    /// Number of outputs per step: action logits for a policy, 1 for a critic.
    fn output_size(&self) -> usize;

    fn initial_hidden(&self) -> HiddenState {
        HiddenState::zeros(self.hidden_size())
    }

    /// Runs one step and returns `(output, new_hidden)`.
    fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)>;

    /// Runs one step for independent rows, e.g. every agent of one timestep.
    ///
    /// The default steps the rows one after another; engines that batch
    /// override it.
    fn forward_batch(
        &self,
        inputs: &[Vec<f32>],
        hidden: &[HiddenState],
    ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
        check_batch(inputs, hidden)?;
        inputs
            .iter()
            .zip(hidden)
            .map(|(input, h)| self.forward(input, h))
            .collect()
    }
}

/// Checks that a batch has one hidden state per input row.
pub fn check_batch(inputs: &[Vec<f32>], hidden: &[HiddenState]) -> Result<()> {
    if inputs.len() != hidden.len() {
        return Err(TrainingError::InvalidConfig(format!(
            "batch has {} inputs but {} hidden states",
            inputs.len(),
            hidden.len()
        )));
    }
    Ok(())
}

/// Numerically stable softmax of one row of logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest entry; the first one on ties.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}
