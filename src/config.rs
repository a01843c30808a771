//! Configuration for rollout collection and MAPPO training.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainingError};
use crate::reward::RewardWeights;
use crate::state::StateLayout;
use crate::types::NUM_ACTIONS;

/// Configuration of the rollout collector.
///
/// Fixes the team sizes, the action space, the episode length and the
/// recurrent width of both networks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RolloutConfig {
    /// Number of controlled robots (agents).
    pub num_agents: usize,
    /// Number of opposing robots visible in the global state.
    pub num_opponents: usize,
    /// Size of the discrete action space.
    pub num_actions: usize,
    /// Episode length including the bootstrap timestep that is not stored.
    pub max_timesteps: usize,
    /// Weights passed to the reward function.
    pub reward_weights: RewardWeights,
    /// GRU hidden size of the policy and the critic.
    pub hidden_size: usize,
}

impl RolloutConfig {
    /// Layout of the global state for these team sizes.
    pub fn state_layout(&self) -> StateLayout {
        StateLayout::new(self.num_agents, self.num_opponents)
    }

    /// Global state dimension.
    pub fn state_dim(&self) -> usize {
        self.state_layout().dim()
    }

    /// Number of stored timesteps per episode.
    pub fn episode_len(&self) -> usize {
        self.max_timesteps.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_agents == 0 {
            return Err(invalid("num_agents must be at least 1"));
        }
        if self.num_actions == 0 {
            return Err(invalid("num_actions must be at least 1"));
        }
        if self.max_timesteps < 2 {
            return Err(invalid(
                "max_timesteps must be at least 2 to store one timestep",
            ));
        }
        if self.hidden_size == 0 {
            return Err(invalid("hidden_size must be at least 1"));
        }
        self.reward_weights.validate()
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            num_agents: 6,
            num_opponents: 6,
            num_actions: NUM_ACTIONS,
            max_timesteps: 1000,
            reward_weights: RewardWeights::default(),
            hidden_size: 64,
        }
    }
}

/// MAPPO hyperparameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainingConfig {
    /// Discount factor γ.
    pub gamma: f64,
    /// GAE λ parameter.
    pub gae_lambda: f64,
    /// PPO clip parameter ε, also used for value clipping.
    pub clip_eps: f64,
    /// Entropy bonus coefficient.
    pub entropy_coef: f64,
    /// Adam learning rate for both networks.
    pub learning_rate: f64,
    /// Adam ε.
    pub adam_eps: f64,
    /// Maximum gradient norm for clipping.
    pub max_grad_norm: f64,
    /// Episodes collected per iteration.
    pub batch_size: usize,
    /// Chunk length L for truncated BPTT.
    pub chunk_length: usize,
    /// Chunks sampled (with replacement) per update.
    pub mini_batch_size: usize,
    /// Number of training iterations.
    pub max_iterations: usize,
    /// Normalize advantages across each minibatch before the surrogate.
    pub normalize_advantages: bool,
    /// Seed for minibatch sampling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_eps: 0.3,
            entropy_coef: 0.5,
            learning_rate: 1e-4,
            adam_eps: 1e-5,
            max_grad_norm: 0.5,
            batch_size: 4,
            chunk_length: 10,
            mini_batch_size: 32,
            max_iterations: 100,
            normalize_advantages: false,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(invalid("gamma must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(invalid("gae_lambda must lie in [0, 1]"));
        }
        if !self.clip_eps.is_finite() || self.clip_eps <= 0.0 || self.clip_eps >= 1.0 {
            return Err(invalid("clip_eps must lie in (0, 1)"));
        }
        if !self.entropy_coef.is_finite() || self.entropy_coef < 0.0 {
            return Err(invalid("entropy_coef must be non-negative"));
        }
        positive("learning_rate", self.learning_rate)?;
        positive("adam_eps", self.adam_eps)?;
        positive("max_grad_norm", self.max_grad_norm)?;
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.chunk_length == 0 {
            return Err(invalid("chunk_length must be at least 1"));
        }
        if self.mini_batch_size == 0 {
            return Err(invalid("mini_batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> TrainingError {
    TrainingError::InvalidConfig(message.to_string())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(&format!("{name} must be positive, got {value}")));
    }
    Ok(())
}
