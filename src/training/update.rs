//! Clipped-ratio MAPPO update over chunks sampled with replacement.
//!
//! Each update step:
//!
//! 1. snapshots the live policy and critic,
//! 2. samples `mini_batch_size` chunks with replacement,
//! 3. replays every chunk from the hidden states stored in its first
//!    timestep through the old and the new networks, batching chunks and
//!    agents,
//! 4. takes one Adam step per network on its own loss.
//!
//! Both losses are checked for finiteness before either gradient step.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};
use tracing::{debug, warn};

use super::chunk::{Chunk, ChunkPool};
use super::metrics::UpdateReport;
use super::objective::{
    categorical_entropy, clip_fraction, clipped_surrogate, clipped_value_loss,
    stabilize_probabilities,
};
use super::snapshot::Frozen;
use crate::config::TrainingConfig;
use crate::error::{Result, TrainingError};
use crate::network::TorchNetwork;
use crate::state::with_agent_id;

/// Sampled chunks laid out time-major for batched replay.
///
/// Policy rows are ordered chunk-major then agent: row `b * n + i` is agent
/// `i` of chunk `b`.
pub(crate) struct Minibatch {
    pub chunk_length: i64,
    pub num_chunks: i64,
    pub num_agents: i64,
    /// `[L, B * n, D]`, agent id injected.
    pub policy_inputs: Tensor,
    /// `[L, B, D]`.
    pub critic_inputs: Tensor,
    /// `[B * n, H]`.
    pub policy_anchor: Tensor,
    /// `[B, H]`.
    pub critic_anchor: Tensor,
    /// `[L, B * n]`.
    pub actions: Tensor,
    /// `[L, B * n]`.
    pub advantages: Tensor,
    /// `[L, B * n]`.
    pub returns: Tensor,
}

impl Minibatch {
    pub fn from_chunks(chunks: &[&Chunk], device: Device) -> Result<Self> {
        let first = chunks.first().ok_or(TrainingError::EmptyChunkPool)?;
        let l = first.len();
        let n = first.num_agents();
        let d = first
            .timesteps
            .first()
            .map_or(0, |step| step.global_state.len());
        let ph = first.policy_anchor.first().map_or(0, |h| h.len());
        let ch = first.critic_anchor.len();
        let uniform = chunks.iter().all(|c| {
            c.len() == l
                && c.num_agents() == n
                && c.critic_anchor.len() == ch
                && c.policy_anchor.iter().all(|h| h.len() == ph)
                && c.timesteps.iter().all(|s| s.global_state.len() == d)
        });
        if l == 0 || n == 0 || !uniform {
            return Err(TrainingError::RaggedMinibatch);
        }

        let b = chunks.len();
        let rows = b * n;
        let mut policy_inputs = Vec::with_capacity(l * rows * d);
        let mut critic_inputs = Vec::with_capacity(l * b * d);
        let mut actions = Vec::with_capacity(l * rows);
        let mut advantages = Vec::with_capacity(l * rows);
        let mut returns = Vec::with_capacity(l * rows);

        for t in 0..l {
            for chunk in chunks {
                let step = &chunk.timesteps[t];
                critic_inputs.extend_from_slice(&step.global_state);
                for agent in 0..n {
                    policy_inputs.extend(with_agent_id(&step.global_state, agent));
                    actions.push(step.actions[agent] as i64);
                    advantages.push(chunk.advantage[agent][t]);
                    returns.push(chunk.reward_to_go[agent][t]);
                }
            }
        }

        let policy_anchor: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.policy_anchor.iter().flat_map(|h| h.as_slice().iter().copied()))
            .collect();
        let critic_anchor: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.critic_anchor.as_slice().iter().copied())
            .collect();

        let (l, b, n, rows, d) = (l as i64, b as i64, n as i64, rows as i64, d as i64);
        let tensor = |values: &[f32], shape: &[i64]| {
            Tensor::from_slice(values).view(shape).to_device(device)
        };
        Ok(Self {
            chunk_length: l,
            num_chunks: b,
            num_agents: n,
            policy_inputs: tensor(&policy_inputs, &[l, rows, d]),
            critic_inputs: tensor(&critic_inputs, &[l, b, d]),
            policy_anchor: tensor(&policy_anchor, &[rows, ph as i64]),
            critic_anchor: tensor(&critic_anchor, &[b, ch as i64]),
            actions: Tensor::from_slice(&actions).view([l, rows]).to_device(device),
            advantages: tensor(&advantages, &[l, rows]),
            returns: tensor(&returns, &[l, rows]),
        })
    }
}

/// Runs `step` over the time axis of `inputs` from `anchor`.
///
/// Returns the stacked outputs, `[L, rows, O]`.
pub(crate) fn replay<F>(inputs: &Tensor, anchor: &Tensor, step: F) -> Tensor
where
    F: Fn(&Tensor, &Tensor) -> (Tensor, Tensor),
{
    let length = inputs.size()[0];
    let mut hidden = anchor.shallow_clone();
    let mut outputs = Vec::with_capacity(length as usize);
    for t in 0..length {
        let (output, next_hidden) = step(&inputs.get(t), &hidden);
        outputs.push(output);
        hidden = next_hidden;
    }
    Tensor::stack(&outputs, 0)
}

fn adam(config: &TrainingConfig) -> nn::Adam {
    nn::Adam {
        eps: config.adam_eps,
        ..Default::default()
    }
}

/// Owns the optimizers and the minibatch sampler.
///
/// The optimizers are bound to the variable stores of the networks passed to
/// [`UpdateEngine::new`]; later updates must be given the same networks.
pub struct UpdateEngine {
    config: TrainingConfig,
    policy_optimizer: nn::Optimizer,
    critic_optimizer: nn::Optimizer,
    rng: StdRng,
}

impl UpdateEngine {
    pub fn new<P, C>(config: TrainingConfig, policy: &P, critic: &C) -> Result<Self>
    where
        P: TorchNetwork,
        C: TorchNetwork,
    {
        config.validate()?;
        let policy_optimizer = adam(&config).build(policy.var_store(), config.learning_rate)?;
        let critic_optimizer = adam(&config).build(critic.var_store(), config.learning_rate)?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            policy_optimizer,
            critic_optimizer,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Performs one update step and returns its losses.
    ///
    /// Fails on an empty pool, a ragged minibatch or a non-finite loss; in
    /// every failure case no parameter is changed.
    pub fn update<P, C>(
        &mut self,
        policy: &P,
        critic: &C,
        pool: &ChunkPool,
    ) -> Result<UpdateReport>
    where
        P: TorchNetwork,
        C: TorchNetwork,
    {
        let old_policy = Frozen::capture(policy)?;
        let old_critic = Frozen::capture(critic)?;

        let sample = pool.sample_with_replacement(self.config.mini_batch_size, &mut self.rng)?;
        let batch = Minibatch::from_chunks(&sample, policy.device())?;
        let eps = self.config.clip_eps;

        let old_logits = replay(&batch.policy_inputs, &batch.policy_anchor, |x, h| {
            old_policy.step(x, h)
        });
        let old_values = replay(&batch.critic_inputs, &batch.critic_anchor, |x, h| {
            old_critic.step(x, h)
        });
        let new_logits = replay(&batch.policy_inputs, &batch.policy_anchor, |x, h| {
            policy.step(x, h)
        });
        let new_values = replay(&batch.critic_inputs, &batch.critic_anchor, |x, h| {
            critic.step(x, h)
        });

        let (old_probs, old_zeros) = stabilize_probabilities(&old_logits.softmax(-1, Kind::Float));
        let (new_probs, new_zeros) = stabilize_probabilities(&new_logits.softmax(-1, Kind::Float));
        let zero_probabilities = old_zeros + new_zeros;
        if zero_probabilities > 0 {
            warn!(
                count = zero_probabilities,
                "clamped zero action probabilities"
            );
        }

        let taken = batch.actions.unsqueeze(-1);
        let old_taken = old_probs.gather(-1, &taken, false).squeeze_dim(-1);
        let new_taken = new_probs.gather(-1, &taken, false).squeeze_dim(-1);
        let ratio = &new_taken / &old_taken;

        let advantages = if self.config.normalize_advantages {
            let mean = batch.advantages.mean(Kind::Float);
            let std = batch.advantages.std(true);
            (&batch.advantages - mean) / (std + 1e-8)
        } else {
            batch.advantages.shallow_clone()
        };

        let surrogate = clipped_surrogate(&ratio, &advantages, eps).mean(Kind::Float);
        let entropy = categorical_entropy(&new_probs).mean(Kind::Float);
        let policy_loss = -(surrogate + &entropy * self.config.entropy_coef);

        // [L, B, 1] -> [L, B * n]: the critic value is shared by a chunk's agents.
        let per_agent = |values: Tensor| {
            values
                .expand([batch.chunk_length, batch.num_chunks, batch.num_agents], false)
                .reshape([batch.chunk_length, batch.num_chunks * batch.num_agents])
        };
        let critic_loss =
            clipped_value_loss(&per_agent(new_values), &per_agent(old_values), &batch.returns, eps);

        let policy_loss_value = policy_loss.f_double_value(&[])?;
        let critic_loss_value = critic_loss.f_double_value(&[])?;
        if !policy_loss_value.is_finite() {
            return Err(TrainingError::NonFiniteLoss {
                loss: "policy",
                value: policy_loss_value,
            });
        }
        if !critic_loss_value.is_finite() {
            return Err(TrainingError::NonFiniteLoss {
                loss: "critic",
                value: critic_loss_value,
            });
        }

        self.policy_optimizer
            .backward_step_clip_norm(&policy_loss, self.config.max_grad_norm);
        self.critic_optimizer
            .backward_step_clip_norm(&critic_loss, self.config.max_grad_norm);

        let report = UpdateReport {
            policy_loss: policy_loss_value,
            critic_loss: critic_loss_value,
            entropy: entropy.f_double_value(&[])?,
            clip_fraction: clip_fraction(&ratio, eps),
            zero_probabilities,
        };
        debug!(
            policy_loss = report.policy_loss,
            critic_loss = report.critic_loss,
            entropy = report.entropy,
            clip_fraction = report.clip_fraction,
            "update step"
        );
        Ok(report)
    }
}
