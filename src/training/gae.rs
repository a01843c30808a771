//! Reward-to-go and Generalized Advantage Estimation (GAE-λ).
//!
//! Both run backward over a full episode, once per agent. The centralized
//! critic value is shared by every agent and the value after the final
//! timestep is taken as zero.

use rayon::prelude::*;

use super::episode::Episode;

/// Discounted cumulative reward: `G[t] = r[t] + γ G[t+1]`, `G[T-1] = r[T-1]`.
pub fn reward_to_go(rewards: &[f32], gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running = 0.0;
    for t in (0..rewards.len()).rev() {
        running = rewards[t] + gamma * running;
        returns[t] = running;
    }
    returns
}

/// One-step TD errors: `δ[t] = r[t] + γ V[t+1] - V[t]` with `V[T] = 0`.
pub fn temporal_differences(rewards: &[f32], values: &[f32], gamma: f32) -> Vec<f32> {
    debug_assert_eq!(rewards.len(), values.len());
    (0..rewards.len())
        .map(|t| {
            let next_value = values.get(t + 1).copied().unwrap_or(0.0);
            rewards[t] + gamma * next_value - values[t]
        })
        .collect()
}

/// GAE from TD errors: `A[t] = δ[t] + γλ A[t+1]`, `A[T-1] = δ[T-1]`.
pub fn generalized_advantage(deltas: &[f32], gamma: f32, gae_lambda: f32) -> Vec<f32> {
    let mut advantages = vec![0.0; deltas.len()];
    let mut running = 0.0;
    for t in (0..deltas.len()).rev() {
        running = deltas[t] + gamma * gae_lambda * running;
        advantages[t] = running;
    }
    advantages
}

/// Full-episode training targets, indexed `[agent][timestep]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotations {
    pub reward_to_go: Vec<Vec<f32>>,
    pub advantage: Vec<Vec<f32>>,
}

impl Annotations {
    /// Number of timesteps covered, or 0 when there are no agents.
    pub fn len(&self) -> usize {
        self.reward_to_go.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes reward-to-go and advantages for every agent of `episode`.
pub fn annotate(episode: &Episode, gamma: f64, gae_lambda: f64) -> Annotations {
    let gamma = gamma as f32;
    let gae_lambda = gae_lambda as f32;
    let values = episode.critic_values();

    let (reward_to_go, advantage): (Vec<Vec<f32>>, Vec<Vec<f32>>) = (0..episode.num_agents())
        .into_par_iter()
        .map(|agent| {
            let rewards = episode.agent_rewards(agent);
            let deltas = temporal_differences(&rewards, &values, gamma);
            (
                self::reward_to_go(&rewards, gamma),
                generalized_advantage(&deltas, gamma, gae_lambda),
            )
        })
        .unzip();

    Annotations {
        reward_to_go,
        advantage,
    }
}
