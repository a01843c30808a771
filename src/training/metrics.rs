//! Training statistics.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::episode::Episode;

/// Reward summary of one collected episode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpisodeStats {
    pub episode_id: String,
    pub timesteps: usize,
    /// Sum of rewards over all agents and timesteps.
    pub total_reward: f32,
    /// Total reward per agent.
    pub agent_rewards: Vec<f32>,
}

impl EpisodeStats {
    pub fn from_episode(episode: &Episode) -> Self {
        let agent_rewards = (0..episode.num_agents())
            .map(|agent| episode.agent_rewards(agent).iter().sum())
            .collect();
        Self {
            episode_id: episode.id.clone(),
            timesteps: episode.len(),
            total_reward: episode.total_reward(),
            agent_rewards,
        }
    }

    /// Mean reward per agent per timestep.
    pub fn mean_step_reward(&self) -> f32 {
        let denominator = self.timesteps * self.agent_rewards.len();
        if denominator == 0 {
            0.0
        } else {
            self.total_reward / denominator as f32
        }
    }
}

impl fmt::Display for EpisodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "episode {}: {} steps, total reward {:.3}",
            self.episode_id, self.timesteps, self.total_reward
        )
    }
}

/// Outcome of one update step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UpdateReport {
    /// Negated clipped surrogate plus entropy bonus.
    pub policy_loss: f64,
    pub critic_loss: f64,
    /// Mean entropy of the new policy over the minibatch.
    pub entropy: f64,
    /// Fraction of ratios outside `[1 - ε, 1 + ε]`.
    pub clip_fraction: f64,
    /// Post-softmax probabilities that were exactly zero and got clamped.
    pub zero_probabilities: usize,
}

/// Summary of one training iteration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IterationStats {
    pub iteration: usize,
    pub episodes: Vec<EpisodeStats>,
    pub num_chunks: usize,
    pub update: UpdateReport,
}

impl IterationStats {
    /// Mean total reward over the iteration's episodes.
    pub fn mean_episode_reward(&self) -> f32 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        self.episodes.iter().map(|e| e.total_reward).sum::<f32>() / self.episodes.len() as f32
    }
}

impl fmt::Display for IterationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[iteration {}] mean_reward={:.3} chunks={} policy_loss={:.4} critic_loss={:.4} entropy={:.4} clip_frac={:.3}",
            self.iteration,
            self.mean_episode_reward(),
            self.num_chunks,
            self.update.policy_loss,
            self.update.critic_loss,
            self.update.entropy,
            self.update.clip_fraction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::episode::fixtures::episode;

    #[test]
    fn episode_stats_sum_per_agent() {
        let ep = episode(&[vec![1.0, 2.0], vec![3.0, -1.0]], &[0.0, 0.0]);
        let stats = EpisodeStats::from_episode(&ep);
        assert_eq!(stats.timesteps, 2);
        assert_eq!(stats.agent_rewards, vec![4.0, 1.0]);
        assert_eq!(stats.total_reward, 5.0);
        assert!((stats.mean_step_reward() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn iteration_mean_reward() {
        let a = EpisodeStats::from_episode(&episode(&[vec![2.0]], &[0.0]));
        let b = EpisodeStats::from_episode(&episode(&[vec![4.0]], &[0.0]));
        let stats = IterationStats {
            iteration: 3,
            episodes: vec![a, b],
            num_chunks: 0,
            update: UpdateReport::default(),
        };
        assert_eq!(stats.mean_episode_reward(), 3.0);
        assert!(stats.to_string().starts_with("[iteration 3] mean_reward=3.000"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn update_report_serializes() {
        let report = UpdateReport {
            policy_loss: -0.5,
            zero_probabilities: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"zero_probabilities\":2"));
    }
}
