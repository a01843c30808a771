//! Per-timestep rollout records.

use crate::network::HiddenState;
use crate::Id;

/// One stored timestep of an episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestep {
    /// Global state the networks saw; slot 0 is the agent-id placeholder.
    pub global_state: Vec<f32>,
    /// Argmax action per agent.
    pub actions: Vec<usize>,
    /// Post-softmax action probabilities per agent.
    pub action_probabilities: Vec<Vec<f32>>,
    /// Reward per agent for the transition after this timestep.
    pub rewards: Vec<f32>,
    /// Centralized value estimate, shared by all agents.
    pub critic_value: f32,
    /// Per-agent policy hidden state after processing this timestep.
    pub policy_hidden: Vec<HiddenState>,
    /// Critic hidden state after processing this timestep.
    pub critic_hidden: HiddenState,
}

impl Timestep {
    pub fn num_agents(&self) -> usize {
        self.actions.len()
    }

    /// Probability the policy assigned to the action `agent` took.
    pub fn taken_probability(&self, agent: usize) -> f32 {
        self.action_probabilities[agent][self.actions[agent]]
    }
}

/// A completed rollout, immutable once collected.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: Id,
    /// Per-agent policy hidden state before the first stored timestep.
    pub initial_policy_hidden: Vec<HiddenState>,
    /// Critic hidden state before the first stored timestep.
    pub initial_critic_hidden: HiddenState,
    pub timesteps: Vec<Timestep>,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    pub fn num_agents(&self) -> usize {
        self.initial_policy_hidden.len()
    }

    /// Rewards of one agent over the whole episode.
    pub fn agent_rewards(&self, agent: usize) -> Vec<f32> {
        self.timesteps.iter().map(|t| t.rewards[agent]).collect()
    }

    /// Critic values over the whole episode.
    pub fn critic_values(&self) -> Vec<f32> {
        self.timesteps.iter().map(|t| t.critic_value).collect()
    }

    /// Sum of all agents' rewards over the episode.
    pub fn total_reward(&self) -> f32 {
        self.timesteps
            .iter()
            .flat_map(|t| t.rewards.iter())
            .sum()
    }
}
