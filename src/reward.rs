//! Per-agent reward computation.
//!
//! The collector treats rewards as a pluggable function of the global state
//! and a fixed weight tuple. [`SoccerReward`] is the shaped reward used for
//! robot football.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainingError};
use crate::state::StateLayout;
use crate::types::Position;

/// Movement below this distance between two states counts as idle.
pub const IDLE_DISTANCE: f32 = 1e-3;

/// Weight tuple passed to every reward computation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RewardWeights {
    /// Penalty for a robot that did not move.
    pub idle_penalty: f32,
    /// Reward per goal of change in the goal difference.
    pub goal_reward: f32,
    /// Bonus for holding the ball, and penalty for every robot that does not.
    pub possession_reward: f32,
    /// Weight of the ball-approach term.
    pub distance_weight: f32,
}

impl RewardWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.idle_penalty,
            self.goal_reward,
            self.possession_reward,
            self.distance_weight,
        ];
        if all.iter().any(|w| !w.is_finite()) {
            return Err(TrainingError::InvalidConfig(
                "reward weights must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            idle_penalty: 0.05,
            goal_reward: 10.0,
            possession_reward: 0.5,
            distance_weight: 0.1,
        }
    }
}

/// Computes one reward per controlled agent from a global state.
pub trait RewardFunction {
    /// Clears per-episode memory. Called once before each episode.
    fn reset(&mut self) {}

    /// Returns the rewards for the transition that produced `state`.
    fn compute_rewards(&mut self, state: &[f32], weights: &RewardWeights) -> Result<Vec<f32>>;
}

/// Shaped robot-football reward.
///
/// For own robot `i` the reward is the sum of:
///
/// * `-idle_penalty` if the robot moved less than [`IDLE_DISTANCE`],
/// * `goal_reward * Δgoal_difference`, shared by the team,
/// * `+possession_reward` if it holds the ball, `-possession_reward`
///   otherwise,
/// * `distance_weight * (cos(angle to ball) - distance to ball)`.
///
/// The idle and goal terms compare against the previous state, so the first
/// call after [`RewardFunction::reset`] scores neither.
#[derive(Debug, Clone)]
pub struct SoccerReward {
    layout: StateLayout,
    previous_positions: Option<Vec<Position>>,
    previous_goal_difference: Option<f32>,
}

impl SoccerReward {
    pub fn new(layout: StateLayout) -> Self {
        Self {
            layout,
            previous_positions: None,
            previous_goal_difference: None,
        }
    }
}

impl RewardFunction for SoccerReward {
    fn reset(&mut self) {
        self.previous_positions = None;
        self.previous_goal_difference = None;
    }

    fn compute_rewards(&mut self, state: &[f32], weights: &RewardWeights) -> Result<Vec<f32>> {
        let view = self.layout.view(state)?;
        let ball = view.ball();
        let goal_difference = view.goal_difference();

        let goal_term = match self.previous_goal_difference {
            Some(previous) => weights.goal_reward * (goal_difference - previous),
            None => 0.0,
        };

        let positions: Vec<Position> = (0..self.layout.own_team())
            .map(|i| view.own_position(i))
            .collect();

        let rewards = positions
            .iter()
            .enumerate()
            .map(|(i, position)| {
                let mut reward = goal_term;

                if let Some(previous) = &self.previous_positions {
                    if previous[i].distance_to(position) < IDLE_DISTANCE {
                        reward -= weights.idle_penalty;
                    }
                }

                if view.own_has_ball(i) {
                    reward += weights.possession_reward;
                } else {
                    reward -= weights.possession_reward;
                }

                let alignment = position.facing_alignment(view.own_orientation(i), &ball);
                reward += weights.distance_weight * (alignment - position.distance_to(&ball));
                reward
            })
            .collect();

        self.previous_positions = Some(positions);
        self.previous_goal_difference = Some(goal_difference);
        Ok(rewards)
    }
}
