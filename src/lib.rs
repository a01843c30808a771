//! collective-mappo - Recurrent Multi-Agent PPO for collective robotics
//!
//! Trains a shared GRU policy and a centralized GRU critic for a team of
//! robots (Centralized Training, Decentralized Execution). The crate covers
//! rollout collection against any [`environment::Environment`], reward
//! shaping, reward-to-go and GAE estimation, fixed-length chunking of
//! episodes, sampling with replacement and the clipped PPO update, plus a
//! per-episode reward history on disk.
//!
//! Everything up to chunk sampling is engine-agnostic. Enable the `nn`
//! feature for the libtorch-backed networks, the update engine, the
//! trainer and checkpointing.

#[cfg(feature = "nn")]
pub mod checkpoint;
pub mod config;
pub mod environment;
pub mod error;
pub mod history;
pub mod network;
pub mod reward;
pub mod simulation;
pub mod state;
pub mod training;
pub mod types;

pub use config::{RolloutConfig, TrainingConfig};
pub use environment::{ActuationSink, Environment, StateSource};
pub use error::{Result, TrainingError};
pub use history::{RewardHistory, RewardRecord};
pub use network::{HiddenState, RecurrentNetwork};
pub use reward::{RewardFunction, RewardWeights, SoccerReward};
pub use state::StateLayout;
pub use types::{Action, Position, Team};

#[cfg(feature = "nn")]
pub use checkpoint::Checkpointer;
#[cfg(feature = "nn")]
pub use network::{GruCritic, GruPolicy, TorchNetwork};
#[cfg(feature = "nn")]
pub use training::MAPPOTrainer;

/// Identifier type used for runs and episodes.
pub type Id = String;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
