//! Training pipeline for recurrent MAPPO.
//!
//! Rollout collection, return/advantage estimation, chunking and sampling
//! are engine-agnostic. The update engine and the trainer require the `nn`
//! feature.

pub mod chunk;
pub mod collector;
pub mod episode;
pub mod gae;
pub mod metrics;

#[cfg(feature = "nn")]
pub mod mappo;
#[cfg(feature = "nn")]
pub mod objective;
#[cfg(feature = "nn")]
pub mod snapshot;
#[cfg(feature = "nn")]
pub mod update;

pub use chunk::{split_episode, Chunk, ChunkPool};
pub use collector::RolloutCollector;
pub use episode::{Episode, Timestep};
pub use gae::{annotate, generalized_advantage, reward_to_go, temporal_differences, Annotations};
pub use metrics::{EpisodeStats, IterationStats, UpdateReport};

#[cfg(feature = "nn")]
pub use mappo::MAPPOTrainer;
#[cfg(feature = "nn")]
pub use snapshot::Frozen;
#[cfg(feature = "nn")]
pub use update::UpdateEngine;
