//! MAPPO trainer with a shared recurrent policy and a centralized recurrent critic.
//!
//! Centralized Training, Decentralized Execution: every robot runs the same
//! policy on the global state with its own id injected, while the critic
//! scores the unmodified global state.

use tch::Device;
use tracing::{info, warn};

use super::chunk::ChunkPool;
use super::collector::RolloutCollector;
use super::metrics::{EpisodeStats, IterationStats};
use super::update::UpdateEngine;
use crate::checkpoint::Checkpointer;
use crate::config::{RolloutConfig, TrainingConfig};
use crate::environment::Environment;
use crate::error::{Result, TrainingError};
use crate::history::RewardHistory;
use crate::network::{GruCritic, GruPolicy};
use crate::reward::RewardFunction;
use crate::{generate_id, Id};

/// Owns the networks, the collector and the update engine.
///
/// # Lifecycle
///
/// 1. [`MAPPOTrainer::new`] builds both networks and their optimizers.
/// 2. Optionally attach a [`Checkpointer`] and [`MAPPOTrainer::resume`],
///    and a [`RewardHistory`] that receives every episode's mean reward.
/// 3. [`MAPPOTrainer::train`] runs `max_iterations` iterations, or call
///    [`MAPPOTrainer::train_iteration`] to stop between iterations.
pub struct MAPPOTrainer {
    pub policy: GruPolicy,
    pub critic: GruCritic,
    collector: RolloutCollector,
    engine: UpdateEngine,
    checkpointer: Option<Checkpointer>,
    reward_history: Option<RewardHistory>,
    run_id: Id,
}

impl MAPPOTrainer {
    pub fn new(
        rollout_config: RolloutConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> Result<Self> {
        rollout_config.validate()?;
        training_config.validate()?;
        if rollout_config.episode_len() < training_config.chunk_length {
            return Err(TrainingError::InvalidConfig(format!(
                "episodes of {} timesteps cannot fill a chunk of {}",
                rollout_config.episode_len(),
                training_config.chunk_length
            )));
        }

        let state_dim = rollout_config.state_dim();
        let policy = GruPolicy::new(
            state_dim,
            rollout_config.hidden_size,
            rollout_config.num_actions,
            device,
        );
        let critic = GruCritic::new(state_dim, rollout_config.hidden_size, device);
        let engine = UpdateEngine::new(training_config, &policy, &critic)?;
        let collector = RolloutCollector::new(rollout_config)?;

        Ok(Self {
            policy,
            critic,
            collector,
            engine,
            checkpointer: None,
            reward_history: None,
            run_id: generate_id(),
        })
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_reward_history(mut self, history: RewardHistory) -> Self {
        self.reward_history = Some(history);
        self
    }

    pub fn reward_history(&self) -> Option<&RewardHistory> {
        self.reward_history.as_ref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn rollout_config(&self) -> &RolloutConfig {
        self.collector.config()
    }

    pub fn training_config(&self) -> &TrainingConfig {
        self.engine.config()
    }

    /// Loads the policy and critic from the attached checkpointer.
    pub fn resume(&mut self) -> Result<()> {
        let checkpointer = self.checkpointer.as_ref().ok_or_else(|| {
            TrainingError::InvalidConfig("resume requires a checkpointer".to_string())
        })?;
        checkpointer.load_pair(&mut self.policy, &mut self.critic)?;
        info!(run = %self.run_id, dir = %checkpointer.dir().display(), "resumed from checkpoint");
        Ok(())
    }

    /// Runs the full training loop and returns per-iteration statistics.
    pub fn train<E, R>(&mut self, env: &mut E, reward_fn: &mut R) -> Result<Vec<IterationStats>>
    where
        E: Environment + ?Sized,
        R: RewardFunction + ?Sized,
    {
        let iterations = self.engine.config().max_iterations;
        info!(
            run = %self.run_id,
            iterations,
            batch_size = self.engine.config().batch_size,
            "starting MAPPO training"
        );
        let mut history = Vec::with_capacity(iterations);
        for iteration in 0..iterations {
            history.push(self.train_iteration(iteration, env, reward_fn)?);
        }
        Ok(history)
    }

    /// Collects `batch_size` episodes, chunks them and runs one update.
    pub fn train_iteration<E, R>(
        &mut self,
        iteration: usize,
        env: &mut E,
        reward_fn: &mut R,
    ) -> Result<IterationStats>
    where
        E: Environment + ?Sized,
        R: RewardFunction + ?Sized,
    {
        let config = self.engine.config().clone();
        let mut episodes = Vec::with_capacity(config.batch_size);
        for _ in 0..config.batch_size {
            episodes.push(self.collector.collect_episode(
                &self.policy,
                &self.critic,
                env,
                reward_fn,
            )?);
        }

        let pool = ChunkPool::from_episodes(
            &episodes,
            config.gamma,
            config.gae_lambda,
            config.chunk_length,
        )?;
        if pool.is_empty() {
            warn!(run = %self.run_id, iteration, "no chunks collected, refusing to update");
            return Err(TrainingError::EmptyChunkPool);
        }

        let update = self.engine.update(&self.policy, &self.critic, &pool)?;
        let stats = IterationStats {
            iteration,
            episodes: episodes.iter().map(EpisodeStats::from_episode).collect(),
            num_chunks: pool.len(),
            update,
        };
        info!(
            run = %self.run_id,
            iteration,
            mean_reward = stats.mean_episode_reward(),
            chunks = stats.num_chunks,
            policy_loss = update.policy_loss,
            critic_loss = update.critic_loss,
            entropy = update.entropy,
            clip_fraction = update.clip_fraction,
            "iteration complete"
        );

        if let Some(history) = &mut self.reward_history {
            history.record(&stats.episodes)?;
        }
        if let Some(checkpointer) = &self.checkpointer {
            if checkpointer.is_due(iteration) {
                checkpointer.save_pair(&self.policy, &self.critic)?;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CRITIC_CHECKPOINT, POLICY_CHECKPOINT};
    use crate::history;
    use crate::reward::SoccerReward;
    use crate::simulation::{SimConfig, SoccerSim};
    use tempfile::tempdir;

    fn configs() -> (RolloutConfig, TrainingConfig) {
        (
            RolloutConfig {
                num_agents: 2,
                num_opponents: 2,
                max_timesteps: 21,
                hidden_size: 8,
                ..Default::default()
            },
            TrainingConfig {
                batch_size: 2,
                chunk_length: 5,
                mini_batch_size: 4,
                max_iterations: 2,
                ..Default::default()
            },
        )
    }

    #[test]
    fn trains_on_simulator() {
        let (rollout, training) = configs();
        let layout = rollout.state_layout();
        let mut sim = SoccerSim::new(layout, SimConfig::default()).unwrap();
        let mut reward = SoccerReward::new(layout);
        let mut trainer = MAPPOTrainer::new(rollout, training, Device::Cpu).unwrap();

        let history = trainer.train(&mut sim, &mut reward).unwrap();
        assert_eq!(history.len(), 2);
        for (i, stats) in history.iter().enumerate() {
            assert_eq!(stats.iteration, i);
            assert_eq!(stats.episodes.len(), 2);
            assert!(stats.episodes.iter().all(|e| e.timesteps == 20));
            assert_eq!(stats.num_chunks, 8);
            assert!(stats.update.policy_loss.is_finite());
        }
    }

    #[test]
    fn rejects_chunks_longer_than_episodes() {
        let (rollout, training) = configs();
        let training = TrainingConfig {
            chunk_length: 50,
            ..training
        };
        assert!(matches!(
            MAPPOTrainer::new(rollout, training, Device::Cpu),
            Err(TrainingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn checkpoints_every_iteration_and_resumes() {
        let dir = tempdir().unwrap();
        let (rollout, training) = configs();
        let layout = rollout.state_layout();
        let mut sim = SoccerSim::new(layout, SimConfig::default()).unwrap();
        let mut reward = SoccerReward::new(layout);

        let mut trainer = MAPPOTrainer::new(rollout.clone(), training.clone(), Device::Cpu)
            .unwrap()
            .with_checkpointer(Checkpointer::new(dir.path()).unwrap());
        trainer.train_iteration(0, &mut sim, &mut reward).unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        assert!(checkpointer.exists(POLICY_CHECKPOINT));
        assert!(checkpointer.exists(CRITIC_CHECKPOINT));

        let mut resumed = MAPPOTrainer::new(rollout, training, Device::Cpu)
            .unwrap()
            .with_checkpointer(checkpointer);
        resumed.resume().unwrap();
    }

    #[test]
    fn resume_without_checkpointer_fails() {
        let (rollout, training) = configs();
        let mut trainer = MAPPOTrainer::new(rollout, training, Device::Cpu).unwrap();
        assert!(trainer.resume().is_err());
    }

    #[test]
    fn resume_from_empty_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let (rollout, training) = configs();
        let mut trainer = MAPPOTrainer::new(rollout, training, Device::Cpu)
            .unwrap()
            .with_checkpointer(Checkpointer::new(dir.path()).unwrap());
        assert!(matches!(
            trainer.resume(),
            Err(TrainingError::Checkpoint { .. })
        ));
    }

    #[test]
    fn appends_mean_reward_of_every_episode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rewards.csv");
        let (rollout, training) = configs();
        let layout = rollout.state_layout();
        let mut sim = SoccerSim::new(layout, SimConfig::default()).unwrap();
        let mut reward = SoccerReward::new(layout);
        let mut trainer = MAPPOTrainer::new(rollout, training, Device::Cpu)
            .unwrap()
            .with_reward_history(RewardHistory::open(&path).unwrap());

        let stats = trainer.train(&mut sim, &mut reward).unwrap();
        let records = history::load(&path).unwrap();
        assert_eq!(records.len(), 4);
        let expected: Vec<f32> = stats
            .iter()
            .flat_map(|s| s.episodes.iter().map(|e| e.mean_step_reward()))
            .collect();
        for (i, (record, mean)) in records.iter().zip(&expected).enumerate() {
            assert_eq!(record.episode, i);
            assert!((record.mean_reward - mean).abs() < 1e-5);
        }
        assert_eq!(trainer.reward_history().map(|h| h.next_episode()), Some(4));
    }
}
