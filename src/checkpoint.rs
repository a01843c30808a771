//! Saving and loading named parameter sets.
//!
//! Each network is stored as `<dir>/<name>.ot` in libtorch's format.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::{Result, TrainingError};
use crate::network::TorchNetwork;

pub const POLICY_CHECKPOINT: &str = "policy";
pub const CRITIC_CHECKPOINT: &str = "critic";

/// Writes and reads network parameters in one directory.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
    /// Save every `save_every` iterations; 0 disables periodic saving.
    save_every: usize,
}

impl Checkpointer {
    /// Creates the directory if needed. Saves after every iteration by default.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, save_every: 1 })
    }

    pub fn save_every(mut self, iterations: usize) -> Self {
        self.save_every = iterations;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.ot"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// True if iteration `iteration` (0-based) is due for a save.
    pub fn is_due(&self, iteration: usize) -> bool {
        self.save_every > 0 && (iteration + 1) % self.save_every == 0
    }

    pub fn save<N: TorchNetwork>(&self, name: &str, network: &N) -> Result<PathBuf> {
        let path = self.path(name);
        network
            .var_store()
            .save(&path)
            .map_err(|source| TrainingError::Checkpoint {
                path: path.clone(),
                action: "saved",
                source,
            })?;
        info!(checkpoint = %path.display(), "saved parameters");
        Ok(path)
    }

    /// Loads `name` into `network` in place.
    ///
    /// Optimizers built on the network keep working since values are copied
    /// into the existing variables.
    pub fn load<N: TorchNetwork>(&self, name: &str, network: &mut N) -> Result<()> {
        let path = self.path(name);
        if let Err(source) = network.var_store_mut().load(&path) {
            error!(checkpoint = %path.display(), error = %source, "failed to load parameters");
            return Err(TrainingError::Checkpoint {
                path,
                action: "loaded",
                source,
            });
        }
        info!(checkpoint = %path.display(), "loaded parameters");
        Ok(())
    }

    pub fn save_pair<P, C>(&self, policy: &P, critic: &C) -> Result<()>
    where
        P: TorchNetwork,
        C: TorchNetwork,
    {
        self.save(POLICY_CHECKPOINT, policy)?;
        self.save(CRITIC_CHECKPOINT, critic)?;
        Ok(())
    }

    pub fn load_pair<P, C>(&self, policy: &mut P, critic: &mut C) -> Result<()>
    where
        P: TorchNetwork,
        C: TorchNetwork,
    {
        self.load(POLICY_CHECKPOINT, policy)?;
        self.load(CRITIC_CHECKPOINT, critic)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{GruCritic, GruPolicy, RecurrentNetwork};
    use tch::Device;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_restores_outputs() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        let policy = GruPolicy::new(5, 8, 3, Device::Cpu);
        let critic = GruCritic::new(5, 8, Device::Cpu);
        checkpointer.save_pair(&policy, &critic).unwrap();
        assert!(checkpointer.exists(POLICY_CHECKPOINT));
        assert!(checkpointer.exists(CRITIC_CHECKPOINT));

        let mut restored_policy = policy.fresh();
        let mut restored_critic = critic.fresh();
        checkpointer
            .load_pair(&mut restored_policy, &mut restored_critic)
            .unwrap();

        let input = [0.1, 0.2, 0.3, 0.4, 0.5];
        let h = policy.initial_hidden();
        assert_eq!(
            policy.forward(&input, &h).unwrap(),
            restored_policy.forward(&input, &h).unwrap()
        );
        assert_eq!(
            critic.forward(&input, &h).unwrap(),
            restored_critic.forward(&input, &h).unwrap()
        );
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path()).unwrap();
        let mut policy = GruPolicy::new(5, 8, 3, Device::Cpu);
        let err = checkpointer.load(POLICY_CHECKPOINT, &mut policy).unwrap_err();
        match err {
            TrainingError::Checkpoint { path, action, .. } => {
                assert_eq!(action, "loaded");
                assert!(path.ends_with("policy.ot"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn save_schedule() {
        let dir = tempdir().unwrap();
        let every = Checkpointer::new(dir.path()).unwrap();
        assert!(every.is_due(0));
        let third = every.clone().save_every(3);
        assert!(!third.is_due(0));
        assert!(third.is_due(2));
        assert!(!every.save_every(0).is_due(4));
    }
}
