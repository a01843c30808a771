//! Trains a robot-football team with recurrent MAPPO on the built-in simulator.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=info cargo run --release --features nn --example train_demo -- --iterations 20
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tch::Device;
use tracing::info;
use tracing_subscriber::EnvFilter;

use collective_mappo::simulation::{SimConfig, SoccerSim};
use collective_mappo::{
    Checkpointer, MAPPOTrainer, RewardHistory, RolloutConfig, SoccerReward, TrainingConfig,
};

#[derive(Parser)]
#[command(name = "train_demo")]
#[command(about = "Recurrent MAPPO on the robot-football simulator", long_about = None)]
struct Args {
    /// Training iterations
    #[arg(long, default_value = "10")]
    iterations: usize,

    /// Own robots
    #[arg(long, default_value = "6")]
    agents: usize,

    /// Opponent robots
    #[arg(long, default_value = "6")]
    opponents: usize,

    /// Timestep budget per episode (episodes hold one fewer entries)
    #[arg(long, default_value = "1000")]
    max_timesteps: usize,

    /// Chunk length for truncated BPTT
    #[arg(long, default_value = "10")]
    chunk_length: usize,

    /// Episodes per iteration
    #[arg(long, default_value = "4")]
    batch_size: usize,

    /// Chunks sampled per update
    #[arg(long, default_value = "32")]
    mini_batch_size: usize,

    /// GRU hidden size
    #[arg(long, default_value = "64")]
    hidden_size: usize,

    /// Directory for policy/critic checkpoints
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Load existing checkpoints before training
    #[arg(long, requires = "checkpoint_dir")]
    resume: bool,

    /// Append `episode,mean_reward` rows to this file
    #[arg(long)]
    reward_history: Option<PathBuf>,

    /// Pace the simulator at wall-clock speed
    #[arg(long)]
    real_time: bool,

    /// Seed for the simulator and minibatch sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Run on CUDA when available
    #[arg(long)]
    cuda: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let rollout = RolloutConfig {
        num_agents: args.agents,
        num_opponents: args.opponents,
        max_timesteps: args.max_timesteps,
        hidden_size: args.hidden_size,
        ..Default::default()
    };
    let training = TrainingConfig {
        batch_size: args.batch_size,
        chunk_length: args.chunk_length,
        mini_batch_size: args.mini_batch_size,
        max_iterations: args.iterations,
        seed: args.seed,
        ..Default::default()
    };
    let device = if args.cuda {
        Device::cuda_if_available()
    } else {
        Device::Cpu
    };

    let layout = rollout.state_layout();
    let mut sim = SoccerSim::new(
        layout,
        SimConfig {
            real_time: args.real_time,
            seed: args.seed,
            ..Default::default()
        },
    )?;
    let mut reward = SoccerReward::new(layout);

    let mut trainer = MAPPOTrainer::new(rollout, training, device)?;
    if let Some(dir) = &args.checkpoint_dir {
        let checkpointer = Checkpointer::new(dir.clone())
            .with_context(|| format!("preparing checkpoint directory {}", dir.display()))?;
        trainer = trainer.with_checkpointer(checkpointer);
        if args.resume {
            trainer.resume().context("resuming from checkpoint")?;
        }
    }

    if let Some(path) = &args.reward_history {
        let history = RewardHistory::open(path.clone())
            .with_context(|| format!("opening reward history {}", path.display()))?;
        trainer = trainer.with_reward_history(history);
    }

    info!(
        run = trainer.run_id(),
        state_dim = layout.dim(),
        parameters = trainer.policy.num_parameters(),
        ?device,
        "training"
    );

    for iteration in 0..args.iterations {
        let stats = trainer.train_iteration(iteration, &mut sim, &mut reward)?;
        println!("{stats}");
    }

    let (own, opponent) = sim.score();
    println!("final score in current stage: {own} - {opponent}");
    Ok(())
}
