use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the rollout and update pipeline.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Global state has {actual} entries, expected {expected}")]
    StateDimension { expected: usize, actual: usize },

    #[error("Reward function returned {actual} rewards for {expected} agents")]
    RewardArity { expected: usize, actual: usize },

    #[error("{network} network produced {actual} outputs, expected {expected}")]
    OutputArity {
        network: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{network} network produced a non-finite output")]
    NonFiniteOutput { network: &'static str },

    #[error("Annotations cover {actual} timesteps but the episode has {expected}")]
    AnnotationLength { expected: usize, actual: usize },

    #[error("Cannot sample a minibatch from an empty chunk pool")]
    EmptyChunkPool,

    #[error("Chunks in one minibatch must share length and agent count")]
    RaggedMinibatch,

    #[error("The {loss} loss is not finite ({value})")]
    NonFiniteLoss { loss: &'static str, value: f64 },

    #[error("Reward history {path} has a malformed row at line {line}")]
    MalformedHistory { path: PathBuf, line: usize },

    #[cfg(feature = "nn")]
    #[error("Checkpoint {path} could not be {action}: {source}")]
    Checkpoint {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: tch::TchError,
    },

    #[cfg(feature = "nn")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrainingError>;
