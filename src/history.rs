//! Per-episode reward history on disk.
//!
//! One `episode,mean_reward` row per collected episode, appended as
//! training runs. Episode numbers continue across reopenings of the same
//! file, so a resumed run extends the curve of the run it resumes.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TrainingError};
use crate::training::metrics::EpisodeStats;

/// One row of the history file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardRecord {
    pub episode: usize,
    pub mean_reward: f32,
}

/// Appends mean episode rewards to a comma-separated file.
#[derive(Debug, Clone)]
pub struct RewardHistory {
    path: PathBuf,
    next_episode: usize,
}

impl RewardHistory {
    /// Opens `path` for appending, creating parent directories if needed.
    ///
    /// An existing file is parsed first and numbering resumes after its
    /// last row; a malformed file is rejected rather than extended.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let next_episode = if path.is_file() {
            load(&path)?.last().map_or(0, |record| record.episode + 1)
        } else {
            0
        };
        info!(history = %path.display(), next_episode, "opened reward history");
        Ok(Self { path, next_episode })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Episode number the next appended row will carry.
    pub fn next_episode(&self) -> usize {
        self.next_episode
    }

    /// Appends one row and returns its episode number.
    pub fn append(&mut self, mean_reward: f32) -> Result<usize> {
        let episode = self.next_episode;
        self.write_rows(&[mean_reward])?;
        Ok(episode)
    }

    /// Appends the mean step reward of every episode, in order.
    pub fn record(&mut self, episodes: &[EpisodeStats]) -> Result<()> {
        let rewards: Vec<f32> = episodes.iter().map(EpisodeStats::mean_step_reward).collect();
        self.write_rows(&rewards)
    }

    fn write_rows(&mut self, rewards: &[f32]) -> Result<()> {
        if rewards.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for reward in rewards {
            writeln!(writer, "{},{}", self.next_episode, reward)?;
            self.next_episode += 1;
        }
        writer.flush()?;
        debug!(
            history = %self.path.display(),
            rows = rewards.len(),
            next_episode = self.next_episode,
            "appended rewards"
        );
        Ok(())
    }
}

/// Reads every row of a history file. Blank lines are skipped.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<RewardRecord>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_row(line).ok_or_else(|| TrainingError::MalformedHistory {
                path: path.to_path_buf(),
                line: index + 1,
            })
        })
        .collect()
}

fn parse_row(line: &str) -> Option<RewardRecord> {
    let (episode, mean_reward) = line.trim().split_once(',')?;
    Some(RewardRecord {
        episode: episode.trim().parse().ok()?,
        mean_reward: mean_reward.trim().parse().ok()?,
    })
}
