//! Fixed-length chunking for truncated backpropagation through time.
//!
//! An episode of `T` timesteps yields `floor(T / L)` chunks; a trailing
//! remainder shorter than `L` is dropped. Every chunk copies the hidden
//! states stored in its first timestep and replays from them.

use rand::Rng;
use rayon::prelude::*;

use super::episode::{Episode, Timestep};
use super::gae::{annotate, Annotations};
use crate::error::{Result, TrainingError};
use crate::network::HiddenState;
use crate::Id;

/// A contiguous window of one episode with its training targets.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub episode_id: Id,
    /// Absolute index of the first timestep in the episode.
    pub start: usize,
    pub timesteps: Vec<Timestep>,
    /// Advantages indexed `[agent][t]`, `t` relative to `start`.
    pub advantage: Vec<Vec<f32>>,
    /// Reward-to-go indexed `[agent][t]`, `t` relative to `start`.
    pub reward_to_go: Vec<Vec<f32>>,
    /// Per-agent policy hidden state stored in the first timestep.
    pub policy_anchor: Vec<HiddenState>,
    /// Critic hidden state stored in the first timestep.
    pub critic_anchor: HiddenState,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    pub fn num_agents(&self) -> usize {
        self.policy_anchor.len()
    }
}

/// Splits an annotated episode into chunks of `chunk_length` timesteps.
pub fn split_episode(
    episode: &Episode,
    annotations: &Annotations,
    chunk_length: usize,
) -> Result<Vec<Chunk>> {
    if chunk_length == 0 {
        return Err(TrainingError::InvalidConfig(
            "chunk_length must be at least 1".to_string(),
        ));
    }
    let agents_match = annotations.advantage.len() == episode.num_agents()
        && annotations.reward_to_go.len() == episode.num_agents();
    let lengths_match = annotations
        .advantage
        .iter()
        .chain(&annotations.reward_to_go)
        .all(|row| row.len() == episode.len());
    if !agents_match || !lengths_match {
        return Err(TrainingError::AnnotationLength {
            expected: episode.len(),
            actual: annotations.len(),
        });
    }

    let num_chunks = episode.len() / chunk_length;
    let chunks = (0..num_chunks)
        .map(|k| {
            let range = k * chunk_length..(k + 1) * chunk_length;
            let first = &episode.timesteps[range.start];
            Chunk {
                episode_id: episode.id.clone(),
                start: range.start,
                timesteps: episode.timesteps[range.clone()].to_vec(),
                advantage: slice_rows(&annotations.advantage, range.clone()),
                reward_to_go: slice_rows(&annotations.reward_to_go, range.clone()),
                policy_anchor: first.policy_hidden.clone(),
                critic_anchor: first.critic_hidden.clone(),
            }
        })
        .collect();
    Ok(chunks)
}

fn slice_rows(rows: &[Vec<f32>], range: std::ops::Range<usize>) -> Vec<Vec<f32>> {
    rows.iter().map(|row| row[range.clone()].to_vec()).collect()
}

/// All chunks of one training iteration. Read-only during the update.
#[derive(Debug, Clone, Default)]
pub struct ChunkPool {
    chunks: Vec<Chunk>,
}

impl ChunkPool {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Annotates and chunks every episode, in parallel across episodes.
    pub fn from_episodes(
        episodes: &[Episode],
        gamma: f64,
        gae_lambda: f64,
        chunk_length: usize,
    ) -> Result<Self> {
        let per_episode = episodes
            .par_iter()
            .map(|episode| {
                let annotations = annotate(episode, gamma, gae_lambda);
                split_episode(episode, &annotations, chunk_length)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(per_episode.into_iter().flatten().collect()))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Draws `n` chunks uniformly with replacement.
    ///
    /// Always returns exactly `n` chunks, even when `n` exceeds the pool
    /// size; fails only on an empty pool.
    pub fn sample_with_replacement<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<&Chunk>> {
        if self.chunks.is_empty() {
            return Err(TrainingError::EmptyChunkPool);
        }
        Ok((0..n)
            .map(|_| &self.chunks[rng.gen_range(0..self.chunks.len())])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::episode::fixtures::episode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp_episode(len: usize) -> Episode {
        let rewards: Vec<Vec<f32>> = (0..len).map(|t| vec![t as f32, -(t as f32)]).collect();
        let values: Vec<f32> = (0..len).map(|t| t as f32 * 0.1).collect();
        episode(&rewards, &values)
    }

    #[test]
    fn drops_trailing_remainder() {
        let ep = ramp_episode(23);
        let ann = annotate(&ep, 0.99, 0.95);
        let chunks = split_episode(&ep, &ann, 10).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[1].start, 10);
        assert!(chunks.iter().all(|c| c.len() == 10));
    }

    #[test]
    fn chunk_targets_match_episode_targets() {
        let ep = ramp_episode(23);
        let ann = annotate(&ep, 0.99, 0.95);
        let chunks = split_episode(&ep, &ann, 10).unwrap();
        for chunk in &chunks {
            for agent in 0..2 {
                for t in 0..chunk.len() {
                    assert_eq!(chunk.advantage[agent][t], ann.advantage[agent][chunk.start + t]);
                    assert_eq!(
                        chunk.reward_to_go[agent][t],
                        ann.reward_to_go[agent][chunk.start + t]
                    );
                }
            }
            assert_eq!(chunk.timesteps[0], ep.timesteps[chunk.start]);
            assert_eq!(chunk.episode_id, ep.id);
        }
    }

    #[test]
    fn anchors_are_hidden_states_of_first_timestep() {
        let ep = ramp_episode(20);
        let ann = annotate(&ep, 0.99, 0.95);
        let chunks = split_episode(&ep, &ann, 10).unwrap();
        assert_eq!(chunks[0].policy_anchor, ep.timesteps[0].policy_hidden);
        assert_eq!(chunks[0].critic_anchor, ep.timesteps[0].critic_hidden);
        assert_eq!(chunks[1].policy_anchor, ep.timesteps[10].policy_hidden);
        assert_eq!(chunks[1].critic_anchor, ep.timesteps[10].critic_hidden);
        assert_eq!(chunks[1].policy_anchor, vec![HiddenState::from(vec![11.0]); 2]);
        assert_ne!(chunks[0].policy_anchor, ep.initial_policy_hidden);
    }

    #[test]
    fn short_episode_yields_no_chunks() {
        let ep = ramp_episode(7);
        let ann = annotate(&ep, 0.99, 0.95);
        assert!(split_episode(&ep, &ann, 10).unwrap().is_empty());
    }

    #[test]
    fn mismatched_annotations_are_rejected() {
        let ep = ramp_episode(12);
        let other = annotate(&ramp_episode(11), 0.99, 0.95);
        assert!(matches!(
            split_episode(&ep, &other, 4),
            Err(TrainingError::AnnotationLength {
                expected: 12,
                actual: 11
            })
        ));
    }

    #[test]
    fn pool_collects_all_episodes() {
        let episodes = vec![ramp_episode(23), ramp_episode(9), ramp_episode(30)];
        let pool = ChunkPool::from_episodes(&episodes, 0.99, 0.95, 10).unwrap();
        assert_eq!(pool.len(), 2 + 0 + 3);
    }

    #[test]
    fn sampling_with_replacement_exceeds_pool_size() {
        let pool = ChunkPool::from_episodes(&[ramp_episode(20)], 0.99, 0.95, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let sample = pool.sample_with_replacement(16, &mut rng).unwrap();
        assert_eq!(sample.len(), 16);
    }

    #[test]
    fn sampling_empty_pool_fails() {
        let pool = ChunkPool::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            pool.sample_with_replacement(4, &mut rng),
            Err(TrainingError::EmptyChunkPool)
        ));
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let pool = ChunkPool::from_episodes(&[ramp_episode(50)], 0.99, 0.95, 5).unwrap();
        let starts = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            pool.sample_with_replacement(8, &mut rng)
                .unwrap()
                .iter()
                .map(|c| c.start)
                .collect::<Vec<_>>()
        };
        assert_eq!(starts(3), starts(3));
    }
}
