//! Rollout collection with per-agent recurrent state threading.

use tracing::debug;

use super::episode::{Episode, Timestep};
use crate::config::RolloutConfig;
use crate::environment::Environment;
use crate::error::{Result, TrainingError};
use crate::network::{argmax, softmax, HiddenState, RecurrentNetwork};
use crate::reward::RewardFunction;
use crate::state::{with_agent_id, StateLayout};
use crate::{generate_id, Id};

/// Drives one episode against a live environment.
///
/// The policy is shared by all agents; each agent sees the global state with
/// its own index written into the agent-id slot and keeps its own hidden
/// state. The critic sees the unmodified global state.
#[derive(Debug, Clone)]
pub struct RolloutCollector {
    config: RolloutConfig,
    layout: StateLayout,
}

impl RolloutCollector {
    pub fn new(config: RolloutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            layout: config.state_layout(),
            config,
        })
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    /// Collects one episode of `max_timesteps - 1` stored timesteps.
    ///
    /// The environment and the reward function are reset first, and the
    /// global state is read twice before the loop with the first read
    /// discarded. All agents of a timestep go through the policy as one
    /// batch.
    pub fn collect_episode<P, C, E, R>(
        &self,
        policy: &P,
        critic: &C,
        env: &mut E,
        reward_fn: &mut R,
    ) -> Result<Episode>
    where
        P: RecurrentNetwork + ?Sized,
        C: RecurrentNetwork + ?Sized,
        E: Environment + ?Sized,
        R: RewardFunction + ?Sized,
    {
        let n = self.config.num_agents;
        check_arity("policy", self.config.num_actions, policy.output_size())?;
        check_arity("critic", 1, critic.output_size())?;

        let id: Id = generate_id();
        env.reset();
        reward_fn.reset();

        // The first read after a reset may be stale.
        let _ = env.read_global_state();
        let mut state = env.read_global_state();
        self.layout.check(&state)?;

        let initial_policy_hidden = vec![policy.initial_hidden(); n];
        let initial_critic_hidden = critic.initial_hidden();
        let mut policy_hidden = initial_policy_hidden.clone();
        let mut critic_hidden = initial_critic_hidden.clone();
        let mut timesteps = Vec::with_capacity(self.config.episode_len());

        for _ in 1..self.config.max_timesteps {
            let (value, next_critic_hidden) = critic.forward(&state, &critic_hidden)?;
            check_output("critic", 1, &value)?;

            let agent_states: Vec<Vec<f32>> =
                (0..n).map(|agent| with_agent_id(&state, agent)).collect();
            let outputs = policy.forward_batch(&agent_states, &policy_hidden)?;
            check_arity("policy", n, outputs.len())?;
            let mut action_probabilities = Vec::with_capacity(n);
            let mut next_policy_hidden: Vec<HiddenState> = Vec::with_capacity(n);
            for (logits, next_hidden) in outputs {
                check_output("policy", self.config.num_actions, &logits)?;
                action_probabilities.push(softmax(&logits));
                next_policy_hidden.push(next_hidden);
            }
            let actions: Vec<usize> = action_probabilities.iter().map(|p| argmax(p)).collect();

            env.send_actions(&actions);

            let next_state = env.read_global_state();
            self.layout.check(&next_state)?;
            let rewards = reward_fn.compute_rewards(&next_state, &self.config.reward_weights)?;
            if rewards.len() != n {
                return Err(TrainingError::RewardArity {
                    expected: n,
                    actual: rewards.len(),
                });
            }

            timesteps.push(Timestep {
                global_state: std::mem::replace(&mut state, next_state),
                actions,
                action_probabilities,
                rewards,
                critic_value: value[0],
                policy_hidden: next_policy_hidden.clone(),
                critic_hidden: next_critic_hidden.clone(),
            });
            policy_hidden = next_policy_hidden;
            critic_hidden = next_critic_hidden;
        }

        let episode = Episode {
            id,
            initial_policy_hidden,
            initial_critic_hidden,
            timesteps,
        };
        debug!(
            episode = %episode.id,
            timesteps = episode.len(),
            total_reward = episode.total_reward(),
            "collected episode"
        );
        Ok(episode)
    }
}

fn check_arity(network: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TrainingError::OutputArity {
            network,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_output(network: &'static str, expected: usize, output: &[f32]) -> Result<()> {
    check_arity(network, expected, output.len())?;
    if output.iter().any(|x| !x.is_finite()) {
        return Err(TrainingError::NonFiniteOutput { network });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod stubs {
    use super::*;
    use crate::environment::{ActuationSink, StateSource};
    use std::cell::Cell;
    use crate::reward::RewardWeights;

    /// Picks the action equal to the agent id and counts steps in its hidden state.
    pub struct EchoPolicy {
        pub num_actions: usize,
    }

    impl RecurrentNetwork for EchoPolicy {
        fn hidden_size(&self) -> usize {
            1
        }

        fn output_size(&self) -> usize {
            self.num_actions
        }

        fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)> {
            let agent = input[0] as usize % self.num_actions;
            let mut logits = vec![0.0; self.num_actions];
            logits[agent] = 5.0;
            Ok((logits, HiddenState::from(vec![hidden.as_slice()[0] + 1.0])))
        }
    }

    /// Wraps [`EchoPolicy`] and counts how it is called.
    pub struct CallCountingPolicy {
        pub inner: EchoPolicy,
        pub singles: Cell<usize>,
        pub batches: Cell<usize>,
    }

    impl RecurrentNetwork for CallCountingPolicy {
        fn hidden_size(&self) -> usize {
            self.inner.hidden_size()
        }

        fn output_size(&self) -> usize {
            self.inner.output_size()
        }

        fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)> {
            self.singles.set(self.singles.get() + 1);
            self.inner.forward(input, hidden)
        }

        fn forward_batch(
            &self,
            inputs: &[Vec<f32>],
            hidden: &[HiddenState],
        ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
            self.batches.set(self.batches.get() + 1);
            self.inner.forward_batch(inputs, hidden)
        }
    }

    /// Returns the tick slot of the state as its value.
    pub struct TickCritic;

    impl RecurrentNetwork for TickCritic {
        fn hidden_size(&self) -> usize {
            1
        }

        fn output_size(&self) -> usize {
            1
        }

        fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)> {
            Ok((
                vec![input[1]],
                HiddenState::from(vec![hidden.as_slice()[0] + 1.0]),
            ))
        }
    }

    /// Environment whose state carries the read counter in slot 1.
    pub struct CountingEnv {
        pub dim: usize,
        pub reads: usize,
        pub resets: usize,
        pub sent: Vec<Vec<usize>>,
    }

    impl CountingEnv {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                reads: 0,
                resets: 0,
                sent: Vec::new(),
            }
        }
    }

    impl StateSource for CountingEnv {
        fn read_global_state(&mut self) -> Vec<f32> {
            self.reads += 1;
            let mut state = vec![0.0; self.dim];
            state[1] = self.reads as f32;
            state
        }
    }

    impl ActuationSink for CountingEnv {
        fn reset(&mut self) {
            self.resets += 1;
            self.reads = 0;
        }

        fn send_actions(&mut self, actions: &[usize]) {
            self.sent.push(actions.to_vec());
        }
    }

    pub struct ConstantReward {
        pub agents: usize,
    }

    impl RewardFunction for ConstantReward {
        fn compute_rewards(&mut self, _state: &[f32], _weights: &RewardWeights) -> Result<Vec<f32>> {
            Ok(vec![1.0; self.agents])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stubs::*;
    use super::*;
    use std::cell::Cell;

    fn config() -> RolloutConfig {
        RolloutConfig {
            num_agents: 3,
            num_opponents: 1,
            max_timesteps: 6,
            ..Default::default()
        }
    }

    fn collect(config: &RolloutConfig, env: &mut CountingEnv) -> Result<Episode> {
        let collector = RolloutCollector::new(config.clone())?;
        collector.collect_episode(
            &EchoPolicy {
                num_actions: config.num_actions,
            },
            &TickCritic,
            env,
            &mut ConstantReward {
                agents: config.num_agents,
            },
        )
    }

    #[test]
    fn episode_length_and_arity() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim());
        let episode = collect(&cfg, &mut env).unwrap();
        assert_eq!(episode.len(), cfg.max_timesteps - 1);
        for t in &episode.timesteps {
            assert_eq!(t.actions.len(), cfg.num_agents);
            assert_eq!(t.rewards.len(), cfg.num_agents);
            assert_eq!(t.policy_hidden.len(), cfg.num_agents);
            assert_eq!(t.action_probabilities.len(), cfg.num_agents);
        }
        assert_eq!(env.resets, 1);
        assert_eq!(env.sent.len(), cfg.max_timesteps - 1);
    }

    #[test]
    fn double_read_discards_first_state() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim());
        let episode = collect(&cfg, &mut env).unwrap();
        assert_eq!(env.reads, 2 + episode.len());
        assert_eq!(episode.timesteps[0].global_state[1], 2.0);
        assert_eq!(episode.timesteps[0].critic_value, 2.0);
        assert_eq!(episode.timesteps[1].global_state[1], 3.0);
    }

    #[test]
    fn agent_id_reaches_policy_but_not_critic() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim());
        let episode = collect(&cfg, &mut env).unwrap();
        for t in &episode.timesteps {
            assert_eq!(t.actions, vec![0, 1, 2]);
            assert_eq!(t.global_state[0], 0.0);
        }
        assert_eq!(env.sent[0], vec![0, 1, 2]);
    }

    #[test]
    fn hidden_state_is_threaded() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim());
        let episode = collect(&cfg, &mut env).unwrap();
        for (t, step) in episode.timesteps.iter().enumerate() {
            let expected = HiddenState::from(vec![t as f32 + 1.0]);
            assert!(step.policy_hidden.iter().all(|h| *h == expected));
            assert_eq!(step.critic_hidden, expected);
        }
        assert!(episode
            .initial_policy_hidden
            .iter()
            .all(|h| *h == HiddenState::zeros(1)));
    }

    #[test]
    fn agents_of_a_timestep_share_one_batch() {
        let cfg = config();
        let collector = RolloutCollector::new(cfg.clone()).unwrap();
        let mut env = CountingEnv::new(cfg.state_dim());
        let policy = CallCountingPolicy {
            inner: EchoPolicy {
                num_actions: cfg.num_actions,
            },
            singles: Cell::new(0),
            batches: Cell::new(0),
        };
        let episode = collector
            .collect_episode(
                &policy,
                &TickCritic,
                &mut env,
                &mut ConstantReward {
                    agents: cfg.num_agents,
                },
            )
            .unwrap();
        assert_eq!(policy.batches.get(), episode.len());
        // The single-row path of the wrapper is never taken.
        assert_eq!(policy.singles.get(), 0);
        assert_eq!(episode.timesteps[0].actions, vec![0, 1, 2]);
    }

    #[test]
    fn probabilities_are_normalized() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim());
        let episode = collect(&cfg, &mut env).unwrap();
        for p in &episode.timesteps[0].action_probabilities {
            assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn wrong_state_dimension_fails() {
        let cfg = config();
        let mut env = CountingEnv::new(cfg.state_dim() + 1);
        assert!(matches!(
            collect(&cfg, &mut env),
            Err(TrainingError::StateDimension { .. })
        ));
    }

    #[test]
    fn wrong_reward_arity_fails() {
        let cfg = config();
        let collector = RolloutCollector::new(cfg.clone()).unwrap();
        let mut env = CountingEnv::new(cfg.state_dim());
        let err = collector
            .collect_episode(
                &EchoPolicy { num_actions: 5 },
                &TickCritic,
                &mut env,
                &mut ConstantReward { agents: 2 },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::RewardArity {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn policy_with_wrong_action_count_is_rejected() {
        let cfg = config();
        let collector = RolloutCollector::new(cfg.clone()).unwrap();
        let mut env = CountingEnv::new(cfg.state_dim());
        let err = collector
            .collect_episode(
                &EchoPolicy { num_actions: 4 },
                &TickCritic,
                &mut env,
                &mut ConstantReward { agents: 3 },
            )
            .unwrap_err();
        assert!(matches!(err, TrainingError::OutputArity { .. }));
        assert!(env.sent.is_empty());
    }
}
