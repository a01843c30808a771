//! Boundary between the training pipeline and the robots.
//!
//! A live deployment implements these traits over the vision/referee feed and
//! the radio link; [`crate::simulation::SoccerSim`] implements both for
//! offline training.

/// Source of global state vectors.
pub trait StateSource {
    /// Returns the current global state.
    ///
    /// May return a stale value on the first call after a reset; the
    /// collector reads twice before each episode.
    fn read_global_state(&mut self) -> Vec<f32>;
}

/// Dispatches discrete action ids to the controlled robots.
pub trait ActuationSink {
    /// Starts a new episode. The default does nothing.
    fn reset(&mut self) {}

    /// Sends one action id per agent, ordered by agent index.
    ///
    /// This is the only blocking point of a rollout and paces the loop to
    /// real time.
    fn send_actions(&mut self, actions: &[usize]);
}

/// An environment is anything that can both be observed and commanded.
pub trait Environment: StateSource + ActuationSink {}

impl<T: StateSource + ActuationSink> Environment for T {}
