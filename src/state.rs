//! Global state encoding.
//!
//! The global state is a flat `Vec<f32>` shared by the critic and, after
//! agent-id injection, by the shared policy. Its layout is:
//!
//! ```text
//! [agent_id] ++ [ball_x, ball_y] ++ [own (x, y)] * N ++ [opponent (x, y)] * M
//!   ++ [goal_difference] ++ [own has_ball] * N ++ [opponent has_ball] * M
//!   ++ [own orientation] * N ++ [opponent orientation] * M ++ [time_remaining]
//! ```

use crate::error::{Result, TrainingError};
use crate::types::Position;

/// Index of the slot overwritten with the agent identifier.
pub const AGENT_ID_SLOT: usize = 0;

const BALL: usize = 1;
const OWN_POSITIONS: usize = 3;

/// Describes where every field lives inside a global state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    own_team: usize,
    opponents: usize,
}

impl StateLayout {
    /// Creates a layout for `own_team` controlled robots and `opponents` opposing robots.
    pub fn new(own_team: usize, opponents: usize) -> Self {
        Self {
            own_team,
            opponents,
        }
    }

    pub fn own_team(&self) -> usize {
        self.own_team
    }

    pub fn opponents(&self) -> usize {
        self.opponents
    }

    /// Length of a global state vector.
    pub fn dim(&self) -> usize {
        self.time_remaining_index() + 1
    }

    pub fn ball_index(&self) -> usize {
        BALL
    }

    pub fn own_position_index(&self, robot: usize) -> usize {
        OWN_POSITIONS + 2 * robot
    }

    pub fn opponent_position_index(&self, robot: usize) -> usize {
        OWN_POSITIONS + 2 * self.own_team + 2 * robot
    }

    pub fn goal_difference_index(&self) -> usize {
        OWN_POSITIONS + 2 * (self.own_team + self.opponents)
    }

    pub fn own_possession_index(&self, robot: usize) -> usize {
        self.goal_difference_index() + 1 + robot
    }

    pub fn opponent_possession_index(&self, robot: usize) -> usize {
        self.goal_difference_index() + 1 + self.own_team + robot
    }

    pub fn own_orientation_index(&self, robot: usize) -> usize {
        self.goal_difference_index() + 1 + self.own_team + self.opponents + robot
    }

    pub fn opponent_orientation_index(&self, robot: usize) -> usize {
        self.own_orientation_index(self.own_team) + robot
    }

    pub fn time_remaining_index(&self) -> usize {
        self.goal_difference_index() + 1 + 2 * (self.own_team + self.opponents)
    }

    /// Checks that `state` has this layout's length.
    pub fn check(&self, state: &[f32]) -> Result<()> {
        if state.len() != self.dim() {
            return Err(TrainingError::StateDimension {
                expected: self.dim(),
                actual: state.len(),
            });
        }
        Ok(())
    }

    /// Returns a read-only view over a state vector with this layout.
    pub fn view<'a>(&self, state: &'a [f32]) -> Result<StateView<'a>> {
        self.check(state)?;
        Ok(StateView {
            layout: *self,
            state,
        })
    }

    /// Encodes a world observation into a global state vector.
    ///
    /// The agent-id slot is left at zero.
    pub fn encode(&self, world: &WorldObservation<'_>) -> Result<Vec<f32>> {
        if world.own.len() != self.own_team || world.opponents.len() != self.opponents {
            return Err(TrainingError::InvalidConfig(format!(
                "observation has {}+{} robots but the layout expects {}+{}",
                world.own.len(),
                world.opponents.len(),
                self.own_team,
                self.opponents
            )));
        }

        let mut state = vec![0.0; self.dim()];
        state[BALL] = world.ball.x;
        state[BALL + 1] = world.ball.y;
        for (i, robot) in world.own.iter().enumerate() {
            let p = self.own_position_index(i);
            state[p] = robot.position.x;
            state[p + 1] = robot.position.y;
            state[self.own_possession_index(i)] = flag(robot.has_ball);
            state[self.own_orientation_index(i)] = robot.orientation;
        }
        for (j, robot) in world.opponents.iter().enumerate() {
            let p = self.opponent_position_index(j);
            state[p] = robot.position.x;
            state[p + 1] = robot.position.y;
            state[self.opponent_possession_index(j)] = flag(robot.has_ball);
            state[self.opponent_orientation_index(j)] = robot.orientation;
        }
        state[self.goal_difference_index()] = world.goal_difference;
        state[self.time_remaining_index()] = world.time_remaining;
        Ok(state)
    }
}

fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Returns a copy of `state` with the agent-id slot set to `agent`.
pub fn with_agent_id(state: &[f32], agent: usize) -> Vec<f32> {
    let mut agent_state = state.to_vec();
    if let Some(slot) = agent_state.get_mut(AGENT_ID_SLOT) {
        *slot = agent as f32;
    }
    agent_state
}

/// Per-robot part of a [`WorldObservation`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RobotObservation {
    pub position: Position,
    /// Heading in radians.
    pub orientation: f32,
    pub has_ball: bool,
}

/// Structured world snapshot, as produced by a vision/referee pipeline.
#[derive(Debug, Clone, Copy)]
pub struct WorldObservation<'a> {
    pub ball: Position,
    pub own: &'a [RobotObservation],
    pub opponents: &'a [RobotObservation],
    /// Own score minus opponent score.
    pub goal_difference: f32,
    /// Remaining stage time in seconds.
    pub time_remaining: f32,
}

/// Typed read access into a global state vector.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    layout: StateLayout,
    state: &'a [f32],
}

impl StateView<'_> {
    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    pub fn ball(&self) -> Position {
        Position::new(self.state[BALL], self.state[BALL + 1])
    }

    pub fn own_position(&self, robot: usize) -> Position {
        let i = self.layout.own_position_index(robot);
        Position::new(self.state[i], self.state[i + 1])
    }

    pub fn opponent_position(&self, robot: usize) -> Position {
        let i = self.layout.opponent_position_index(robot);
        Position::new(self.state[i], self.state[i + 1])
    }

    pub fn goal_difference(&self) -> f32 {
        self.state[self.layout.goal_difference_index()]
    }

    pub fn own_has_ball(&self, robot: usize) -> bool {
        self.state[self.layout.own_possession_index(robot)] > 0.5
    }

    pub fn opponent_has_ball(&self, robot: usize) -> bool {
        self.state[self.layout.opponent_possession_index(robot)] > 0.5
    }

    /// True if any opposing robot holds the ball.
    pub fn opponents_have_ball(&self) -> bool {
        (0..self.layout.opponents).any(|j| self.opponent_has_ball(j))
    }

    pub fn own_orientation(&self, robot: usize) -> f32 {
        self.state[self.layout.own_orientation_index(robot)]
    }

    pub fn opponent_orientation(&self, robot: usize) -> f32 {
        self.state[self.layout.opponent_orientation_index(robot)]
    }

    pub fn time_remaining(&self) -> f32 {
        self.state[self.layout.time_remaining_index()]
    }
}
