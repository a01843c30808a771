//! Core types shared by the environment, reward and training code.
//!
//! Defines the discrete action set, team sides and planar positions on the
//! football field.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of discrete actions a robot can take.
pub const NUM_ACTIONS: usize = 5;

/// Discrete robot command.
///
/// The id of each variant is the value dispatched to the actuation sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Action {
    Stop,
    Forward,
    Backward,
    RotateLeft,
    RotateRight,
}

impl Action {
    /// Returns all actions ordered by id.
    pub fn all() -> [Action; NUM_ACTIONS] {
        [
            Action::Stop,
            Action::Forward,
            Action::Backward,
            Action::RotateLeft,
            Action::RotateRight,
        ]
    }

    /// Returns the action for a discrete id, if it is in range.
    pub fn from_id(id: usize) -> Option<Action> {
        Self::all().get(id).copied()
    }

    /// Returns the discrete id of this action.
    pub fn id(&self) -> usize {
        match self {
            Action::Stop => 0,
            Action::Forward => 1,
            Action::Backward => 2,
            Action::RotateLeft => 3,
            Action::RotateRight => 4,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Stop => write!(f, "stop"),
            Action::Forward => write!(f, "forward"),
            Action::Backward => write!(f, "backward"),
            Action::RotateLeft => write!(f, "rotate-left"),
            Action::RotateRight => write!(f, "rotate-right"),
        }
    }
}

/// Side of the match a robot plays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Team {
    /// The team controlled by the trained policy.
    Own,
    Opponent,
}

/// A 2D position on the field, in metres, with the origin at the centre spot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Returns the unit direction vector from `self` toward `target`.
    ///
    /// Returns `(0, 0)` if positions are coincident.
    pub fn direction_to(&self, target: &Position) -> (f32, f32) {
        let dx = target.x - self.x;
        let dy = target.y - self.y;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < 1e-6 {
            (0.0, 0.0)
        } else {
            (dx / dist, dy / dist)
        }
    }

    /// Cosine of the angle between a heading and the direction to `target`.
    ///
    /// 1 when facing the target, -1 when facing away, 0 if coincident.
    pub fn facing_alignment(&self, heading: f32, target: &Position) -> f32 {
        let (dx, dy) = self.direction_to(target);
        heading.cos() * dx + heading.sin() * dy
    }

    /// Clamps this position to `[-half_length, half_length] × [-half_width, half_width]`.
    pub fn clamp_to_field(&mut self, half_length: f32, half_width: f32) {
        self.x = self.x.clamp(-half_length, half_length);
        self.y = self.y.clamp(-half_width, half_width);
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ids_round_trip() {
        for action in Action::all() {
            assert_eq!(Action::from_id(action.id()), Some(action));
        }
        assert_eq!(Action::from_id(NUM_ACTIONS), None);
    }

    #[test]
    fn action_ids_match_actuation_mapping() {
        assert_eq!(Action::Stop.id(), 0);
        assert_eq!(Action::Forward.id(), 1);
        assert_eq!(Action::Backward.id(), 2);
        assert_eq!(Action::RotateLeft.id(), 3);
        assert_eq!(Action::RotateRight.id(), 4);
    }

    #[test]
    fn position_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn facing_alignment_extremes() {
        let p = Position::new(0.0, 0.0);
        let target = Position::new(1.0, 0.0);
        assert!((p.facing_alignment(0.0, &target) - 1.0).abs() < 1e-6);
        assert!((p.facing_alignment(std::f32::consts::PI, &target) + 1.0).abs() < 1e-6);
        assert_eq!(p.facing_alignment(0.0, &p), 0.0);
    }

    #[test]
    fn position_clamp() {
        let mut p = Position::new(-6.0, 4.0);
        p.clamp_to_field(4.5, 3.0);
        assert_eq!(p, Position::new(-4.5, 3.0));
    }
}
