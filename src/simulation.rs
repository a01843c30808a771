//! Kinematic robot-football simulator.
//!
//! [`SoccerSim`] implements both [`StateSource`] and [`ActuationSink`] so the
//! collector can be driven offline. The own team attacks toward `+x`; the
//! opponents follow a scripted ball-chasing heuristic.
//!
//! # Model
//!
//! * Own robots translate along their heading or rotate in place, one
//!   discrete [`Action`] per tick.
//! * A free ball rolls with exponential friction and bounces off the walls.
//! * The nearest robot within `possession_radius` takes a free ball and
//!   dribbles it in front of itself. A robot of the other team inside that
//!   radius knocks the ball loose with probability `steal_probability`.
//! * A ball crossing an end line inside the goal mouth scores; positions are
//!   then reset to the kickoff formation.

use std::f32::consts::PI;
use std::time::Duration;

use qtty::{Quantity, Second};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::environment::{ActuationSink, StateSource};
use crate::error::{Result, TrainingError};
use crate::state::{RobotObservation, StateLayout, WorldObservation};
use crate::types::{Action, Position, Team};

/// Simulator parameters. Lengths are in metres, speeds in metres per second.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimConfig {
    pub half_length: f32,
    pub half_width: f32,
    pub goal_half_width: f32,
    /// Simulated time advanced by one `send_actions` call.
    pub tick: Quantity<Second>,
    /// Length of one stage; the remaining time is part of the state.
    pub stage_duration: Quantity<Second>,
    pub robot_speed: f32,
    /// Rotation speed in radians per second.
    pub turn_rate: f32,
    pub opponent_speed: f32,
    pub possession_radius: f32,
    pub steal_probability: f64,
    /// Speed given to a ball that is knocked loose.
    pub kick_speed: f32,
    /// Fraction of ball speed lost per second.
    pub ball_friction: f32,
    /// Maximum kickoff jitter applied to every robot on reset.
    pub kickoff_jitter: f32,
    /// Sleep for `tick` on every `send_actions` call.
    pub real_time: bool,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            half_length: 4.5,
            half_width: 3.0,
            goal_half_width: 0.5,
            tick: Quantity::<Second>::new(0.05),
            stage_duration: Quantity::<Second>::new(300.0),
            robot_speed: 1.5,
            turn_rate: 3.0,
            opponent_speed: 0.8,
            possession_radius: 0.15,
            steal_probability: 0.2,
            kick_speed: 2.0,
            ball_friction: 0.6,
            kickoff_jitter: 0.1,
            real_time: false,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("half_length", self.half_length as f64),
            ("half_width", self.half_width as f64),
            ("goal_half_width", self.goal_half_width as f64),
            ("tick", self.tick.value()),
            ("stage_duration", self.stage_duration.value()),
            ("possession_radius", self.possession_radius as f64),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrainingError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.goal_half_width > self.half_width {
            return Err(TrainingError::InvalidConfig(
                "goal mouth is wider than the field".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.steal_probability) {
            return Err(TrainingError::InvalidConfig(
                "steal_probability must lie in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ball_friction) {
            return Err(TrainingError::InvalidConfig(
                "ball_friction must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Robot {
    position: Position,
    orientation: f32,
}

impl Robot {
    fn heading(&self) -> (f32, f32) {
        (self.orientation.cos(), self.orientation.sin())
    }

    fn advance(&mut self, distance: f32) {
        let (hx, hy) = self.heading();
        self.position.x += hx * distance;
        self.position.y += hy * distance;
    }
}

/// Kinematic two-team football field.
#[derive(Debug)]
pub struct SoccerSim {
    config: SimConfig,
    layout: StateLayout,
    own: Vec<Robot>,
    opponents: Vec<Robot>,
    ball: Position,
    ball_velocity: (f32, f32),
    possession: Option<(Team, usize)>,
    goals_for: u32,
    goals_against: u32,
    time_remaining: f64,
    rng: StdRng,
}

impl SoccerSim {
    /// Creates a simulator for the team sizes of `layout`, at kickoff.
    pub fn new(layout: StateLayout, config: SimConfig) -> Result<Self> {
        config.validate()?;
        let mut sim = Self {
            rng: StdRng::seed_from_u64(config.seed),
            time_remaining: config.stage_duration.value(),
            own: Vec::with_capacity(layout.own_team()),
            opponents: Vec::with_capacity(layout.opponents()),
            config,
            layout,
            ball: Position::default(),
            ball_velocity: (0.0, 0.0),
            possession: None,
            goals_for: 0,
            goals_against: 0,
        };
        sim.kickoff();
        Ok(sim)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// `(own goals, opponent goals)` in the current stage.
    pub fn score(&self) -> (u32, u32) {
        (self.goals_for, self.goals_against)
    }

    pub fn time_remaining(&self) -> Quantity<Second> {
        Quantity::<Second>::new(self.time_remaining)
    }

    pub fn ball(&self) -> Position {
        self.ball
    }

    pub fn possession(&self) -> Option<(Team, usize)> {
        self.possession
    }

    fn kickoff(&mut self) {
        let hl = self.config.half_length;
        let hw = self.config.half_width;
        let jitter = self.config.kickoff_jitter;
        let n = self.layout.own_team();
        let m = self.layout.opponents();

        let line = |count: usize, x: f32, orientation: f32, rng: &mut StdRng| {
            (0..count)
                .map(|i| {
                    let y = -hw + (i + 1) as f32 * 2.0 * hw / (count + 1) as f32;
                    let (jx, jy) = if jitter > 0.0 {
                        (rng.gen_range(-jitter..jitter), rng.gen_range(-jitter..jitter))
                    } else {
                        (0.0, 0.0)
                    };
                    let mut position = Position::new(x + jx, y + jy);
                    position.clamp_to_field(hl, hw);
                    Robot {
                        position,
                        orientation,
                    }
                })
                .collect::<Vec<_>>()
        };
        self.own = line(n, -hl * 0.5, 0.0, &mut self.rng);
        self.opponents = line(m, hl * 0.5, PI, &mut self.rng);
        self.ball = Position::default();
        self.ball_velocity = (0.0, 0.0);
        self.possession = None;
    }

    fn step(&mut self, actions: &[usize]) {
        let dt = self.config.tick.value() as f32;

        for (i, robot) in self.own.iter_mut().enumerate() {
            let action = match actions.get(i).copied().map(Action::from_id) {
                Some(Some(action)) => action,
                Some(None) => {
                    warn!(agent = i, id = actions[i], "unknown action id, robot stops");
                    Action::Stop
                }
                None => Action::Stop,
            };
            match action {
                Action::Stop => {}
                Action::Forward => robot.advance(self.config.robot_speed * dt),
                Action::Backward => robot.advance(-self.config.robot_speed * dt),
                Action::RotateLeft => {
                    robot.orientation = wrap_angle(robot.orientation + self.config.turn_rate * dt)
                }
                Action::RotateRight => {
                    robot.orientation = wrap_angle(robot.orientation - self.config.turn_rate * dt)
                }
            }
            robot
                .position
                .clamp_to_field(self.config.half_length, self.config.half_width);
        }

        let own_goal = Position::new(-self.config.half_length, 0.0);
        for (j, robot) in self.opponents.iter_mut().enumerate() {
            let target = if self.possession == Some((Team::Opponent, j)) {
                own_goal
            } else {
                self.ball
            };
            let (dx, dy) = robot.position.direction_to(&target);
            if dx != 0.0 || dy != 0.0 {
                robot.orientation = dy.atan2(dx);
                robot.advance(self.config.opponent_speed * dt);
            }
            robot
                .position
                .clamp_to_field(self.config.half_length, self.config.half_width);
        }

        self.step_ball(dt);
        self.resolve_possession();
        self.check_goal();

        self.time_remaining = (self.time_remaining - dt as f64).max(0.0);
    }

    fn robot(&self, team: Team, index: usize) -> Robot {
        match team {
            Team::Own => self.own[index],
            Team::Opponent => self.opponents[index],
        }
    }

    fn step_ball(&mut self, dt: f32) {
        if let Some((team, index)) = self.possession {
            let holder = self.robot(team, index);
            let (hx, hy) = holder.heading();
            self.ball = Position::new(
                holder.position.x + hx * self.config.possession_radius,
                holder.position.y + hy * self.config.possession_radius,
            );
            self.ball_velocity = (0.0, 0.0);
            return;
        }

        let decay = (1.0 - self.config.ball_friction * dt).max(0.0);
        self.ball_velocity.0 *= decay;
        self.ball_velocity.1 *= decay;
        self.ball.x += self.ball_velocity.0 * dt;
        self.ball.y += self.ball_velocity.1 * dt;

        let hw = self.config.half_width;
        if self.ball.y.abs() > hw {
            self.ball.y = self.ball.y.clamp(-hw, hw);
            self.ball_velocity.1 = -self.ball_velocity.1;
        }
        let hl = self.config.half_length;
        if self.ball.x.abs() > hl && self.ball.y.abs() > self.config.goal_half_width {
            self.ball.x = self.ball.x.clamp(-hl, hl);
            self.ball_velocity.0 = -self.ball_velocity.0;
        }
    }

    fn nearest_within(&self, team: Team, radius: f32) -> Option<(usize, f32)> {
        let robots = match team {
            Team::Own => &self.own,
            Team::Opponent => &self.opponents,
        };
        robots
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.position.distance_to(&self.ball)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    fn resolve_possession(&mut self) {
        // Contact tolerance so a dribbled ball stays within reach of its holder.
        let radius = self.config.possession_radius * 1.05;
        match self.possession {
            Some((team, _)) => {
                let challenger = match team {
                    Team::Own => Team::Opponent,
                    Team::Opponent => Team::Own,
                };
                if let Some((index, _)) = self.nearest_within(challenger, radius) {
                    if self.rng.gen_bool(self.config.steal_probability) {
                        let (hx, hy) = self.robot(challenger, index).heading();
                        self.possession = None;
                        self.ball_velocity =
                            (hx * self.config.kick_speed, hy * self.config.kick_speed);
                        debug!(?challenger, index, "ball knocked loose");
                    }
                }
            }
            None => {
                let own = self.nearest_within(Team::Own, radius);
                let opponent = self.nearest_within(Team::Opponent, radius);
                self.possession = match (own, opponent) {
                    (Some((i, d_own)), Some((j, d_opp))) => {
                        if d_own <= d_opp {
                            Some((Team::Own, i))
                        } else {
                            Some((Team::Opponent, j))
                        }
                    }
                    (Some((i, _)), None) => Some((Team::Own, i)),
                    (None, Some((j, _))) => Some((Team::Opponent, j)),
                    (None, None) => None,
                };
            }
        }
    }

    fn check_goal(&mut self) {
        if self.ball.y.abs() > self.config.goal_half_width {
            return;
        }
        let scorer = if self.ball.x > self.config.half_length {
            self.goals_for += 1;
            Team::Own
        } else if self.ball.x < -self.config.half_length {
            self.goals_against += 1;
            Team::Opponent
        } else {
            return;
        };
        debug!(
            ?scorer,
            goals_for = self.goals_for,
            goals_against = self.goals_against,
            "goal"
        );
        self.kickoff();
    }

    fn observe(&self) -> Vec<f32> {
        let holds = |team: Team, index: usize| self.possession == Some((team, index));
        let own: Vec<RobotObservation> = self
            .own
            .iter()
            .enumerate()
            .map(|(i, r)| RobotObservation {
                position: r.position,
                orientation: r.orientation,
                has_ball: holds(Team::Own, i),
            })
            .collect();
        let opponents: Vec<RobotObservation> = self
            .opponents
            .iter()
            .enumerate()
            .map(|(j, r)| RobotObservation {
                position: r.position,
                orientation: r.orientation,
                has_ball: holds(Team::Opponent, j),
            })
            .collect();
        let world = WorldObservation {
            ball: self.ball,
            own: &own,
            opponents: &opponents,
            goal_difference: self.goals_for as f32 - self.goals_against as f32,
            time_remaining: self.time_remaining as f32,
        };
        match self.layout.encode(&world) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "simulator state does not match its layout");
                vec![0.0; self.layout.dim()]
            }
        }
    }
}

impl StateSource for SoccerSim {
    fn read_global_state(&mut self) -> Vec<f32> {
        self.observe()
    }
}

impl ActuationSink for SoccerSim {
    fn reset(&mut self) {
        self.goals_for = 0;
        self.goals_against = 0;
        self.time_remaining = self.config.stage_duration.value();
        self.kickoff();
    }

    fn send_actions(&mut self, actions: &[usize]) {
        if self.config.real_time {
            std::thread::sleep(Duration::from_secs_f64(self.config.tick.value()));
        }
        self.step(actions);
    }
}

fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
