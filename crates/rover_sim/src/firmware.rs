//! Simulated rover firmware: interprets command frames, acknowledges them and
//! integrates a differential-drive pose for telemetry.

use std::f64::consts::PI;

use serde_json::{json, Value};
use shared::{
    domain::CommandSeq,
    protocol::{
        log_frame, parse_command_frame, settings_frame, telemetry_frame, wrap_command, CommandBody,
    },
};
use tracing::{debug, info, warn};

/// Wheel surface speed at full pwm, m/s.
pub const MAX_WHEEL_SPEED: f64 = 0.5;
/// Distance between the wheels, m.
pub const TRACK_WIDTH: f64 = 0.2;
const TURN_GAIN: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Radians in (-pi, pi].
    pub heading: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLoop {
    pub min_speed: f64,
    pub max_speed: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Pwm,
    Speed,
}

impl DriveMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pwm => "pwm",
            Self::Speed => "speed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Goal {
    x: f64,
    y: f64,
    tolerance: f64,
    point_forward: bool,
}

#[derive(Debug)]
pub struct Firmware {
    corrupt_every: u64,
    acks: u64,
    pose: Pose,
    mode: DriveMode,
    /// Signed wheel speeds, m/s.
    wheels: (f64, f64),
    stall: (f64, f64),
    speed_loops: [Option<SpeedLoop>; 2],
    goal: Option<Goal>,
}

impl Firmware {
    pub fn new(corrupt_every: u64) -> Self {
        Self {
            corrupt_every,
            acks: 0,
            pose: Pose::default(),
            mode: DriveMode::Pwm,
            wheels: (0.0, 0.0),
            stall: (0.0, 0.0),
            speed_loops: [None, None],
            goal: None,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn wheel_speeds(&self) -> (f64, f64) {
        self.wheels
    }

    pub fn has_goal(&self) -> bool {
        self.goal.is_some()
    }

    /// Replies for one inbound text frame, in send order.
    pub fn handle_frame(&mut self, frame: &str) -> Vec<String> {
        let (seq, body) = match parse_command_frame(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%frame, error = %err, "firmware: rejecting frame");
                return vec![log_frame(&format!("rejected: {err}"))];
            }
        };

        let mut replies = vec![self.acknowledge(seq, frame, &body)];
        replies.extend(self.apply(body));
        replies
    }

    fn acknowledge(&mut self, seq: CommandSeq, frame: &str, body: &CommandBody) -> String {
        self.acks += 1;
        if self.corrupt_every > 0 && self.acks % self.corrupt_every == 0 {
            warn!(%seq, "firmware: corrupting acknowledgment");
            return wrap_command(seq.next(), body);
        }
        frame.to_string()
    }

    fn apply(&mut self, body: CommandBody) -> Option<String> {
        debug!(command = body.name(), "firmware: applying");
        match body {
            CommandBody::Pwm {
                left,
                left_forward,
                right,
                right_forward,
            } => {
                self.mode = DriveMode::Pwm;
                self.goal = None;
                self.wheels = (
                    signed(f64::from(left) / 255.0 * MAX_WHEEL_SPEED, left_forward),
                    signed(f64::from(right) / 255.0 * MAX_WHEEL_SPEED, right_forward),
                );
                None
            }
            CommandBody::Speed {
                left,
                left_forward,
                right,
                right_forward,
            } => {
                self.mode = DriveMode::Speed;
                self.goal = None;
                self.wheels = (signed(left, left_forward), signed(right, right_forward));
                None
            }
            CommandBody::Pid {
                wheels,
                min_speed,
                max_speed,
                kp,
                ki,
                kd,
            } => {
                let speed_loop = SpeedLoop {
                    min_speed,
                    max_speed,
                    kp,
                    ki,
                    kd,
                };
                if wheels.includes_left() {
                    self.speed_loops[0] = Some(speed_loop);
                }
                if wheels.includes_right() {
                    self.speed_loops[1] = Some(speed_loop);
                }
                self.mode = DriveMode::Speed;
                Some(settings_frame(&self.settings()))
            }
            CommandBody::Stall { left, right } => {
                self.stall = (left, right);
                Some(settings_frame(&self.settings()))
            }
            CommandBody::Halt => {
                self.wheels = (0.0, 0.0);
                self.goal = None;
                Some(log_frame("halted"))
            }
            CommandBody::ResetPose => {
                self.pose = Pose::default();
                Some(log_frame("pose reset"))
            }
            CommandBody::Goto {
                x,
                y,
                tolerance,
                point_forward,
            } => {
                info!(x, y, tolerance, point_forward, "firmware: new goal");
                self.goal = Some(Goal {
                    x,
                    y,
                    tolerance,
                    point_forward,
                });
                None
            }
        }
    }

    /// Advances the simulation by `dt` seconds. Returns a log frame when a
    /// goal is reached.
    pub fn step(&mut self, dt: f64) -> Option<String> {
        let reached = match self.goal {
            Some(goal) => self.steer_towards(goal),
            None => None,
        };

        let (left, right) = self.wheels;
        let linear = (left + right) / 2.0;
        let angular = (right - left) / TRACK_WIDTH;
        self.pose.heading = wrap_angle(self.pose.heading + angular * dt);
        self.pose.x += linear * self.pose.heading.cos() * dt;
        self.pose.y += linear * self.pose.heading.sin() * dt;

        reached
    }

    fn steer_towards(&mut self, goal: Goal) -> Option<String> {
        let dx = goal.x - self.pose.x;
        let dy = goal.y - self.pose.y;
        let distance = dx.hypot(dy);
        if distance <= goal.tolerance {
            self.goal = None;
            self.wheels = (0.0, 0.0);
            info!(distance, "firmware: goal reached");
            return Some(log_frame("goal reached"));
        }

        let (target, direction) = if goal.point_forward {
            (dy.atan2(dx), 1.0)
        } else {
            (wrap_angle(dy.atan2(dx) + PI), -1.0)
        };
        let error = wrap_angle(target - self.pose.heading);
        let linear = MAX_WHEEL_SPEED * distance.min(1.0) * error.cos().max(0.0) * direction;
        let turn = error * TURN_GAIN * TRACK_WIDTH / 2.0;
        self.wheels = (
            (linear - turn).clamp(-MAX_WHEEL_SPEED, MAX_WHEEL_SPEED),
            (linear + turn).clamp(-MAX_WHEEL_SPEED, MAX_WHEEL_SPEED),
        );
        None
    }

    pub fn telemetry(&self) -> String {
        telemetry_frame(&json!({
            "x": self.pose.x,
            "y": self.pose.y,
            "heading": self.pose.heading,
            "left": self.wheels.0,
            "right": self.wheels.1,
            "mode": self.mode.as_str(),
            "goal": self.goal.map(|goal| json!({"x": goal.x, "y": goal.y})),
        }))
    }

    fn settings(&self) -> Value {
        let speed_loop = |wheel: Option<SpeedLoop>| {
            wheel.map(|l| {
                json!({
                    "min": l.min_speed,
                    "max": l.max_speed,
                    "kp": l.kp,
                    "ki": l.ki,
                    "kd": l.kd,
                })
            })
        };
        json!({
            "mode": self.mode.as_str(),
            "stall": [self.stall.0, self.stall.1],
            "pid": {
                "left": speed_loop(self.speed_loops[0]),
                "right": speed_loop(self.speed_loops[1]),
            },
        })
    }
}

fn signed(magnitude: f64, forward: bool) -> f64 {
    if forward {
        magnitude
    } else {
        -magnitude
    }
}

fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

#[cfg(test)]
#[path = "tests/firmware_tests.rs"]
mod tests;
