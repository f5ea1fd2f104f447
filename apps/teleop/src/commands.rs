//! Operator line commands and how they map onto the command queue.

use client_core::{CommandQueue, HaltHandle, SpeedControlSettings};
use shared::domain::{TurtleDirection, WheelMask};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  tank <left> <right>              wheel values in [-1, 1]
  joy <throttle> <steering>        joystick axes in [-1, 1]
  turtle <dir> [percent]           queue a step: stop|forward|reverse|left|right
  goto <x> <y> [tolerance] [fwd|rev]
  pid <left|right|both> <min> <max> <kp> <ki> <kd>
  pid off
  stall <left> <right>             stall fractions in [0, 1]
  zero <dead-zone>                 dead-zone for tank and joy input
  reset                            reset the rover pose
  halt                             stop and wait for the acknowledgment
  watch                            toggle telemetry echo
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum TeleopCommand {
    Tank { left: f64, right: f64 },
    Joystick { throttle: f64, steering: f64 },
    Turtle { direction: TurtleDirection, speed_percent: f64 },
    Goto { x: f64, y: f64, tolerance: f64, point_forward: bool },
    SpeedControl { wheels: WheelMask, settings: SpeedControlSettings },
    SpeedControlOff,
    Stall { left: f64, right: f64 },
    DeadZone(f64),
    ResetPose,
    Halt,
    Watch,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{arg:?} is not a number")]
    BadNumber { arg: String },
    #[error("{0:?} is not a direction")]
    BadDirection(String),
    #[error("{0:?} is not a wheel selection (left, right, both)")]
    BadWheels(String),
}

const DEFAULT_TURTLE_PERCENT: f64 = 50.0;
const DEFAULT_GOTO_TOLERANCE: f64 = 0.05;

/// `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<TeleopCommand>, CommandParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (head.to_ascii_lowercase().as_str(), args) {
        ("tank", [left, right]) => TeleopCommand::Tank {
            left: number(left)?,
            right: number(right)?,
        },
        ("tank", _) => return Err(CommandParseError::Usage("tank <left> <right>")),
        ("joy", [throttle, steering]) => TeleopCommand::Joystick {
            throttle: number(throttle)?,
            steering: number(steering)?,
        },
        ("joy", _) => return Err(CommandParseError::Usage("joy <throttle> <steering>")),
        ("turtle", [direction, rest @ ..]) if rest.len() <= 1 => TeleopCommand::Turtle {
            direction: direction
                .parse()
                .map_err(|_| CommandParseError::BadDirection(direction.to_string()))?,
            speed_percent: match rest {
                [percent] => number(percent)?,
                _ => DEFAULT_TURTLE_PERCENT,
            },
        },
        ("turtle", _) => return Err(CommandParseError::Usage("turtle <dir> [percent]")),
        ("goto", [x, y, rest @ ..]) if rest.len() <= 2 => {
            let tolerance = match rest.first() {
                Some(tolerance) => number(tolerance)?,
                None => DEFAULT_GOTO_TOLERANCE,
            };
            let point_forward = match rest.get(1).map(|w| w.to_ascii_lowercase()) {
                None => true,
                Some(w) if w == "fwd" => true,
                Some(w) if w == "rev" => false,
                Some(_) => {
                    return Err(CommandParseError::Usage("goto <x> <y> [tolerance] [fwd|rev]"))
                }
            };
            TeleopCommand::Goto {
                x: number(x)?,
                y: number(y)?,
                tolerance,
                point_forward,
            }
        }
        ("goto", _) => {
            return Err(CommandParseError::Usage("goto <x> <y> [tolerance] [fwd|rev]"))
        }
        ("pid", [off]) if off.eq_ignore_ascii_case("off") => TeleopCommand::SpeedControlOff,
        ("pid", [wheels, min, max, kp, ki, kd]) => TeleopCommand::SpeedControl {
            wheels: wheel_mask(wheels)?,
            settings: SpeedControlSettings {
                min_speed: number(min)?,
                max_speed: number(max)?,
                kp: number(kp)?,
                ki: number(ki)?,
                kd: number(kd)?,
            },
        },
        ("pid", _) => {
            return Err(CommandParseError::Usage(
                "pid <left|right|both> <min> <max> <kp> <ki> <kd> | pid off",
            ))
        }
        ("stall", [left, right]) => TeleopCommand::Stall {
            left: number(left)?,
            right: number(right)?,
        },
        ("stall", _) => return Err(CommandParseError::Usage("stall <left> <right>")),
        ("zero", [zero]) => TeleopCommand::DeadZone(number(zero)?),
        ("zero", _) => return Err(CommandParseError::Usage("zero <dead-zone>")),
        ("reset", []) => TeleopCommand::ResetPose,
        ("halt" | "stop", []) => TeleopCommand::Halt,
        ("watch", []) => TeleopCommand::Watch,
        ("status", []) => TeleopCommand::Status,
        ("help" | "?", _) => TeleopCommand::Help,
        ("quit" | "exit", []) => TeleopCommand::Quit,
        _ => return Err(CommandParseError::Unknown(line.trim().to_string())),
    };
    Ok(Some(command))
}

fn number(word: &str) -> Result<f64, CommandParseError> {
    word.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CommandParseError::BadNumber {
            arg: word.to_string(),
        })
}

fn wheel_mask(word: &str) -> Result<WheelMask, CommandParseError> {
    match word.to_ascii_lowercase().as_str() {
        "left" => Ok(WheelMask::LEFT),
        "right" => Ok(WheelMask::RIGHT),
        "both" => Ok(WheelMask::BOTH),
        _ => Err(CommandParseError::BadWheels(word.to_string())),
    }
}

/// Operator-side input shaping that is not part of the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputState {
    pub dead_zone: f64,
    pub watch_telemetry: bool,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            dead_zone: 0.05,
            watch_telemetry: false,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Done(String),
    Halting(HaltHandle),
    Quit,
}

pub fn execute(queue: &mut CommandQueue, input: &mut InputState, command: TeleopCommand) -> Outcome {
    let zero = input.dead_zone;
    let message = match command {
        TeleopCommand::Tank { left, right } => {
            accepted(queue.send_tank_command(left, right, false, false, zero, zero))
        }
        TeleopCommand::Joystick { throttle, steering } => {
            accepted(queue.send_joystick_command(throttle, steering, false, false, zero, zero))
        }
        TeleopCommand::Turtle {
            direction,
            speed_percent,
        } => {
            if queue.enqueue_turtle_command(direction, speed_percent) {
                format!("queued {direction} at {speed_percent}%")
            } else {
                "repeat step ignored".to_string()
            }
        }
        TeleopCommand::Goto {
            x,
            y,
            tolerance,
            point_forward,
        } => accepted(queue.send_goto_goal_command(x, y, tolerance, point_forward)),
        TeleopCommand::SpeedControl { wheels, settings } => {
            match queue.sync_speed_control(wheels, true, settings) {
                Ok(_) => {
                    let params = queue.params();
                    format!(
                        "speed control on, window {}..{}",
                        params.min_speed, params.max_speed
                    )
                }
                Err(err) => format!("rejected: {err}"),
            }
        }
        TeleopCommand::SpeedControlOff => {
            let disabled = SpeedControlSettings {
                min_speed: 0.0,
                max_speed: 0.0,
                kp: 0.0,
                ki: 0.0,
                kd: 0.0,
            };
            match queue.sync_speed_control(WheelMask::BOTH, false, disabled) {
                Ok(_) => "speed control off".to_string(),
                Err(err) => format!("rejected: {err}"),
            }
        }
        TeleopCommand::Stall { left, right } => match queue.sync_motor_stall(left, right) {
            Ok(_) => format!("stall set to {left} / {right}"),
            Err(err) => format!("rejected: {err}"),
        },
        TeleopCommand::DeadZone(zero) => {
            input.dead_zone = zero.clamp(0.0, 1.0);
            format!("dead-zone {}", input.dead_zone)
        }
        TeleopCommand::ResetPose => accepted(queue.send_reset_pose_command()),
        TeleopCommand::Halt => return Outcome::Halting(queue.halt()),
        TeleopCommand::Watch => {
            input.watch_telemetry = !input.watch_telemetry;
            format!(
                "telemetry echo {}",
                if input.watch_telemetry { "on" } else { "off" }
            )
        }
        TeleopCommand::Status => status_line(queue),
        TeleopCommand::Help => HELP.to_string(),
        TeleopCommand::Quit => return Outcome::Quit,
    };
    Outcome::Done(message)
}

fn accepted(queued: bool) -> String {
    if queued {
        "queued".to_string()
    } else {
        "refused".to_string()
    }
}

pub fn status_line(queue: &CommandQueue) -> String {
    let channel = queue.channel();
    let params = queue.params();
    format!(
        "link {:?} | in flight {} | pending {}{} | turtle {} | next seq {} | mode {}",
        channel.state(),
        channel.sending().unwrap_or("-"),
        queue.pending().len(),
        if queue.pending().is_high_priority() {
            " (high)"
        } else {
            ""
        },
        queue.turtle_backlog(),
        queue.next_seq(),
        if params.use_speed_control {
            "speed"
        } else {
            "pwm"
        },
    )
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
