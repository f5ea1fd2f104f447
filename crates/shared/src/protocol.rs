//! Text grammar spoken with the rover firmware.
//!
//! Outbound frames are `cmd(<seq>, <body>)`; the firmware echoes the exact
//! frame back as its acknowledgment. Inbound frames are classified by their
//! first token: `cmd(`, `log(`, `tel(` and `set(`.

use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::{
    domain::{CommandSeq, WheelMask},
    error::ProtocolError,
};

/// WebSocket sub-protocol token the firmware accepts.
pub const DEFAULT_SUBPROTOCOL: &str = "arduino";

#[derive(Debug, Clone, PartialEq)]
pub enum CommandBody {
    Pwm {
        left: u8,
        left_forward: bool,
        right: u8,
        right_forward: bool,
    },
    Speed {
        left: f64,
        left_forward: bool,
        right: f64,
        right_forward: bool,
    },
    Pid {
        wheels: WheelMask,
        min_speed: f64,
        max_speed: f64,
        kp: f64,
        ki: f64,
        kd: f64,
    },
    Stall {
        left: f64,
        right: f64,
    },
    Halt,
    ResetPose,
    Goto {
        x: f64,
        y: f64,
        tolerance: f64,
        point_forward: bool,
    },
}

impl CommandBody {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pwm { .. } => "pwm",
            Self::Speed { .. } => "speed",
            Self::Pid { .. } => "pid",
            Self::Stall { .. } => "stall",
            Self::Halt => "halt",
            Self::ResetPose => "resetPose",
            Self::Goto { .. } => "goto",
        }
    }
}

impl fmt::Display for CommandBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pwm {
                left,
                left_forward,
                right,
                right_forward,
            } => write!(f, "pwm({left}, {left_forward}, {right}, {right_forward})"),
            Self::Speed {
                left,
                left_forward,
                right,
                right_forward,
            } => write!(
                f,
                "speed({}, {left_forward}, {}, {right_forward})",
                format_number(*left),
                format_number(*right)
            ),
            Self::Pid {
                wheels,
                min_speed,
                max_speed,
                kp,
                ki,
                kd,
            } => write!(
                f,
                "pid({wheels}, {}, {}, {}, {}, {})",
                format_number(*min_speed),
                format_number(*max_speed),
                format_number(*kp),
                format_number(*ki),
                format_number(*kd)
            ),
            Self::Stall { left, right } => write!(
                f,
                "stall({}, {})",
                format_number(*left),
                format_number(*right)
            ),
            Self::Halt => f.write_str("halt()"),
            Self::ResetPose => f.write_str("resetPose()"),
            Self::Goto {
                x,
                y,
                tolerance,
                point_forward,
            } => write!(
                f,
                "goto({}, {}, {}, {point_forward})",
                format_number(*x),
                format_number(*y),
                format_number(*tolerance)
            ),
        }
    }
}

impl FromStr for CommandBody {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, inner) = split_call(s)?;
        let args: Vec<&str> = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(str::trim).collect()
        };

        match name {
            "pwm" => {
                expect_args("pwm", &args, 4)?;
                Ok(Self::Pwm {
                    left: parse_arg("pwm", args[0])?,
                    left_forward: parse_arg("pwm", args[1])?,
                    right: parse_arg("pwm", args[2])?,
                    right_forward: parse_arg("pwm", args[3])?,
                })
            }
            "speed" => {
                expect_args("speed", &args, 4)?;
                Ok(Self::Speed {
                    left: parse_arg("speed", args[0])?,
                    left_forward: parse_arg("speed", args[1])?,
                    right: parse_arg("speed", args[2])?,
                    right_forward: parse_arg("speed", args[3])?,
                })
            }
            "pid" => {
                expect_args("pid", &args, 6)?;
                Ok(Self::Pid {
                    wheels: WheelMask(parse_arg("pid", args[0])?),
                    min_speed: parse_arg("pid", args[1])?,
                    max_speed: parse_arg("pid", args[2])?,
                    kp: parse_arg("pid", args[3])?,
                    ki: parse_arg("pid", args[4])?,
                    kd: parse_arg("pid", args[5])?,
                })
            }
            "stall" => {
                expect_args("stall", &args, 2)?;
                Ok(Self::Stall {
                    left: parse_arg("stall", args[0])?,
                    right: parse_arg("stall", args[1])?,
                })
            }
            "halt" => {
                expect_args("halt", &args, 0)?;
                Ok(Self::Halt)
            }
            "resetPose" => {
                expect_args("resetPose", &args, 0)?;
                Ok(Self::ResetPose)
            }
            "goto" => {
                expect_args("goto", &args, 4)?;
                Ok(Self::Goto {
                    x: parse_arg("goto", args[0])?,
                    y: parse_arg("goto", args[1])?,
                    tolerance: parse_arg("goto", args[2])?,
                    point_forward: parse_arg("goto", args[3])?,
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// Formats a number the way the firmware parser expects it: shortest
/// round-trip decimal, no trailing `.0`, and never `-0`. Magnitudes are always
/// written in plain positional form (`1e21` becomes
/// `1000000000000000000000`), never with an exponent.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

pub fn wrap_command(seq: CommandSeq, body: &CommandBody) -> String {
    format!("cmd({seq}, {body})")
}

/// Splits a `cmd(<seq>, <body>)` frame into its sequence number and body text.
pub fn unwrap_command(frame: &str) -> Result<(CommandSeq, &str), ProtocolError> {
    let inner = frame
        .trim()
        .strip_prefix("cmd(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ProtocolError::MalformedFrame(frame.to_string()))?;
    let (seq, body) = inner
        .split_once(',')
        .ok_or_else(|| ProtocolError::MalformedFrame(frame.to_string()))?;
    let seq = seq
        .trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::MalformedFrame(frame.to_string()))?;
    Ok((CommandSeq(seq), body.trim()))
}

pub fn parse_command_frame(frame: &str) -> Result<(CommandSeq, CommandBody), ProtocolError> {
    let (seq, body) = unwrap_command(frame)?;
    Ok((seq, body.parse()?))
}

pub fn log_frame(message: &str) -> String {
    format!("log({message})")
}

pub fn telemetry_frame(payload: &Value) -> String {
    format!("tel({payload})")
}

pub fn settings_frame(payload: &Value) -> String {
    format!("set({payload})")
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Acknowledgment candidate, kept verbatim for exact comparison.
    Command(String),
    Log(String),
    Telemetry(Value),
    Settings(Value),
    Unexpected(String),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.starts_with("cmd(") {
            return Ok(Self::Command(text.to_string()));
        }
        if let Some(rest) = text.strip_prefix("log(") {
            let message = rest.strip_suffix(')').unwrap_or(rest);
            return Ok(Self::Log(message.to_string()));
        }
        if text.starts_with("tel(") {
            return Ok(Self::Telemetry(json_payload("telemetry", text)?));
        }
        if text.starts_with("set(") {
            return Ok(Self::Settings(json_payload("settings", text)?));
        }
        Ok(Self::Unexpected(text.to_string()))
    }
}

fn json_payload(kind: &'static str, text: &str) -> Result<Value, ProtocolError> {
    let (_, inner) = split_call(text)?;
    serde_json::from_str(inner).map_err(|source| ProtocolError::Payload { kind, source })
}

fn split_call(text: &str) -> Result<(&str, &str), ProtocolError> {
    let text = text.trim();
    let open = text
        .find('(')
        .ok_or_else(|| ProtocolError::MalformedFrame(text.to_string()))?;
    let inner = text[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| ProtocolError::MalformedFrame(text.to_string()))?;
    Ok((text[..open].trim(), inner))
}

fn expect_args(command: &'static str, args: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if args.len() != expected {
        return Err(ProtocolError::ArgumentCount {
            command,
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn parse_arg<T: FromStr>(command: &'static str, raw: &str) -> Result<T, ProtocolError> {
    raw.parse().map_err(|_| ProtocolError::InvalidArgument {
        command,
        value: raw.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
