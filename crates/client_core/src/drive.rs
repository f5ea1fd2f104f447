//! Drive formatting: turns wheel, turtle and joystick intents into firmware
//! command bodies. Everything here is pure; the caller owns the parameters.

use shared::{
    domain::TurtleDirection,
    protocol::CommandBody,
};

use crate::error::DriveError;

const PWM_FULL_SCALE: f64 = 255.0;
const SPEED_DECIMALS: i32 = 4;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriveModeParameters {
    pub use_speed_control: bool,
    pub min_speed: f64,
    pub max_speed: f64,
    pub left_stall: f64,
    pub right_stall: f64,
}

/// Shared speed limits for speed mode. Every enabling call narrows the
/// window; only disabling speed control resets it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpeedWindow {
    limits: Option<(f64, f64)>,
}

impl SpeedWindow {
    /// Folds `[min_speed, max_speed]` into the window: max of mins, min of maxes.
    pub fn narrow(&mut self, min_speed: f64, max_speed: f64) {
        self.limits = Some(match self.limits {
            None => (min_speed, max_speed),
            Some((min, max)) => (min.max(min_speed), max.min(max_speed)),
        });
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Zeros when unset. Disjoint limits collapse to a single point at the
    /// larger minimum.
    pub fn effective(&self) -> (f64, f64) {
        match self.limits {
            Some((min, max)) => (min, max.max(min)),
            None => (0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedControlSettings {
    pub min_speed: f64,
    pub max_speed: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl SpeedControlSettings {
    pub fn validate(&self) -> Result<(), DriveError> {
        ensure_finite("min_speed", self.min_speed)?;
        ensure_finite("max_speed", self.max_speed)?;
        ensure_finite("kp", self.kp)?;
        ensure_finite("ki", self.ki)?;
        ensure_finite("kd", self.kd)?;
        if self.min_speed < 0.0 || self.max_speed <= self.min_speed {
            return Err(DriveError::InvalidSpeedRange {
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TankRequest {
    pub left: f64,
    pub right: f64,
    pub left_flip: bool,
    pub right_flip: bool,
    pub left_zero: f64,
    pub right_zero: f64,
}

impl TankRequest {
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JoystickRequest {
    pub throttle: f64,
    pub steering: f64,
    pub throttle_flip: bool,
    pub steering_flip: bool,
    pub throttle_zero: f64,
    pub steering_zero: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TankCommand {
    pub body: CommandBody,
    /// Both wheels fell inside their dead-zones.
    pub is_stop: bool,
}

struct WheelOutput {
    magnitude: f64,
    forward: bool,
    active: bool,
    zero: f64,
}

impl WheelOutput {
    fn new(value: f64, flip: bool, zero: f64) -> Self {
        let value = value.clamp(-1.0, 1.0);
        let value = if flip { -value } else { value };
        let zero = zero.clamp(0.0, 1.0);
        let magnitude = value.abs();
        Self {
            magnitude,
            forward: value >= 0.0,
            active: magnitude > zero,
            zero,
        }
    }

    fn speed(&self, min_speed: f64, max_speed: f64) -> f64 {
        if !self.active {
            return 0.0;
        }
        round_to(
            map_range(self.magnitude, self.zero, 1.0, min_speed, max_speed),
            SPEED_DECIMALS,
        )
    }

    fn pwm(&self, stall: f64) -> u8 {
        if !self.active {
            return 0;
        }
        let floor = stall.clamp(0.0, 1.0) * PWM_FULL_SCALE;
        map_range(self.magnitude, self.zero, 1.0, floor, PWM_FULL_SCALE)
            .trunc()
            .clamp(0.0, PWM_FULL_SCALE) as u8
    }
}

pub fn map_range(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if in_max == in_min {
        return out_max;
    }
    out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

pub fn format_tank(
    params: &DriveModeParameters,
    request: &TankRequest,
) -> Result<TankCommand, DriveError> {
    ensure_finite("left", request.left)?;
    ensure_finite("right", request.right)?;
    ensure_finite("left_zero", request.left_zero)?;
    ensure_finite("right_zero", request.right_zero)?;

    let left = WheelOutput::new(request.left, request.left_flip, request.left_zero);
    let right = WheelOutput::new(request.right, request.right_flip, request.right_zero);
    let is_stop = !left.active && !right.active;

    let body = if params.use_speed_control {
        CommandBody::Speed {
            left: left.speed(params.min_speed, params.max_speed),
            left_forward: left.forward,
            right: right.speed(params.min_speed, params.max_speed),
            right_forward: right.forward,
        }
    } else {
        CommandBody::Pwm {
            left: left.pwm(params.left_stall),
            left_forward: left.forward,
            right: right.pwm(params.right_stall),
            right_forward: right.forward,
        }
    };

    Ok(TankCommand { body, is_stop })
}

/// Wheel values `(left, right)` for a turtle direction at `speed` in [0, 1].
pub fn turtle_to_tank(direction: TurtleDirection, speed: f64) -> (f64, f64) {
    let speed = speed.clamp(0.0, 1.0);
    match direction {
        TurtleDirection::Stop => (0.0, 0.0),
        TurtleDirection::Forward => (speed, speed),
        TurtleDirection::Reverse => (-speed, -speed),
        TurtleDirection::Left => (-speed, speed),
        TurtleDirection::Right => (speed, -speed),
    }
}

/// Mixes throttle and steering into wheel values. Dead-zone first, then flip;
/// the inner wheel of a turn is scaled by `1 - |steering|`.
pub fn mix_joystick(request: &JoystickRequest) -> Result<(f64, f64), DriveError> {
    ensure_finite("throttle", request.throttle)?;
    ensure_finite("steering", request.steering)?;
    ensure_finite("throttle_zero", request.throttle_zero)?;
    ensure_finite("steering_zero", request.steering_zero)?;

    let throttle = shape_axis(request.throttle, request.throttle_zero, request.throttle_flip);
    let steering = shape_axis(request.steering, request.steering_zero, request.steering_flip);

    let inner = throttle * (1.0 - steering.abs());
    let wheels = if steering > 0.0 {
        (throttle, inner)
    } else if steering < 0.0 {
        (inner, throttle)
    } else {
        (throttle, throttle)
    };
    Ok(wheels)
}

fn shape_axis(value: f64, zero: f64, flip: bool) -> f64 {
    let value = value.clamp(-1.0, 1.0);
    let value = if value.abs() <= zero.max(0.0) { 0.0 } else { value };
    if flip {
        -value
    } else {
        value
    }
}

pub(crate) fn ensure_finite(field: &'static str, value: f64) -> Result<(), DriveError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DriveError::NotFinite { field })
    }
}

#[cfg(test)]
#[path = "tests/drive_tests.rs"]
mod tests;
