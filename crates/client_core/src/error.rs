use thiserror::Error;

/// Fault recorded on the command channel. Held as state until
/// `CommandChannel::clear_error` rather than returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("acknowledgment mismatch: sent {sent:?}, received {received:?}")]
    AckMismatch { sent: String, received: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriveError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("invalid speed range: min {min}, max {max} (need 0 <= min < max)")]
    InvalidSpeedRange { min: f64, max: f64 },
    #[error("wheel mask selects no wheel")]
    EmptyWheelMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HaltError {
    #[error("halt cancelled")]
    Cancelled,
    #[error("connection lost before halt was acknowledged")]
    Disconnected,
    #[error("halt was not acknowledged in time")]
    TimedOut,
}
