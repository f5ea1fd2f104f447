//! Rover-side client: a single-in-flight command channel over a text link,
//! the priority command queue that feeds it, and the drive-mode formatting
//! that turns operator intents into wire commands.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::domain::ConnectionState;

pub mod channel;
pub mod command_queue;
pub mod drive;
pub mod error;
pub mod halt;
pub mod pending;
pub mod supervisor;
pub mod transport;
pub mod turtle;

pub use channel::{ChannelStatus, CommandChannel};
pub use command_queue::{CommandQueue, QueueOptions};
pub use drive::{DriveModeParameters, JoystickRequest, SpeedControlSettings, TankRequest};
pub use error::{ChannelError, DriveError, HaltError};
pub use halt::HaltHandle;
pub use supervisor::{ReconnectPolicy, Supervisor, SupervisorAction};
pub use transport::{Connector, TransportEvent, TransportLink, WebSocketConnector};

/// Notifications published by the channel to any number of subscribers.
#[derive(Debug, Clone)]
pub enum RoverEvent {
    Connection(ConnectionState),
    Telemetry {
        payload: Value,
        received_at: DateTime<Utc>,
    },
    Settings {
        payload: Value,
        received_at: DateTime<Utc>,
    },
    Error(String),
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
