use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(CommandSeq, u64);
id_newtype!(WheelMask, u8);

impl CommandSeq {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl WheelMask {
    pub const LEFT: Self = Self(0b01);
    pub const RIGHT: Self = Self(0b10);
    pub const BOTH: Self = Self(0b11);

    pub fn includes_left(self) -> bool {
        self.0 & Self::LEFT.0 != 0
    }

    pub fn includes_right(self) -> bool {
        self.0 & Self::RIGHT.0 != 0
    }

    pub fn is_empty(self) -> bool {
        !self.includes_left() && !self.includes_right()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Open,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurtleDirection {
    Stop,
    Forward,
    Reverse,
    Left,
    Right,
}

impl TurtleDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Forward => "forward",
            Self::Reverse => "reverse",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for TurtleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurtleDirection {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "forward" => Ok(Self::Forward),
            "reverse" => Ok(Self::Reverse),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(ProtocolError::UnknownDirection(s.to_string())),
        }
    }
}
