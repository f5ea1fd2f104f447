use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
    #[error("unknown turtle direction: {0}")]
    UnknownDirection(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
