//! Command channel: one link, one in-flight command, acknowledged by echo.

use std::sync::Arc;

use chrono::Utc;
use shared::{domain::ConnectionState, protocol::InboundFrame};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::ChannelError,
    transport::{Connector, TransportEvent, TransportLink},
    RoverEvent,
};

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of the channel used by supervising logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus<'a> {
    pub started: bool,
    pub ready: bool,
    pub sending: Option<&'a str>,
    pub has_error: bool,
}

pub struct CommandChannel {
    connector: Arc<dyn Connector>,
    url: String,
    subprotocol: String,
    link: Option<TransportLink>,
    ready: bool,
    sending: Option<String>,
    error: Option<ChannelError>,
    events: broadcast::Sender<RoverEvent>,
}

impl CommandChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        url: impl Into<String>,
        subprotocol: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            url: url.into(),
            subprotocol: subprotocol.into(),
            link: None,
            ready: false,
            sending: None,
            error: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoverEvent> {
        self.events.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn start(&mut self) {
        if self.link.is_some() {
            return;
        }
        info!(url = %self.url, subprotocol = %self.subprotocol, "channel: opening link");
        self.link = Some(self.connector.open(&self.url, &self.subprotocol));
        self.ready = false;
    }

    pub fn stop(&mut self) {
        if self.link.take().is_some() {
            info!(url = %self.url, "channel: closing link");
            if let Some(lost) = self.sending.take() {
                debug!(command = %lost, "channel: dropping unacknowledged command");
            }
            if self.ready {
                self.ready = false;
                self.emit(RoverEvent::Connection(ConnectionState::Closed));
            }
        }
        self.ready = false;
    }

    pub fn reset(&mut self) {
        self.stop();
        self.start();
        self.clear_error();
    }

    pub fn is_started(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.link.is_some() && self.ready
    }

    pub fn state(&self) -> ConnectionState {
        if !self.is_ready() {
            ConnectionState::Closed
        } else if self.error.is_some() {
            ConnectionState::Errored
        } else {
            ConnectionState::Open
        }
    }

    pub fn status(&self) -> ChannelStatus<'_> {
        ChannelStatus {
            started: self.is_started(),
            ready: self.is_ready(),
            sending: self.sending(),
            has_error: self.has_error(),
        }
    }

    pub fn is_sending(&self) -> bool {
        self.sending.is_some()
    }

    pub fn sending(&self) -> Option<&str> {
        self.sending.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ChannelError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.sending = None;
        if self.error.take().is_some() && self.is_ready() {
            self.emit(RoverEvent::Connection(ConnectionState::Open));
        }
    }

    /// Writes `text` as the single in-flight command.
    ///
    /// Requires an open link. Unless `force` is set, also requires that nothing
    /// is in flight and no error is pending; `force` replaces a stuck in-flight
    /// command. Returns false when nothing was written.
    pub fn send_command(&mut self, text: &str, force: bool) -> bool {
        if !self.is_ready() {
            return false;
        }
        if !force && (self.is_sending() || self.has_error()) {
            return false;
        }
        let Some(link) = self.link.as_ref() else {
            return false;
        };

        let result = link.send(text.to_string());
        self.sending = Some(text.to_string());
        if force {
            self.error = None;
        }
        match result {
            Ok(()) => {
                debug!(command = text, "channel: command sent");
                true
            }
            Err(err) => {
                self.record_error(err);
                false
            }
        }
    }

    /// Drains transport events that arrived since the previous call.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(link) = self.link.as_mut() else {
                break;
            };
            let Some(event) = link.try_next_event() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                info!(url = %self.url, "channel: link open");
                self.ready = true;
                self.emit(RoverEvent::Connection(self.state()));
            }
            TransportEvent::Closed { reason } => {
                warn!(url = %self.url, reason = reason.as_deref().unwrap_or("closed by peer"), "channel: link closed");
                if let Some(lost) = self.sending.take() {
                    warn!(command = %lost, "channel: in-flight command lost with the link");
                }
                self.link = None;
                self.ready = false;
                self.emit(RoverEvent::Connection(ConnectionState::Closed));
            }
            TransportEvent::Text(text) => self.handle_text(text),
            TransportEvent::Binary(bytes) => {
                warn!(len = bytes.len(), "channel: ignoring unexpected binary frame");
            }
        }
    }

    fn handle_text(&mut self, text: String) {
        match InboundFrame::parse(&text) {
            Ok(InboundFrame::Log(message)) => debug!(%message, "channel: rover log"),
            Ok(InboundFrame::Telemetry(payload)) => self.emit(RoverEvent::Telemetry {
                payload,
                received_at: Utc::now(),
            }),
            Ok(InboundFrame::Settings(payload)) => self.emit(RoverEvent::Settings {
                payload,
                received_at: Utc::now(),
            }),
            Ok(InboundFrame::Command(frame)) => {
                let Some(sent) = self.sending.clone() else {
                    warn!(%frame, "channel: acknowledgment with nothing in flight");
                    return;
                };
                if sent == frame {
                    debug!(command = %frame, "channel: command acknowledged");
                    self.sending = None;
                } else {
                    self.record_error(ChannelError::AckMismatch {
                        sent,
                        received: frame,
                    });
                }
            }
            Ok(InboundFrame::Unexpected(text)) => warn!(%text, "channel: unexpected frame"),
            Err(err) => warn!(%text, error = %err, "channel: dropping malformed frame"),
        }
    }

    fn record_error(&mut self, err: ChannelError) {
        warn!(error = %err, "channel: command failed");
        self.emit(RoverEvent::Error(err.to_string()));
        self.error = Some(err);
        if self.is_ready() {
            self.emit(RoverEvent::Connection(ConnectionState::Errored));
        }
    }

    fn emit(&self, event: RoverEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
