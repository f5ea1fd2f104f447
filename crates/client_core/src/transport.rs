//! Duplex text link to the rover.
//!
//! The link itself runs on its own task and only talks to the command channel
//! through message passing: outbound text frames go in, `TransportEvent`s come
//! out and are drained by the tick that owns the channel.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Message,
    },
};
use tracing::{debug, info, warn};

use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Binary(Vec<u8>),
    Closed { reason: Option<String> },
}

pub struct TransportLink {
    outbound: UnboundedSender<String>,
    events: UnboundedReceiver<TransportEvent>,
    ended: bool,
}

impl TransportLink {
    pub fn new(outbound: UnboundedSender<String>, events: UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            outbound,
            events,
            ended: false,
        }
    }

    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        self.outbound
            .send(text)
            .map_err(|_| ChannelError::Transport("link task is no longer running".into()))
    }

    /// Next pending event, if any. A link whose task vanished without saying
    /// goodbye reports a single synthetic `Closed`.
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        if self.ended {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => {
                if matches!(event, TransportEvent::Closed { .. }) {
                    self.ended = true;
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.ended = true;
                Some(TransportEvent::Closed {
                    reason: Some("transport task ended".into()),
                })
            }
        }
    }
}

pub trait Connector: Send + Sync {
    fn open(&self, url: &str, subprotocol: &str) -> TransportLink;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, url: &str, subprotocol: &str) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_websocket(
                    url.to_string(),
                    subprotocol.to_string(),
                    outbound_rx,
                    events_tx,
                ));
            }
            Err(err) => {
                let _ = events_tx.send(TransportEvent::Closed {
                    reason: Some(format!("no async runtime available: {err}")),
                });
            }
        }

        TransportLink::new(outbound_tx, events_rx)
    }
}

async fn run_websocket(
    url: String,
    subprotocol: String,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<TransportEvent>,
) {
    let reason = match pump_websocket(&url, &subprotocol, &mut outbound, &events).await {
        Ok(()) => None,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(%url, error = %reason, "transport: websocket ended with error");
            Some(reason)
        }
    };
    let _ = events.send(TransportEvent::Closed { reason });
}

async fn pump_websocket(
    url: &str,
    subprotocol: &str,
    outbound: &mut UnboundedReceiver<String>,
    events: &UnboundedSender<TransportEvent>,
) -> Result<()> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid rover url: {url}"))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_str(subprotocol)
            .with_context(|| format!("invalid websocket sub-protocol: {subprotocol}"))?,
    );

    let (ws_stream, _) = connect_async(request)
        .await
        .with_context(|| format!("failed to connect websocket: {url}"))?;
    info!(%url, "transport: websocket open");

    // The owner may have let go of the link during the handshake.
    if events.send(TransportEvent::Opened).is_err() || outbound.is_closed() {
        return Ok(());
    }

    let (mut writer, mut reader) = ws_stream.split();
    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => writer
                    .send(Message::Text(text))
                    .await
                    .context("websocket send failed")?,
                None => {
                    debug!(%url, "transport: link released, closing websocket");
                    let _ = writer.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Text(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.send(TransportEvent::Binary(bytes));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("websocket receive failed"),
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/websocket_tests.rs"]
mod tests;
