use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{
    channel::CommandChannel,
    transport::{Connector, TransportEvent, TransportLink},
};

pub(crate) const TEST_URL: &str = "ws://rover.test/ws";

/// Far end of a link handed out by `LoopbackConnector`.
pub(crate) struct Peer {
    pub subprotocol: String,
    outbound: UnboundedReceiver<String>,
    events: UnboundedSender<TransportEvent>,
    unread: Vec<String>,
    unacked: Vec<String>,
}

impl Peer {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn reply(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Text(text.to_string()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    fn pull(&mut self) {
        while let Ok(frame) = self.outbound.try_recv() {
            self.unread.push(frame.clone());
            self.unacked.push(frame);
        }
    }

    /// Everything the channel wrote since the last call.
    pub fn sent(&mut self) -> Vec<String> {
        self.pull();
        std::mem::take(&mut self.unread)
    }

    /// Echoes every frame not yet acknowledged.
    pub fn ack_all(&mut self) -> Vec<String> {
        self.pull();
        let frames = std::mem::take(&mut self.unacked);
        for frame in &frames {
            self.reply(frame);
        }
        frames
    }
}

#[derive(Clone, Default)]
pub(crate) struct LoopbackConnector {
    peers: Arc<Mutex<VecDeque<Peer>>>,
    opened: Arc<Mutex<usize>>,
}

impl LoopbackConnector {
    pub fn next_peer(&self) -> Peer {
        self.peers
            .lock()
            .expect("peers lock")
            .pop_front()
            .expect("a link was opened")
    }

    pub fn opened(&self) -> usize {
        *self.opened.lock().expect("opened lock")
    }

    pub fn channel(&self) -> CommandChannel {
        CommandChannel::new(Arc::new(self.clone()), TEST_URL, "arduino")
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, _url: &str, subprotocol: &str) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.peers.lock().expect("peers lock").push_back(Peer {
            subprotocol: subprotocol.to_string(),
            outbound: outbound_rx,
            events: events_tx,
            unread: Vec::new(),
            unacked: Vec::new(),
        });
        *self.opened.lock().expect("opened lock") += 1;
        TransportLink::new(outbound_tx, events_rx)
    }
}
