//! In-memory connector and helpers for unit tests.

use crate::connector::{Connector, Link, LinkEvent};
use crate::listeners::Subscription;
use crate::{Transport, TransportError};
use async_trait::async_trait;
use sanskara_core::WireMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    /// Never completes; exercises the connect timeout.
    Hang,
}

/// The server side of an accepted in-memory link.
pub(crate) struct Peer {
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Events delivered to the client. Dropping this without a close event
    /// looks like an unclean close.
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

impl Peer {
    pub(crate) fn push(&self, frame: &str) {
        let _ = self.events.send(LinkEvent::Frame(frame.to_string()));
    }

    pub(crate) fn close_clean(self) {
        let _ = self.events.send(LinkEvent::Closed {
            clean: true,
            reason: "bye".into(),
            unsent: Vec::new(),
        });
    }

    /// Drop the socket with frames the client believed were written.
    pub(crate) fn drop_with_unsent(self, unsent: &[&str]) {
        let _ = self.events.send(LinkEvent::Closed {
            clean: false,
            reason: "write failed".into(),
            unsent: unsent.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub(crate) async fn next_sent(&mut self) -> WireMessage {
        let frame = self.sent.recv().await.expect("client closed the link");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }
}

pub(crate) struct MemoryConnector {
    peers: mpsc::UnboundedSender<Peer>,
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Accepts every attempt unless scripted otherwise. Accepted links show up
    /// on the returned receiver.
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Outcomes for the next attempts, in order. Unscripted attempts accept.
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Accept => {
                let (outgoing, sent) = mpsc::unbounded_channel();
                let (events, incoming) = mpsc::unbounded_channel();
                let _ = self.peers.send(Peer { sent, events });
                Ok(Link { outgoing, incoming })
            }
            Outcome::Refuse => Err(TransportError::ConnectionError("refused".into())),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Record every message the transport delivers.
pub(crate) fn collect(transport: &Transport) -> (Arc<Mutex<Vec<WireMessage>>>, Subscription) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let sub = transport.subscribe(move |msg| sink.lock().unwrap().push(msg.clone()));
    (received, sub)
}
