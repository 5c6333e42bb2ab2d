//! Socket access.
//!
//! The transport talks to a [`Link`]: a pair of channels fed by whatever owns
//! the physical socket. [`WsConnector`] is the tokio-tungstenite
//! implementation; tests substitute an in-memory one.

use crate::TransportError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame (binary frames are decoded as UTF-8).
    Frame(String),
    /// The socket is gone. `clean` is true only when a close handshake was
    /// received. `unsent` holds outgoing frames that were never written, in
    /// the order they were handed over.
    Closed {
        clean: bool,
        reason: String,
        unsent: Vec<String>,
    },
}

/// An open socket, as seen by the transport.
///
/// Dropping `outgoing` closes the socket. If `incoming` ends without a
/// [`LinkEvent::Closed`], the socket is treated as having dropped uncleanly.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// WebSocket connector.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    heartbeat: Option<Duration>,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a WebSocket ping every `interval` while the socket is open.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = (!interval.is_zero()).then_some(interval);
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;
        let (sink, stream) = ws.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let heartbeat = self.heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        tracing::debug!("Socket open: {}", url);
        tokio::spawn(pump(sink, stream, out_rx, event_tx, heartbeat));

        Ok(Link {
            outgoing: out_tx,
            incoming: event_rx,
        })
    }
}

/// Shuttle frames between the socket and the link channels until either side
/// goes away.
async fn pump<Si, St>(
    sink: Si,
    stream: St,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    mut heartbeat: Option<tokio::time::Interval>,
) where
    Si: Sink<Message, Error = WsError>,
    St: Stream<Item = Result<Message, WsError>>,
{
    futures_util::pin_mut!(sink, stream);
    let mut unsent = Vec::new();

    let (clean, reason) = loop {
        tokio::select! {
            // Outgoing from the transport
            out = out_rx.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
                        unsent.push(text);
                        break (false, e.to_string());
                    }
                }
                None => {
                    // Transport let go of the link.
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },

            // Incoming from the server
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if event_tx.send(LinkEvent::Frame(text.as_str().to_owned())).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if event_tx.send(LinkEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping non-UTF-8 binary frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break (true, frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break (false, e.to_string()),
                None => break (false, "stream ended".into()),
            },

            _ = tick(&mut heartbeat) => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break (false, e.to_string());
                }
            }
        }
    };

    // Whatever the transport handed over after the failure was never written.
    while let Ok(text) = out_rx.try_recv() {
        unsent.push(text);
    }
    let _ = event_tx.send(LinkEvent::Closed {
        clean,
        reason,
        unsent,
    });
}

async fn tick(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
