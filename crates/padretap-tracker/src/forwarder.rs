//! Delivery of envelopes to the relay hub.
//!
//! The relay is optional. When it cannot be reached, or the link drops in
//! the middle of a session, envelopes are logged through `tracing` instead and the
//! session keeps streaming.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use padretap_core::{EventEnvelope, SystemNotice};

const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type RelaySink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Where an envelope ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Relayed,
    Echoed,
}

/// Per-session link to the relay with local-echo fallback.
pub struct RelayForwarder {
    sink: Option<RelaySink>,
    /// Cleared by the drain task once the relay side of the socket ends.
    alive: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl RelayForwarder {
    /// Try to open the relay link. Never fails; an unreachable relay yields a
    /// forwarder in local-echo mode.
    pub async fn connect(url: &str) -> Self {
        let attempt = tokio::time::timeout(RELAY_CONNECT_TIMEOUT, connect_async(url)).await;
        let ws = match attempt {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                warn!(url, error = %e, "Relay offline, echoing events locally");
                return Self::local_only();
            }
            Err(_) => {
                warn!(url, "Relay connect timed out, echoing events locally");
                return Self::local_only();
            }
        };
        info!(url, "Connected to relay");

        let (sink, mut stream) = ws.split();
        let alive = Arc::new(AtomicBool::new(true));

        // The hub broadcasts to every subscriber, this link included. Reading
        // and discarding keeps the hub's queue for us from filling up.
        let flag = Arc::clone(&alive);
        let drain = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            flag.store(false, Ordering::Release);
            debug!("Relay link closed");
        });

        Self {
            sink: Some(sink),
            alive,
            drain: Some(drain),
        }
    }

    pub fn local_only() -> Self {
        Self {
            sink: None,
            alive: Arc::new(AtomicBool::new(false)),
            drain: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some() && self.alive.load(Ordering::Acquire)
    }

    /// Send the once-per-session online notice.
    pub async fn announce(&mut self) {
        let notice = SystemNotice::online();
        match notice.to_json() {
            Ok(text) => {
                if self.is_connected() && !self.send_text(text).await {
                    self.downgrade();
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode system notice"),
        }
    }

    /// Deliver one envelope to the relay, or echo it locally.
    pub async fn forward(&mut self, envelope: &EventEnvelope) -> Delivery {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                return Delivery::Echoed;
            }
        };

        if self.is_connected() {
            if self.send_text(text.clone()).await {
                return Delivery::Relayed;
            }
            self.downgrade();
        } else if self.sink.is_some() {
            self.downgrade();
        }

        echo(envelope, &text);
        Delivery::Echoed
    }

    async fn send_text(&mut self, text: String) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        match sink.send(Message::text(text)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Relay send failed");
                false
            }
        }
    }

    fn downgrade(&mut self) {
        warn!("Relay link lost, echoing events locally for the rest of the session");
        self.sink = None;
        self.alive.store(false, Ordering::Release);
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

impl Drop for RelayForwarder {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

fn echo(envelope: &EventEnvelope, text: &str) {
    info!(
        target: "padretap::echo",
        is_target_match = envelope.is_target_match,
        event = %text,
        "Echoed event"
    );
}
