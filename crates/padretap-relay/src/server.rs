//! WebSocket accept loop for the relay hub.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use padretap_core::Config;

use crate::error::RelayError;
use crate::hub::{RelayHub, SubscriberId};

pub struct RelayServer {
    listener: TcpListener,
    hub: RelayHub,
}

impl RelayServer {
    /// Bind the listener described by `config.relay`.
    pub async fn bind(config: &Config) -> Result<Self, RelayError> {
        config.validate()?;
        let listener = TcpListener::bind(config.relay.bind_addr()).await?;
        Ok(Self {
            listener,
            hub: RelayHub::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub const fn hub(&self) -> &RelayHub {
        &self.hub
    }

    /// Accept connections forever, one task per subscriber.
    pub async fn serve(self) -> Result<(), RelayError> {
        info!(addr = %self.local_addr()?, "Relay listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            let hub = self.hub.clone();
            tokio::spawn(async move {
                handle_connection(hub, stream, peer).await;
            });
        }
    }
}

async fn handle_connection(hub: RelayHub, stream: TcpStream, peer: SocketAddr) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    let (id, mut rx) = hub.on_connect().await;
    debug!(%peer, subscriber = id, "Accepted relay connection");

    // Drains this subscriber's queue; ends once the hub drops the sender.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    read_loop(&hub, id, &mut stream).await;

    hub.on_disconnect(id).await;
    writer.abort();
}

async fn read_loop<S>(hub: &RelayHub, id: SubscriberId, stream: &mut S)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
                hub.on_message(id, msg).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(subscriber = id, error = %e, "Subscriber read error");
                break;
            }
        }
    }
}
