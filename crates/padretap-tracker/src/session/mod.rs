//! One upstream session: connect, authenticate, subscribe, stream.
//!
//! A [`ProtocolSession`] is single-use. The supervisor in
//! [`crate::client`] creates a new one, with a new session id and fresh
//! [`ConnectionState`], for every connection attempt.

pub mod dispatch;
pub mod state;

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::RngExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{ORIGIN, USER_AGENT};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};
use url::Url;

use padretap_core::config::{SubscribePolicy, UpstreamConfig};
use padretap_core::{Config, TargetFilter};

pub use dispatch::{Dispatch, dispatch};
pub use state::{ConnectionState, SessionPhase};

use crate::error::TrackerError;
use crate::forwarder::{Delivery, RelayForwarder};
use crate::heartbeat::spawn_heartbeat_task;
use crate::protocol::{OutboundFrame, decode_frame, decode_text_frame};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type UpstreamSink = SplitSink<UpstreamSocket, Message>;
type UpstreamStream = SplitStream<UpstreamSocket>;

const SESSION_ID_PREFIX: &str = "d-";
const SESSION_ID_LEN: usize = 11;
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random per-connection session id, e.g. `d-k3x9q0m1zta`.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SESSION_ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SESSION_ID_ALPHABET.len());
            char::from(SESSION_ID_ALPHABET[idx])
        })
        .collect();
    format!("{SESSION_ID_PREFIX}{suffix}")
}

/// Upstream endpoint with the client role attached as `desc`.
pub fn endpoint(upstream: &UpstreamConfig) -> Result<Url, TrackerError> {
    let mut url = Url::parse(&upstream.url)
        .map_err(|e| padretap_core::Error::Config(format!("invalid upstream url: {e}")))?;
    if !url.query_pairs().any(|(k, _)| k == "desc") {
        url.query_pairs_mut().append_pair("desc", &upstream.role);
    }
    Ok(url)
}

/// Counters for one session, reported when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub events_relayed: u64,
    pub events_echoed: u64,
    pub events_dropped: u64,
}

pub struct ProtocolSession {
    config: Arc<Config>,
    filter: Arc<TargetFilter>,
    access_token: Option<String>,
    session_id: String,
    state: ConnectionState,
    stats: SessionStats,
}

impl ProtocolSession {
    pub fn new(
        config: Arc<Config>,
        filter: Arc<TargetFilter>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            config,
            filter,
            access_token,
            session_id: generate_session_id(),
            state: ConnectionState::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run the session until the upstream goes away or shutdown is signalled.
    ///
    /// `Ok(())` means shutdown was requested; every other ending is an error
    /// and leaves the session `Faulted`.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), TrackerError> {
        let result = self.drive(shutdown).await;
        match &result {
            Ok(()) => {
                if let Err(e) = self.state.advance(SessionPhase::Disconnected) {
                    debug!(error = %e, phase = %self.state.phase(), "Skipped disconnect transition");
                }
            }
            Err(e) => {
                warn!(error = %e, phase = %self.state.phase(), "Session ended");
                self.state.fault();
            }
        }
        result
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), TrackerError> {
        self.state.advance(SessionPhase::Connecting)?;
        let socket = self.connect().await?;
        self.state.advance(SessionPhase::Authenticating)?;

        let (sink, mut stream) = socket.split();
        let sink = Arc::new(Mutex::new(sink));
        let variant = self.config.upstream.wire_variant;

        // Auth is optimistic: the upstream never answers it directly.
        let auth = OutboundFrame::Auth {
            token: self.access_token.as_deref(),
            session_id: &self.session_id,
        }
        .encode(variant)?;
        sink.lock().await.send(auth).await?;
        info!(has_token = self.access_token.is_some(), "Sent auth frame");

        let mut relay = RelayForwarder::connect(&self.config.relay.client_url()).await;
        relay.announce().await;

        if self.config.session.subscribe_policy == SubscribePolicy::Eager {
            tokio::select! {
                () = tokio::time::sleep(self.config.session.subscribe_settle()) => {}
                _ = shutdown.changed() => return Ok(()),
            }
            self.subscribe_all(&sink).await?;
        }

        let heartbeat = spawn_heartbeat_task(
            Arc::clone(&sink),
            OutboundFrame::Heartbeat.encode(variant)?,
            self.config.session.heartbeat_interval(),
        );
        let result = self
            .stream_loop(&sink, &mut stream, &mut relay, shutdown)
            .await;
        heartbeat.abort();
        result
    }

    async fn connect(&self) -> Result<UpstreamSocket, TrackerError> {
        crate::install_crypto_provider();
        let upstream = &self.config.upstream;
        let url = endpoint(upstream)?;

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(ORIGIN, header_value(&upstream.origin)?);
        headers.insert(USER_AGENT, header_value(&upstream.user_agent)?);

        let timeout = self.config.session.connect_timeout();
        let (socket, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| {
                TrackerError::Transport(format!(
                    "connect timed out after {}s",
                    timeout.as_secs()
                ))
            })??;
        info!(url = %url, status = %response.status(), "Upstream connected");
        Ok(socket)
    }

    async fn subscribe_all(&mut self, sink: &Mutex<UpstreamSink>) -> Result<(), TrackerError> {
        self.state.advance(SessionPhase::Subscribing)?;
        let variant = self.config.upstream.wire_variant;
        let topics = self
            .config
            .upstream
            .resolved_topics(&self.config.credentials.uid);

        let mut sink = sink.lock().await;
        for topic in &topics {
            let request_id = self.state.allocate_subscription(topic);
            let frame = OutboundFrame::Subscribe { request_id, topic }.encode(variant)?;
            sink.send(frame).await?;
            info!(request_id, topic = %topic, "Subscribed");
        }
        drop(sink);

        self.state.advance(SessionPhase::Streaming)
    }

    async fn stream_loop(
        &mut self,
        sink: &Mutex<UpstreamSink>,
        stream: &mut UpstreamStream,
        relay: &mut RelayForwarder,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TrackerError> {
        loop {
            tokio::select! {
                msg = stream.next() => {
                    let frame = match msg {
                        Some(Ok(Message::Binary(bytes))) => decode_frame(&bytes),
                        Some(Ok(Message::Text(text))) => decode_text_frame(text.as_str()),
                        Some(Ok(Message::Close(close))) => {
                            info!(?close, "Upstream closed connection");
                            return Err(TrackerError::Closed);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(TrackerError::Closed),
                    };
                    self.stats.frames_received += 1;
                    let outcome = dispatch(&mut self.state, &self.filter, frame);
                    self.handle(outcome, sink, relay).await?;
                }
                _ = shutdown.changed() => {
                    info!("Session received shutdown signal");
                    let _ = sink.lock().await.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    async fn handle(
        &mut self,
        outcome: Dispatch,
        sink: &Mutex<UpstreamSink>,
        relay: &mut RelayForwarder,
    ) -> Result<(), TrackerError> {
        match outcome {
            Dispatch::Confirmed => {
                if self.config.session.subscribe_policy == SubscribePolicy::Confirmed
                    && self.state.phase() == SessionPhase::Authenticating
                {
                    self.subscribe_all(sink).await?;
                }
            }
            Dispatch::Forward(envelope) => match relay.forward(&envelope).await {
                Delivery::Relayed => self.stats.events_relayed += 1,
                Delivery::Echoed => self.stats.events_echoed += 1,
            },
            Dispatch::Filtered => self.stats.events_dropped += 1,
            Dispatch::Ignore => {}
        }
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TrackerError> {
    HeaderValue::from_str(value)
        .map_err(|e| padretap_core::Error::Config(format!("invalid header value: {e}")).into())
}
