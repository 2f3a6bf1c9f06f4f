//! padretap Tracker Library
//!
//! Client side of the feed bridge:
//! - Multiplex wire frames (decode, encode per wire variant)
//! - Per-session connection state and dispatch
//! - Upstream session with optimistic auth, subscribe and heartbeat
//! - Access-token refresh against the identity endpoint
//! - Relay forwarding with local-echo fallback
//! - Reconnect supervisor

pub mod client;
pub mod error;
pub mod forwarder;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod token;

pub use client::TrackerClient;
pub use error::TrackerError;
pub use forwarder::{Delivery, RelayForwarder};
pub use protocol::{Frame, OutboundFrame};
pub use session::{ConnectionState, ProtocolSession, SessionPhase, SessionStats};
pub use token::{TokenError, TokenManager};

/// Install `ring` as the process-wide rustls crypto provider.
///
/// Both reqwest (`rustls-no-provider`) and the wss transport need one. The
/// `Err` case just means a provider is already installed.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
