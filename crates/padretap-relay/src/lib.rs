//! padretap Relay Library
//!
//! Local pub/sub hub for tracker events:
//! - Subscriber registry with per-subscriber bounded queues
//! - Broadcast of every inbound message to all subscribers
//! - Optional relay-side target filtering
//! - WebSocket accept loop

pub mod error;
pub mod hub;
pub mod server;

pub use error::RelayError;
pub use hub::{BroadcastReport, RelayHub, SubscriberId};
pub use server::RelayServer;
