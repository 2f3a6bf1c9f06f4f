//! `padretap` Core Library
//!
//! Shared functionality for padretap components:
//! - Immutable process configuration
//! - Relay wire records (event envelopes, system notices)
//! - Target identity filtering
//! - Common error types and tracing setup

pub mod config;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod tracing_init;

pub use config::Config;
pub use envelope::{EventEnvelope, SystemNotice};
pub use error::{Error, Result};
pub use filter::{MatchStrategy, TargetFilter};
