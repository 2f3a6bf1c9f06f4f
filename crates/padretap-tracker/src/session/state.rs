//! Per-session connection state.
//!
//! A `ConnectionState` lives exactly as long as one upstream session. The
//! supervisor builds a fresh one for every connection attempt; nothing is
//! carried over from a previous session.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::TrackerError;
use crate::protocol::Frame;

/// Lifecycle of one upstream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    /// Terminal; the session object is discarded and replaced.
    Faulted,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of `self`.
    pub const fn can_advance_to(self, next: Self) -> bool {
        use SessionPhase::{
            Authenticating, Connecting, Disconnected, Faulted, Streaming, Subscribing,
        };
        match (self, next) {
            (Faulted, _) => false,
            (_, Faulted) => true,
            (Disconnected, Connecting)
            | (Connecting, Authenticating)
            | (Authenticating, Subscribing)
            | (Subscribing, Streaming) => true,
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            _ => false,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Faulted)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Mutable bookkeeping owned by a single session task.
#[derive(Debug)]
pub struct ConnectionState {
    phase: SessionPhase,
    auth_confirmed: bool,
    next_request_id: u64,
    subscriptions: HashMap<u64, String>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            auth_confirmed: false,
            next_request_id: 1,
            subscriptions: HashMap::new(),
        }
    }

    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub const fn auth_confirmed(&self) -> bool {
        self.auth_confirmed
    }

    pub const fn next_request_id(&self) -> u64 {
        self.next_request_id
    }

    pub const fn subscriptions(&self) -> &HashMap<u64, String> {
        &self.subscriptions
    }

    pub fn topic_for(&self, request_id: u64) -> Option<&str> {
        self.subscriptions.get(&request_id).map(String::as_str)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: SessionPhase) -> Result<(), TrackerError> {
        if !self.phase.can_advance_to(next) {
            return Err(TrackerError::Protocol(format!(
                "invalid session transition {} -> {next}",
                self.phase
            )));
        }
        debug!(from = %self.phase, to = %next, "Session phase");
        self.phase = next;
        Ok(())
    }

    /// Mark the session faulted. Always allowed except from `Faulted` itself.
    pub fn fault(&mut self) {
        if !self.phase.is_terminal() {
            debug!(from = %self.phase, "Session faulted");
            self.phase = SessionPhase::Faulted;
        }
    }

    /// Reserve the next request id for `topic` and record the subscription.
    pub fn allocate_subscription(&mut self, topic: &str) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.subscriptions.insert(request_id, topic.to_string());
        request_id
    }

    /// Apply the optimistic-auth guard for an inbound frame.
    ///
    /// Returns `true` only for the frame that flips the session to confirmed.
    pub fn observe(&mut self, frame: &Frame) -> bool {
        if self.auth_confirmed || !frame.confirms_auth() {
            return false;
        }
        self.auth_confirmed = true;
        true
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
