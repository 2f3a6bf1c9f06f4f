//! Relay wire records.
//!
//! Each forwarded data event travels to the relay as one JSON object. Field
//! names on the wire match what existing downstream consumers read
//! (`timestamp`, `timestamp_human`, `is_target_match`, ...).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Source tag stamped on every envelope.
pub const EVENT_SOURCE: &str = "padre";

/// Wrapper around one forwarded feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Wall-clock time the envelope was created, in Unix milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    /// Local time of day, `HH:MM:SS.mmm`.
    pub timestamp_human: String,
    pub source: String,
    pub is_target_match: bool,
    /// Opaque upstream payload, forwarded unchanged.
    pub event: Value,
}

impl EventEnvelope {
    pub fn new(event: Value, is_target_match: bool) -> Self {
        Self::at(Local::now(), event, is_target_match)
    }

    pub fn at(now: DateTime<Local>, event: Value, is_target_match: bool) -> Self {
        Self {
            timestamp_ms: now.timestamp_millis(),
            timestamp_human: human_time(now),
            source: EVENT_SOURCE.to_string(),
            is_target_match,
            event,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a relay message as an envelope; `None` for any other record.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Announcement sent to the relay once a tracker session is online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub message: String,
    pub timestamp: i64,
}

impl SystemNotice {
    pub fn online() -> Self {
        Self {
            message: "SYSTEM ONLINE: Padre Tracker Connected to Relay".to_string(),
            timestamp: Local::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Format a local timestamp as `HH:MM:SS.mmm`.
pub fn human_time(now: DateTime<Local>) -> String {
    now.format("%H:%M:%S%.3f").to_string()
}
