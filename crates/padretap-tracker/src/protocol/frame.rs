//! Multiplex wire frames.
//!
//! Every frame is an array whose first element is an integer opcode. Inbound
//! frames are decoded into [`Frame`] by a single tolerant step: anything that
//! is not a recognisable array becomes [`Frame::Unknown`] instead of an error,
//! so one malformed frame never disturbs the rest of the stream.

use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use padretap_core::config::WireVariant;

use crate::error::TrackerError;

pub const OP_AUTH: u64 = 1;
pub const OP_PING: u64 = 2;
pub const OP_HEARTBEAT: u64 = 3;
pub const OP_SUBSCRIBE: u64 = 4;
pub const OP_DATA: u64 = 5;
pub const OP_SUBSCRIPTION_CLOSED: u64 = 6;
pub const OP_SUBSCRIPTION_ERROR: u64 = 7;

/// Inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `[1, ...]` authentication echo.
    Auth,
    /// `[2]` keepalive, no-op.
    Ping,
    /// `[3]` heartbeat / implicit ack.
    Heartbeat,
    /// `[4, requestId, ...]` subscribe acknowledgment.
    SubscribeAck { request_id: Option<u64> },
    /// `[5, connectionId, payload]` data event.
    Data {
        connection_id: Option<i64>,
        payload: Value,
    },
    /// `[6, connectionId]` subscription closed.
    SubscriptionClosed { connection_id: Option<i64> },
    /// `[7, connectionId, message]` subscription error.
    SubscriptionError {
        connection_id: Option<i64>,
        message: Value,
    },
    /// Unrecognised opcode, non-array payload, or undecodable bytes.
    Unknown { opcode: Option<u64> },
}

impl Frame {
    pub const fn opcode(&self) -> Option<u64> {
        match self {
            Self::Auth => Some(OP_AUTH),
            Self::Ping => Some(OP_PING),
            Self::Heartbeat => Some(OP_HEARTBEAT),
            Self::SubscribeAck { .. } => Some(OP_SUBSCRIBE),
            Self::Data { .. } => Some(OP_DATA),
            Self::SubscriptionClosed { .. } => Some(OP_SUBSCRIPTION_CLOSED),
            Self::SubscriptionError { .. } => Some(OP_SUBSCRIPTION_ERROR),
            Self::Unknown { opcode } => *opcode,
        }
    }

    /// Frames the upstream only sends to a live, authenticated session.
    pub const fn confirms_auth(&self) -> bool {
        matches!(self, Self::Auth | Self::Heartbeat | Self::SubscribeAck { .. })
    }

    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

/// Decode a binary (MessagePack) frame.
pub fn decode_frame(raw: &[u8]) -> Frame {
    match rmp_serde::from_slice::<Value>(raw) {
        Ok(value) => classify(value),
        Err(e) => {
            tracing::debug!(error = %e, len = raw.len(), "Undecodable binary frame");
            Frame::Unknown { opcode: None }
        }
    }
}

/// Decode a text (JSON) frame.
pub fn decode_text_frame(raw: &str) -> Frame {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => classify(value),
        Err(e) => {
            tracing::debug!(error = %e, len = raw.len(), "Undecodable text frame");
            Frame::Unknown { opcode: None }
        }
    }
}

/// Map a decoded value onto the frame variants.
pub fn classify(value: Value) -> Frame {
    let Value::Array(items) = value else {
        return Frame::Unknown { opcode: None };
    };
    let mut items = items.into_iter();
    let Some(opcode) = items.next().as_ref().and_then(Value::as_u64) else {
        return Frame::Unknown { opcode: None };
    };

    match opcode {
        OP_AUTH => Frame::Auth,
        OP_PING => Frame::Ping,
        OP_HEARTBEAT => Frame::Heartbeat,
        OP_SUBSCRIBE => Frame::SubscribeAck {
            request_id: items.next().as_ref().and_then(Value::as_u64),
        },
        OP_DATA => {
            let connection_id = items.next().as_ref().and_then(Value::as_i64);
            match items.next() {
                Some(payload) => Frame::Data {
                    connection_id,
                    payload,
                },
                None => Frame::Unknown {
                    opcode: Some(opcode),
                },
            }
        }
        OP_SUBSCRIPTION_CLOSED => Frame::SubscriptionClosed {
            connection_id: items.next().as_ref().and_then(Value::as_i64),
        },
        OP_SUBSCRIPTION_ERROR => Frame::SubscriptionError {
            connection_id: items.next().as_ref().and_then(Value::as_i64),
            message: items.next().unwrap_or(Value::Null),
        },
        other => Frame::Unknown {
            opcode: Some(other),
        },
    }
}

/// Frames the client sends upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundFrame<'a> {
    /// `[1, token, sessionId]`; a missing token is sent as nil.
    Auth {
        token: Option<&'a str>,
        session_id: &'a str,
    },
    /// `[3]`
    Heartbeat,
    /// `[4, requestId, topicPath]`
    Subscribe { request_id: u64, topic: &'a str },
}

impl OutboundFrame<'_> {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Auth { token, session_id } => json!([OP_AUTH, token, session_id]),
            Self::Heartbeat => json!([OP_HEARTBEAT]),
            Self::Subscribe { request_id, topic } => json!([OP_SUBSCRIBE, request_id, topic]),
        }
    }

    /// Encode for the configured wire variant.
    pub fn encode(&self, variant: WireVariant) -> Result<Message, TrackerError> {
        let value = self.to_value();
        match variant {
            WireVariant::Binary => rmp_serde::to_vec(&value)
                .map(Message::binary)
                .map_err(|e| TrackerError::Encode(e.to_string())),
            WireVariant::Json => Ok(Message::text(value.to_string())),
        }
    }
}
