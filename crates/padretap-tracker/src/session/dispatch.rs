//! Routing of decoded frames.
//!
//! `dispatch` only decides what a frame means for the session; the session
//! performs the resulting I/O (subscribing, forwarding).

use tracing::{debug, info, warn};

use padretap_core::{EventEnvelope, TargetFilter};

use super::state::ConnectionState;
use crate::protocol::Frame;

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The frame implicitly confirmed authentication.
    Confirmed,
    /// A data event to forward to the relay.
    Forward(EventEnvelope),
    /// A data event rejected by the target filter.
    Filtered,
    /// Nothing to do.
    Ignore,
}

/// Route one inbound frame.
pub fn dispatch(state: &mut ConnectionState, filter: &TargetFilter, frame: Frame) -> Dispatch {
    if state.observe(&frame) {
        info!(opcode = ?frame.opcode(), "Server acknowledged session");
        return Dispatch::Confirmed;
    }

    match frame {
        Frame::Data {
            connection_id,
            payload,
        } => match filter.evaluate(&payload) {
            Some(is_match) => {
                debug!(?connection_id, is_match, "Data event");
                Dispatch::Forward(EventEnvelope::new(payload, is_match))
            }
            None => Dispatch::Filtered,
        },
        Frame::SubscriptionClosed { connection_id } => {
            info!(?connection_id, "Subscription closed by upstream");
            Dispatch::Ignore
        }
        Frame::SubscriptionError {
            connection_id,
            message,
        } => {
            warn!(?connection_id, %message, "Subscription error");
            Dispatch::Ignore
        }
        Frame::SubscribeAck { request_id } => {
            let topic = request_id.and_then(|id| state.topic_for(id));
            debug!(?request_id, ?topic, "Subscribe acknowledged");
            Dispatch::Ignore
        }
        Frame::Unknown { opcode } => {
            debug!(?opcode, "Ignoring unknown frame");
            Dispatch::Ignore
        }
        Frame::Auth | Frame::Ping | Frame::Heartbeat => Dispatch::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use padretap_core::MatchStrategy;

    use super::*;

    fn alice_only() -> TargetFilter {
        TargetFilter::new(["alice"], MatchStrategy::Structured).with_filter_only(true)
    }

    #[test]
    fn first_confirming_frame_confirms() {
        let mut state = ConnectionState::new();
        let filter = alice_only();
        assert_eq!(dispatch(&mut state, &filter, Frame::Ping), Dispatch::Ignore);
        assert_eq!(
            dispatch(&mut state, &filter, Frame::Heartbeat),
            Dispatch::Confirmed
        );
        assert_eq!(
            dispatch(&mut state, &filter, Frame::Heartbeat),
            Dispatch::Ignore
        );
    }

    #[test]
    fn matching_data_is_forwarded() {
        let mut state = ConnectionState::new();
        let payload = json!({"user": {"screen_name": "Alice"}});
        let before = i64::try_from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_millis(),
        )
        .unwrap();

        let outcome = dispatch(
            &mut state,
            &alice_only(),
            Frame::Data {
                connection_id: Some(7),
                payload: payload.clone(),
            },
        );

        let Dispatch::Forward(envelope) = outcome else {
            panic!("expected forward, got {outcome:?}");
        };
        assert!(envelope.is_target_match);
        assert_eq!(envelope.event, payload);
        assert_eq!(envelope.source, "padre");
        assert!((envelope.timestamp_ms - before).abs() <= 2_000);
    }

    #[test]
    fn non_matching_data_dropped_in_filter_only_mode() {
        let mut state = ConnectionState::new();
        let outcome = dispatch(
            &mut state,
            &alice_only(),
            Frame::Data {
                connection_id: Some(7),
                payload: json!({"user": {"screen_name": "bob"}}),
            },
        );
        assert_eq!(outcome, Dispatch::Filtered);
    }

    #[test]
    fn non_matching_data_tagged_without_filter_only() {
        let mut state = ConnectionState::new();
        let filter = TargetFilter::new(["alice"], MatchStrategy::Structured);
        let outcome = dispatch(
            &mut state,
            &filter,
            Frame::Data {
                connection_id: None,
                payload: json!({"user": {"screen_name": "bob"}}),
            },
        );
        assert!(matches!(outcome, Dispatch::Forward(ref e) if !e.is_target_match));
    }

    #[test]
    fn lifecycle_and_unknown_frames_are_ignored() {
        let mut state = ConnectionState::new();
        let filter = alice_only();
        state.observe(&Frame::Auth);
        for frame in [
            Frame::SubscriptionClosed {
                connection_id: Some(3),
            },
            Frame::SubscriptionError {
                connection_id: Some(3),
                message: json!("denied"),
            },
            Frame::Unknown { opcode: Some(99) },
            Frame::Unknown { opcode: None },
            Frame::Ping,
        ] {
            assert_eq!(dispatch(&mut state, &filter, frame), Dispatch::Ignore);
        }
    }
}
