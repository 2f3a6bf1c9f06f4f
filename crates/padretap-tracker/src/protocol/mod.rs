//! Multiplex protocol spoken with the upstream feed.

pub mod frame;

pub use frame::{Frame, OutboundFrame, classify, decode_frame, decode_text_frame};
