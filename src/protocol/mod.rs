//! Protocol module - stream decoding and call envelopes.
//!
//! The wire carries back-to-back MsgPack values with no extra framing:
//! - [`FrameDecoder`] accumulates partial reads and yields complete values
//! - [`CallEnvelope`] interprets a value as `[command, call_id, payload]`

mod decoder;
mod envelope;
mod scan;

pub use decoder::{FrameDecoder, DEFAULT_BUFFER_CAPACITY};
pub use envelope::{encode_call, CallEnvelope, EnvelopeError, ENVELOPE_ARITY};
