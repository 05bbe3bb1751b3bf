//! Streaming decoder for back-to-back MsgPack values.
//!
//! MsgPack is self-delimiting, so the stream needs no length header: a value
//! is complete once its last byte has arrived. Reads from the socket may end
//! anywhere, so the decoder keeps undecoded bytes in a `BytesMut` between
//! pushes and only consumes a prefix once it decodes as a whole value.
//!
//! A header-only scan tracks how many bytes the pending value still needs,
//! so the full decode runs once per value rather than once per read.
//!
//! # Example
//!
//! ```
//! use msgpack_server::protocol::{encode_call, FrameDecoder};
//! use rmpv::Value;
//!
//! let bytes = encode_call("ping", 7, &Value::Nil).unwrap();
//! let mut decoder = FrameDecoder::new();
//!
//! assert!(decoder.push(&bytes[..3]).unwrap().is_empty());
//! let values = decoder.push(&bytes[3..]).unwrap();
//! assert_eq!(values.len(), 1);
//! ```

use std::io;

use bytes::{Buf, BytesMut};
use rmpv::Value;

use super::scan::{Scan, ValueScanner};
use crate::error::Result;

/// Initial capacity of the decode buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete values.
pub struct FrameDecoder {
    /// Bytes received but not yet decoded.
    buffer: BytesMut,
    /// Progress through the first buffered value.
    scanner: ValueScanner,
    /// Full decodes attempted so far.
    decodes: u64,
}

impl FrameDecoder {
    /// Create a new decoder with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a new decoder with a custom initial buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scanner: ValueScanner::default(),
            decodes: 0,
        }
    }

    /// Append raw bytes from a socket read.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete value, if one is buffered.
    ///
    /// Returns:
    /// - `Ok(Some(value))` when a whole value was decoded and consumed
    /// - `Ok(None)` when the buffered bytes end mid-value
    /// - `Err(...)` when the bytes are not valid MsgPack
    ///
    /// A corrupt stream cannot be resynchronised, so on error everything
    /// buffered is discarded before returning.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if let Scan::Need(_) = self.scanner.advance(&self.buffer) {
            return Ok(None);
        }

        self.decodes += 1;
        let mut cursor: &[u8] = &self.buffer;
        let available = cursor.len();

        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = available - cursor.len();
                self.buffer.advance(consumed);
                self.scanner.reset();
                Ok(Some(value))
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => {
                self.clear();
                Err(e.into())
            }
        }
    }

    /// Push data into the buffer and extract all complete values.
    ///
    /// Partial data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if the stream is corrupt. Values decoded earlier in the
    /// same push are dropped together with the buffer.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Value>> {
        self.extend(data);

        let mut values = Vec::new();
        while let Some(value) = self.next_value()? {
            values.push(value);
        }

        Ok(values)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of full decodes attempted, successful or not.
    pub fn decode_attempts(&self) -> u64 {
        self.decodes
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanner.reset();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a decode error only means the value has not fully arrived yet.
fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
