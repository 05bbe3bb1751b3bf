//! Call envelope: the `[command, call_id, payload]` shape of every request.
//!
//! # Example
//!
//! ```
//! use msgpack_server::protocol::CallEnvelope;
//! use rmpv::Value;
//!
//! let value = Value::Array(vec![Value::from("ping"), Value::from(7), Value::Nil]);
//! let envelope = CallEnvelope::try_from(value).unwrap();
//!
//! assert_eq!(envelope.command, "ping");
//! assert_eq!(envelope.call_id, 7);
//! ```

use rmpv::Value;
use thiserror::Error;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Number of elements in a call envelope.
pub const ENVELOPE_ARITY: usize = 3;

/// Reasons a decoded value is not a call envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The top-level value is not an array.
    #[error("expected a 3-element array, got {0}")]
    NotAnArray(&'static str),

    /// The array has the wrong number of elements.
    #[error("expected 3 elements, got {0}")]
    WrongArity(usize),

    /// The command element is neither a UTF-8 string nor UTF-8 bytes.
    #[error("command must be a string, got {0}")]
    InvalidCommand(&'static str),

    /// The call id element does not fit in a u32.
    #[error("call id must be an unsigned 32-bit integer, got {0}")]
    InvalidCallId(String),
}

/// A single decoded call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    /// Command name used to look up the handler.
    pub command: String,
    /// Caller-assigned call identifier, opaque to the server.
    pub call_id: u32,
    /// Command-specific payload, decoded further by the handler.
    pub payload: Value,
}

impl CallEnvelope {
    /// Create a new envelope.
    pub fn new(command: impl Into<String>, call_id: u32, payload: Value) -> Self {
        Self {
            command: command.into(),
            call_id,
            payload,
        }
    }

    /// Encode the envelope as it travels on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_call(&self.command, self.call_id, &self.payload)
    }
}

impl TryFrom<Value> for CallEnvelope {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let items = match value {
            Value::Array(items) => items,
            other => return Err(EnvelopeError::NotAnArray(kind(&other))),
        };

        let [command, call_id, payload]: [Value; ENVELOPE_ARITY] = items
            .try_into()
            .map_err(|items: Vec<Value>| EnvelopeError::WrongArity(items.len()))?;

        // Some packers emit strings as raw bytes; take those if they are UTF-8.
        let command = match command {
            Value::String(s) => s
                .into_str()
                .ok_or(EnvelopeError::InvalidCommand("invalid UTF-8"))?,
            Value::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|_| EnvelopeError::InvalidCommand("invalid UTF-8"))?,
            other => return Err(EnvelopeError::InvalidCommand(kind(&other))),
        };

        let call_id = call_id
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| EnvelopeError::InvalidCallId(call_id.to_string()))?;

        Ok(Self {
            command,
            call_id,
            payload,
        })
    }
}

/// Encode a call as `[command, call_id, payload]`.
///
/// This is what a peer sends to invoke a command.
pub fn encode_call(command: &str, call_id: u32, payload: &Value) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&(command, call_id, payload))
}

/// Short type name of a value for error messages.
fn kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[test]
    fn test_valid_envelope() {
        let value = array(vec![
            Value::from("echo"),
            Value::from(42u32),
            Value::from("payload"),
        ]);

        let envelope = CallEnvelope::try_from(value).unwrap();

        assert_eq!(envelope.command, "echo");
        assert_eq!(envelope.call_id, 42);
        assert_eq!(envelope.payload, Value::from("payload"));
    }

    #[test]
    fn test_max_call_id() {
        let value = array(vec![Value::from("x"), Value::from(u32::MAX), Value::Nil]);
        let envelope = CallEnvelope::try_from(value).unwrap();
        assert_eq!(envelope.call_id, u32::MAX);
    }

    #[test]
    fn test_not_an_array() {
        let err = CallEnvelope::try_from(Value::from("ping")).unwrap_err();
        assert_eq!(err, EnvelopeError::NotAnArray("string"));

        let err = CallEnvelope::try_from(Value::Map(vec![])).unwrap_err();
        assert_eq!(err, EnvelopeError::NotAnArray("map"));
    }

    #[test]
    fn test_wrong_arity() {
        let short = array(vec![Value::from("ping"), Value::from(1)]);
        assert_eq!(
            CallEnvelope::try_from(short).unwrap_err(),
            EnvelopeError::WrongArity(2)
        );

        let long = array(vec![
            Value::from("ping"),
            Value::from(1),
            Value::Nil,
            Value::Nil,
        ]);
        assert_eq!(
            CallEnvelope::try_from(long).unwrap_err(),
            EnvelopeError::WrongArity(4)
        );
    }

    #[test]
    fn test_command_must_be_string() {
        let value = array(vec![Value::from(5), Value::from(1), Value::Nil]);
        assert_eq!(
            CallEnvelope::try_from(value).unwrap_err(),
            EnvelopeError::InvalidCommand("integer")
        );
    }

    #[test]
    fn test_binary_command_is_accepted_when_utf8() {
        let value = array(vec![
            Value::Binary(b"ping".to_vec()),
            Value::from(4),
            Value::Nil,
        ]);
        let envelope = CallEnvelope::try_from(value).unwrap();
        assert_eq!(envelope.command, "ping");
        assert_eq!(envelope.call_id, 4);

        let invalid = array(vec![
            Value::Binary(vec![0xff, 0xfe]),
            Value::from(4),
            Value::Nil,
        ]);
        assert_eq!(
            CallEnvelope::try_from(invalid).unwrap_err(),
            EnvelopeError::InvalidCommand("invalid UTF-8")
        );
    }

    #[test]
    fn test_call_id_out_of_range() {
        let negative = array(vec![Value::from("x"), Value::from(-1), Value::Nil]);
        assert!(matches!(
            CallEnvelope::try_from(negative).unwrap_err(),
            EnvelopeError::InvalidCallId(_)
        ));

        let too_big = array(vec![
            Value::from("x"),
            Value::from(u64::from(u32::MAX) + 1),
            Value::Nil,
        ]);
        assert!(matches!(
            CallEnvelope::try_from(too_big).unwrap_err(),
            EnvelopeError::InvalidCallId(_)
        ));

        let text = array(vec![Value::from("x"), Value::from("7"), Value::Nil]);
        assert!(matches!(
            CallEnvelope::try_from(text).unwrap_err(),
            EnvelopeError::InvalidCallId(_)
        ));
    }

    #[test]
    fn test_encode_call_is_a_three_element_array() {
        let bytes = encode_call("ping", 7, &Value::Nil).unwrap();

        // fixarray(3), fixstr(4) "ping", fixint 7, nil
        assert_eq!(bytes, vec![0x93, 0xa4, b'p', b'i', b'n', b'g', 0x07, 0xc0]);
    }

    #[test]
    fn test_envelope_encode_matches_encode_call() {
        let envelope = CallEnvelope::new("status", 3, Value::from(true));
        assert_eq!(
            envelope.encode().unwrap(),
            encode_call("status", 3, &Value::from(true)).unwrap()
        );
    }
}
