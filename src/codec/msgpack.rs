//! MsgPack codec using `rmp-serde` and `rmpv`.
//!
//! Typed values are encoded with `to_vec_named`, so structs travel as maps
//! keyed by field name. Most peers (msgpack-c, `@msgpack/msgpack`, Python's
//! `msgpack`) decode maps into their native dictionaries directly.
//!
//! # Example
//!
//! ```
//! use msgpack_server::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// Uses `to_vec_named` for struct-as-map format.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Convert a typed value into a dynamic [`Value`].
    pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(rmpv::ext::to_value(value)?)
    }

    /// Convert a dynamic [`Value`] into a typed value.
    ///
    /// This is how typed handlers read the opaque call payload.
    pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
        Ok(rmpv::ext::from_value(value)?)
    }
}
