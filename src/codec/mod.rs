//! Codec module - MsgPack encoding for payloads and replies.
//!
//! [`MsgPackCodec`] wraps `rmp-serde` for typed values and `rmpv` for the
//! dynamic [`rmpv::Value`] that carries call payloads across the dispatch
//! boundary.
//!
//! # Example
//!
//! ```
//! use msgpack_server::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
