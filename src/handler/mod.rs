//! Handler module - command registry and reply channels.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps command names to handlers
//! - [`ReplyChannel`] - lets a handler write bytes back to the peer
//!
//! # Example
//!
//! ```
//! use msgpack_server::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.insert_fn("ping", |_payload, reply| async move {
//!     reply.write(b"pong").await?;
//!     Ok(())
//! });
//!
//! assert!(registry.contains("ping"));
//! ```

mod registry;
mod reply;

pub use registry::{BoxFuture, FnHandler, Handler, HandlerRegistry, HandlerResult, TypedHandler};
pub use reply::{ConnectionWriter, ReplyChannel};
