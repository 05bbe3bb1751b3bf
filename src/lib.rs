//! # msgpack-server
//!
//! Single-peer RPC endpoint over a Unix domain socket.
//!
//! The peer sends a continuous stream of MessagePack values, each a call
//! envelope `[command, call_id, payload]`. Every call is routed to the
//! handler registered for `command`. Handlers reply by writing raw bytes to
//! the connection; there is no reply framing.
//!
//! ## Architecture
//!
//! - **Transport**: one listening Unix socket, one accepted client
//! - **Protocol**: self-delimiting MessagePack values, no length prefix
//! - **Diagnostics**: crash reports on `SIGSEGV` and panic, `SIGINT` logging
//!
//! ## Example
//!
//! ```ignore
//! use msgpack_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), msgpack_server::ServerError> {
//!     let server = Server::builder("/tmp/rpc.sock")
//!         .handle("ping", |_payload, reply| async move {
//!             reply.write(b"pong").await?;
//!             Ok(())
//!         })
//!         .build();
//!
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use handler::ReplyChannel;
pub use server::{Server, ServerBuilder, SessionEnd, SessionStats};
