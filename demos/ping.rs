//! Ping server - minimal single-peer RPC example.
//!
//! This example demonstrates:
//! - Building a server with the fluent API
//! - Registering a raw handler and a typed handler
//! - Writing replies straight to the connection
//!
//! # Running
//!
//! ```sh
//! cargo run --example ping -- /tmp/ping.sock
//! ```
//!
//! Then from Python:
//!
//! ```python
//! import msgpack, socket
//! s = socket.socket(socket.AF_UNIX)
//! s.connect("/tmp/ping.sock")
//! s.sendall(msgpack.packb(["ping", 1, None]))
//! print(s.recv(4))  # b'pong'
//! ```

use std::path::PathBuf;

use msgpack_server::{ReplyChannel, Server};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Input for the `add` command.
#[derive(Deserialize, Debug)]
struct AddInput {
    a: i64,
    b: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("msgpack-server-ping.sock"));

    let server = Server::builder(&path)
        .handle("ping", |_payload, reply: ReplyChannel| async move {
            reply.write(b"pong").await?;
            Ok(())
        })
        .handle_typed("add", |input: AddInput, reply: ReplyChannel| async move {
            reply.respond(&(reply.id(), input.a + input.b)).await
        })
        .build();

    println!("listening on {}", path.display());
    let stats = server.start().await?;
    println!(
        "session ended ({:?}) after {} calls",
        stats.end, stats.dispatched
    );

    Ok(())
}
