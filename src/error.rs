//! Error types for msgpack-server.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::EnvelopeError;

/// Socket setup step that failed inside `Server::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// Creating the socket endpoint.
    Socket,
    /// Binding the socket to its path.
    Bind,
    /// Changing the socket file mode.
    Permissions,
    /// Switching the socket to listening mode.
    Listen,
    /// Waiting for the peer connection.
    Accept,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::Socket => "socket",
            SetupStep::Bind => "bind",
            SetupStep::Permissions => "chmod",
            SetupStep::Listen => "listen",
            SetupStep::Accept => "accept",
        };
        f.write_str(name)
    }
}

/// Main error type for all server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error on the client connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Socket setup failed before the session started.
    #[error("{step}({}) failed: {source}", path.display())]
    Setup {
        step: SetupStep,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The byte stream is not valid MsgPack.
    #[error("MsgPack stream error: {0}")]
    Stream(#[from] rmpv::decode::Error),

    /// Conversion between a dynamic value and a typed payload failed.
    #[error("payload conversion error: {0}")]
    Payload(#[from] rmpv::ext::Error),

    /// A decoded value is not a call envelope.
    #[error("invalid call envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// `start` was called while a session is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// The client connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A handler reported a failure of its own.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Result type alias using ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;
