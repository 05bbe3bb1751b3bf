//! Transport module - Unix domain socket setup.
//!
//! Binds the listening socket step by step so each failure can be reported
//! against the step that caused it, and removes the socket file once the
//! listener goes away.

mod socket;

pub use socket::SocketListener;
