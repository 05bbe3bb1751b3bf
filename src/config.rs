//! Server configuration.

/// Bytes requested per socket read. Frames may span any number of reads.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256;

/// Pending-connection backlog passed to `listen`.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Socket file mode set after bind: read/write/execute for everybody.
pub const DEFAULT_SOCKET_MODE: u32 = 0o777;

/// Tunables for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Listen backlog.
    pub backlog: i32,
    /// Mode applied to the socket file after bind.
    pub socket_mode: u32,
    /// Install the process-wide crash handlers when the server is built.
    pub crash_diagnostics: bool,
    /// Log `SIGINT` while a session runs.
    pub log_interrupts: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            backlog: DEFAULT_BACKLOG,
            socket_mode: DEFAULT_SOCKET_MODE,
            crash_diagnostics: true,
            log_interrupts: true,
        }
    }
}
