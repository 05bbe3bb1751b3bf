//! Server builder and serve loop.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring handlers
//! and building the server. The [`Server`] manages the lifecycle:
//! 1. Bind the socket, chmod it, listen
//! 2. Accept exactly one client
//! 3. Read bytes, decode calls and dispatch them to handlers
//! 4. Close the connection and remove the socket file
//!
//! # Example
//!
//! ```ignore
//! use msgpack_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder("/tmp/rpc.sock")
//!         .handle("ping", |_payload, reply| async move {
//!             reply.write(b"pong").await?;
//!             Ok(())
//!         })
//!         .build();
//!
//!     let stats = server.start().await?;
//!     println!("served {} calls", stats.dispatched);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rmpv::Value;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::config::ServerConfig;
use crate::diagnostics::{self, InterruptLogger};
use crate::error::{Result, ServerError};
use crate::handler::{
    ConnectionWriter, FnHandler, Handler, HandlerRegistry, HandlerResult, ReplyChannel,
    TypedHandler,
};
use crate::protocol::{CallEnvelope, FrameDecoder};
use crate::transport::SocketListener;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// A read on the connection failed.
    ReadError,
    /// [`Server::stop`] was called.
    Stopped,
}

/// Counters for one finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Top-level values decoded from the stream.
    pub frames: u64,
    /// Calls handed to a handler.
    pub dispatched: u64,
    /// Calls whose command had no handler.
    pub unmatched: u64,
    /// Values that were not call envelopes, plus corrupt stream segments.
    pub malformed: u64,
    /// Handlers that returned an error.
    pub handler_errors: u64,
    /// Why the session ended.
    pub end: SessionEnd,
}

impl SessionStats {
    fn new(end: SessionEnd) -> Self {
        Self {
            frames: 0,
            dispatched: 0,
            unmatched: 0,
            malformed: 0,
            handler_errors: 0,
            end,
        }
    }
}

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    path: PathBuf,
    registry: HandlerRegistry,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new builder for a server listening on `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            registry: HandlerRegistry::new(),
            config: ServerConfig::default(),
        }
    }

    /// Register a handler taking the raw payload.
    pub fn handle<F, Fut>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.insert_fn(command, handler);
        self
    }

    /// Register a handler whose payload is deserialized into `T` first.
    pub fn handle_typed<F, T, Fut>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.insert_typed(command, handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of bytes requested per read.
    ///
    /// Default: 256
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set the listen backlog.
    ///
    /// Default: 5
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the mode applied to the socket file.
    ///
    /// Default: 0o777
    pub fn socket_mode(mut self, mode: u32) -> Self {
        self.config.socket_mode = mode;
        self
    }

    /// Install the process-wide crash handlers on build.
    ///
    /// Default: true
    pub fn crash_diagnostics(mut self, enabled: bool) -> Self {
        self.config.crash_diagnostics = enabled;
        self
    }

    /// Log `SIGINT` while a session runs.
    ///
    /// Default: true
    pub fn log_interrupts(mut self, enabled: bool) -> Self {
        self.config.log_interrupts = enabled;
        self
    }

    /// Build the server.
    ///
    /// Installs the crash handlers unless disabled. Does not touch the
    /// socket path.
    pub fn build(self) -> Server {
        if self.config.crash_diagnostics && diagnostics::install() {
            tracing::debug!("crash handlers installed");
        }

        Server {
            path: self.path,
            config: self.config,
            registry: RwLock::new(self.registry),
            stop_tx: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }
}

/// Single-peer RPC endpoint on a Unix domain socket.
///
/// Share it through an `Arc` to call [`stop`](Self::stop) from another task
/// or thread while [`start`](Self::start) is running.
pub struct Server {
    path: PathBuf,
    config: ServerConfig,
    /// Handlers by command name.
    registry: RwLock<HandlerRegistry>,
    /// Stops the current session when fired.
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    running: AtomicBool,
}

/// Clears the running flag when `start` returns.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Server {
    /// Create a server with the default configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ServerBuilder::new(path).build()
    }

    /// Create a new server builder.
    pub fn builder(path: impl Into<PathBuf>) -> ServerBuilder {
        ServerBuilder::new(path)
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether `start` is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a handler taking the raw payload, replacing any previous one.
    pub fn handle<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set_handler(command, Some(Arc::new(FnHandler::new(handler))));
    }

    /// Register a handler whose payload is deserialized into `T` first.
    pub fn handle_typed<F, T, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(T, ReplyChannel) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set_handler(command, Some(Arc::new(TypedHandler::new(handler))));
    }

    /// Insert, replace, or (with `None`) remove the handler for `command`.
    ///
    /// Takes effect from the next decoded frame, also while serving.
    pub fn set_handler(&self, command: &str, handler: Option<Arc<dyn Handler>>) {
        self.write_registry().set(command, handler);
    }

    /// Remove the handler for `command`.
    pub fn unhandle(&self, command: &str) {
        self.set_handler(command, None);
    }

    /// Check whether `command` has a handler.
    pub fn has_handler(&self, command: &str) -> bool {
        self.read_registry().contains(command)
    }

    /// Bind, accept one client and serve it until the session ends.
    ///
    /// Returns `Ok` however the session ended (peer closed, read error,
    /// [`stop`](Self::stop)). Setup failures return
    /// [`ServerError::Setup`]. The socket file is removed before returning.
    pub async fn start(&self) -> Result<SessionStats> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let (stop_tx, stop_rx) = oneshot::channel();
        {
            *self.lock_stop() = Some(stop_tx);
        }

        let result = self.run(stop_rx).await;

        {
            self.lock_stop().take();
        }
        result
    }

    /// End the running session from another task or thread.
    ///
    /// The serve loop observes the request in place of its pending read,
    /// closes the connection and cleans up. If no client has connected yet,
    /// the pending accept is abandoned instead. Returns `false` if nothing
    /// was running.
    pub fn stop(&self) -> bool {
        let stop_tx = { self.lock_stop().take() };
        match stop_tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    async fn run(&self, mut stop_rx: oneshot::Receiver<()>) -> Result<SessionStats> {
        let _interrupts = if self.config.log_interrupts {
            match InterruptLogger::spawn() {
                Ok(logger) => Some(logger),
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGINT: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let listener = SocketListener::bind(&self.path, self.config.backlog, self.config.socket_mode)
            .map_err(|e| {
                tracing::error!("{}", e);
                e
            })?;
        tracing::info!("Listening on {}", self.path.display());

        let stream = tokio::select! {
            accepted = listener.accept() => accepted.map_err(|e| {
                tracing::error!("{}", e);
                e
            })?,
            _ = &mut stop_rx => {
                tracing::info!("Stopped before a client connected");
                return Ok(SessionStats::new(SessionEnd::Stopped));
            }
        };
        tracing::info!("Client connected on {}", self.path.display());

        let (reader, writer) = stream.into_split();
        let conn = ConnectionWriter::new(writer);

        let stats = self.serve(reader, conn.clone(), stop_rx).await;

        conn.close().await;
        drop(listener);

        tracing::info!(
            "Session ended ({:?}): {} frames, {} dispatched, {} unmatched, {} malformed",
            stats.end,
            stats.frames,
            stats.dispatched,
            stats.unmatched,
            stats.malformed
        );
        Ok(stats)
    }

    /// Read, decode and dispatch until the session ends.
    async fn serve<R>(
        &self,
        mut reader: R,
        conn: Arc<ConnectionWriter>,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> SessionStats
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        let mut stats = SessionStats::new(SessionEnd::PeerClosed);

        loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = &mut stop_rx => {
                    tracing::debug!("Stop requested");
                    stats.end = SessionEnd::Stopped;
                    break;
                }
            };

            let n = match read {
                Ok(0) => {
                    tracing::debug!("Connection closed by peer");
                    stats.end = SessionEnd::PeerClosed;
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("read() failed: {}", e);
                    stats.end = SessionEnd::ReadError;
                    break;
                }
            };

            decoder.extend(&buf[..n]);
            self.drain(&mut decoder, &conn, &mut stats).await;
        }

        stats
    }

    /// Dispatch every complete value currently buffered.
    async fn drain(
        &self,
        decoder: &mut FrameDecoder,
        conn: &Arc<ConnectionWriter>,
        stats: &mut SessionStats,
    ) {
        loop {
            let value = match decoder.next_value() {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("msgpack decoding error, dropping buffered bytes: {}", e);
                    stats.malformed += 1;
                    break;
                }
            };
            stats.frames += 1;
            tracing::debug!("recv: {}", value);

            let envelope = match CallEnvelope::try_from(value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!("msgpack decoding error: {}", e);
                    stats.malformed += 1;
                    continue;
                }
            };

            self.dispatch(envelope, conn, stats).await;
        }
    }

    /// Run the handler for one call, if there is one.
    async fn dispatch(
        &self,
        envelope: CallEnvelope,
        conn: &Arc<ConnectionWriter>,
        stats: &mut SessionStats,
    ) {
        let handler = {
            let registry = self.read_registry();
            registry.lookup(&envelope.command)
        };

        let Some(handler) = handler else {
            tracing::trace!("No handler for command {:?}", envelope.command);
            stats.unmatched += 1;
            return;
        };

        stats.dispatched += 1;
        let reply = ReplyChannel::new(envelope.call_id, conn.clone());
        if let Err(e) = handler.call(envelope.payload, reply).await {
            tracing::error!("Handler error for command {}: {}", envelope.command, e);
            stats.handler_errors += 1;
        }
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HandlerRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stop(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
