//! Unix domain socket listener.
//!
//! # Example
//!
//! ```ignore
//! use msgpack_server::transport::SocketListener;
//!
//! let listener = SocketListener::bind(path, 5, 0o777)?;
//! let stream = listener.accept().await?;
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::net::{UnixListener, UnixStream};

use crate::error::{Result, ServerError, SetupStep};

/// Removes the socket file on drop.
struct PathCleanup {
    path: PathBuf,
}

impl Drop for PathCleanup {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!("unlink({}) failed: {}", self.path.display(), e);
        }
    }
}

/// Listening Unix domain socket.
///
/// The socket file is removed when the listener is dropped.
pub struct SocketListener {
    listener: UnixListener,
    cleanup: PathCleanup,
}

impl SocketListener {
    /// Create, bind, chmod and listen on `path`.
    ///
    /// An existing file at `path` is left alone, so binding fails if the
    /// path is taken. Once bind succeeds the file is owned by the listener
    /// and removed again if a later step fails.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path, backlog: i32, mode: u32) -> Result<Self> {
        let setup_err = |step: SetupStep, source: std::io::Error| ServerError::Setup {
            step,
            path: path.to_path_buf(),
            source,
        };

        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
            .map_err(|e| setup_err(SetupStep::Socket, e))?;

        let addr = SockAddr::unix(path).map_err(|e| setup_err(SetupStep::Bind, e))?;
        socket
            .bind(&addr)
            .map_err(|e| setup_err(SetupStep::Bind, e))?;

        let cleanup = PathCleanup {
            path: path.to_path_buf(),
        };

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| setup_err(SetupStep::Permissions, e))?;

        socket
            .listen(backlog)
            .map_err(|e| setup_err(SetupStep::Listen, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| setup_err(SetupStep::Listen, e))?;

        let listener = UnixListener::from_std(socket.into())
            .map_err(|e| setup_err(SetupStep::Listen, e))?;

        Ok(Self { listener, cleanup })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|source| ServerError::Setup {
                step: SetupStep::Accept,
                path: self.cleanup.path.clone(),
                source,
            })?;
        Ok(stream)
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.cleanup.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_bind_sets_mode_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rpc.sock");

        let listener = SocketListener::bind(&path, 5, 0o777).unwrap();
        assert_eq!(listener.path(), path.as_path());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_fails_on_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.sock");
        fs::write(&path, b"occupied").unwrap();

        let err = SocketListener::bind(&path, 5, 0o777).err().unwrap();
        assert!(matches!(
            err,
            ServerError::Setup {
                step: SetupStep::Bind,
                ..
            }
        ));

        // A failed bind must not remove somebody else's file.
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_bind_fails_in_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("rpc.sock");

        let err = SocketListener::bind(&path, 5, 0o777).err().unwrap();
        assert!(err.to_string().starts_with("bind("));
    }

    #[tokio::test]
    async fn test_accept_single_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accept.sock");

        let listener = SocketListener::bind(&path, 5, 0o777).unwrap();
        let client = UnixStream::connect(&path).await.unwrap();
        let server = listener.accept().await.unwrap();

        assert!(client.peer_addr().is_ok());
        assert!(server.local_addr().is_ok());
    }
}
