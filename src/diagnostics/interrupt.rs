//! Non-fatal interrupt logging.
//!
//! While an [`InterruptLogger`] is alive every `SIGINT` is logged and
//! otherwise ignored. Registering the listener replaces the default SIGINT
//! action (terminate) for the rest of the process, even after the logger is
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

/// Background task logging received interrupts. Stops on drop.
pub struct InterruptLogger {
    received: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl InterruptLogger {
    /// Register for `SIGINT` and spawn the logging task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> std::io::Result<Self> {
        let mut interrupts = signal(SignalKind::interrupt())?;
        let received = Arc::new(AtomicU64::new(0));
        let counter = received.clone();

        let task = tokio::spawn(async move {
            while interrupts.recv().await.is_some() {
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("SIGINT received");
            }
        });

        Ok(Self { received, task })
    }

    /// Number of interrupts seen so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Drop for InterruptLogger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_interrupt_is_logged_not_fatal() {
        let logger = InterruptLogger::spawn().unwrap();

        // SAFETY: raise only delivers a signal to this process, and SIGINT
        // is handled by the listener registered above.
        assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while logger.received() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("interrupt was not observed");

        assert_eq!(logger.received(), 1);
    }
}
