//! Graceful shutdown coordination.
//!
//! ```rust,ignore
//! let shutdown = ShutdownSignal::with_os_signals();
//! server.run_with_shutdown(shutdown).await?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// A cloneable, one-shot shutdown trigger.
///
/// # Example
///
/// ```rust
/// use fabriq_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes when shutdown is triggered, immediately if it already was.
    pub async fn recv(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Creates a signal triggered by SIGTERM or Ctrl+C.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received Ctrl+C, shutting down");
}

/// Counts open connections so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection until the returned guard is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Completes once no connections are open.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active_connections() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps a connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recv_after_trigger() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), shutdown.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recv_wakes_waiters() {
        let shutdown = ShutdownSignal::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_tracker_waits_for_guards() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.acquire();
        assert_eq!(tracker.active_connections(), 1);

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.active_connections(), 0);
    }
}
