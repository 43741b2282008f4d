//! Once-only shutdown coordination.
//!
//! A [`Shutdown`] is shared between the signal handler and the receive loop.
//! The first [`Shutdown::trigger`] flips it; later calls are no-ops and
//! return `false`, so the caller that wins is the one that disconnects.
//!
//! ```text
//! SIGINT/SIGTERM ──► trigger() ──► listener() resolves ──► run() returns
//!                                                        ──► disconnect()
//! ```

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Clonable once-only shutdown flag.
#[derive(Clone, Debug)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// A handle that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request shutdown.
    ///
    /// Returns `true` only for the call that actually triggered it.
    pub fn trigger(&self) -> bool {
        self.sender.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Future that resolves once shutdown has been requested.
    ///
    /// Resolves immediately if it already was.
    pub fn listener(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            // Err means every handle is gone; nothing is left to wait for.
            let _ = receiver.wait_for(|triggered| *triggered).await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
///
/// Returns the name of the signal received. On non-unix targets only Ctrl+C
/// is observed.
///
/// # Errors
///
/// Returns an error if a signal handler could not be installed.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C signal");
                Ok("SIGINT")
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
                Ok("SIGTERM")
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
        Ok("SIGINT")
    }
}
