//! Shutdown coordination for a serving plugin.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(unix)]
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
#[cfg(unix)]
use signal_hook::iterator::Signals;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use super::SERVER_TARGET;

/// Cloneable trigger that stops [`Server::serve`](super::Server::serve).
///
/// Triggering is permanent: once triggered, later calls to `serve` on the
/// same server return as soon as their listener is registered.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Asks the server to stop accepting connections and return.
    ///
    /// Safe to call from any thread, any number of times.
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!(target: SERVER_TARGET, "shutdown requested");
        }
    }

    /// Reports whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Source of process-level termination requests.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the signal source cannot be installed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for the host's termination request.
///
/// Unix hosts listen for `SIGTERM`, `SIGINT`, `SIGQUIT` or `SIGHUP`. Windows
/// hosts listen for console `CTRL_C` and `CTRL_CLOSE` events, which is how the
/// service control manager and an interactive console ask a process to stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

#[cfg(unix)]
impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: SERVER_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

#[cfg(windows)]
impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        use tokio::signal::windows::{ctrl_c, ctrl_close};

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ShutdownError::Install { source })?;
        runtime.block_on(async {
            let mut interrupt = ctrl_c().map_err(|source| ShutdownError::Install { source })?;
            let mut close = ctrl_close().map_err(|source| ShutdownError::Install { source })?;
            let event = tokio::select! {
                _ = interrupt.recv() => "ctrl_c",
                _ = close.recv() => "ctrl_close",
            };
            info!(target: SERVER_TARGET, event, "shutdown signal received");
            Ok(())
        })
    }
}

/// Triggers `handle` from a background thread once `signal` fires.
///
/// # Errors
///
/// Returns the spawn failure when the watcher thread cannot start.
pub fn watch_signal<S>(signal: S, handle: ShutdownHandle) -> io::Result<JoinHandle<()>>
where
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name(String::from("dockplug-signals"))
        .spawn(move || match signal.wait() {
            Ok(()) => handle.trigger(),
            Err(error) => warn!(
                target: SERVER_TARGET,
                error = %error,
                "shutdown signal watcher failed"
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Signal {}
        impl ShutdownSignal for Signal {
            fn wait(&self) -> Result<(), ShutdownError>;
        }
    }

    #[test]
    fn triggering_is_sticky_and_shared() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_triggered());
        clone.trigger();
        clone.trigger();
        assert!(handle.is_triggered());
    }

    #[test]
    fn subscribers_observe_the_trigger() {
        let handle = ShutdownHandle::new();
        let receiver = handle.subscribe();
        handle.trigger();
        assert!(*receiver.borrow());
    }

    #[test]
    fn signal_watchers_trigger_the_handle() {
        let mut signal = MockSignal::new();
        signal.expect_wait().times(1).returning(|| Ok(()));
        let handle = ShutdownHandle::new();
        let watcher = watch_signal(signal, handle.clone()).expect("spawn watcher");
        watcher.join().expect("join watcher");
        assert!(handle.is_triggered());
    }

    #[test]
    fn failed_watchers_leave_the_handle_untouched() {
        let mut signal = MockSignal::new();
        signal.expect_wait().times(1).returning(|| {
            Err(ShutdownError::Install {
                source: io::Error::other("no signals here"),
            })
        });
        let handle = ShutdownHandle::new();
        let watcher = watch_signal(signal, handle.clone()).expect("spawn watcher");
        watcher.join().expect("join watcher");
        assert!(!handle.is_triggered());
    }
}
