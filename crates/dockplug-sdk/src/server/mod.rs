//! Serving lifecycle: accept loop, connection handling and cleanup.
//!
//! [`Server::serve`] blocks the calling thread. It drives a private tokio
//! runtime whose accept loop hands each connection to hyper, and every
//! request to the mux on the blocking pool. The listener's spec file or
//! socket path is removed before `serve` returns, whether it returns `Ok`,
//! `Err`, or unwinds.

mod connection;
mod shutdown;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dockplug_config::{Config, PipeOptions};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::mux::Mux;
use crate::transport::{ListenerError, ListenerKind, PluginListener, SocketActivation};

pub use shutdown::{
    ShutdownError, ShutdownHandle, ShutdownSignal, SystemShutdownSignal, watch_signal,
};

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

const ACCEPT_BACKOFF: Duration = Duration::from_millis(150);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end a call to [`Server::serve`].
#[derive(Debug, Error)]
pub enum ServeError {
    /// Building the listener failed before serving started.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The serving runtime could not be started.
    #[error("failed to start the serving runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bound listener could not be registered with the runtime.
    #[error("failed to register the listener: {source}")]
    Register {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The first named pipe instance could not be created.
    #[error("failed to create named pipe '{address}': {source}")]
    NamedPipe {
        /// Pipe address.
        address: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Accepting a connection failed with a non-recoverable error.
    #[error("failed to accept a connection: {source}")]
    Accept {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Serves a [`Mux`] on plugin listeners.
#[derive(Debug)]
pub struct Server {
    mux: Arc<Mux>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Wraps a fully registered mux.
    #[must_use]
    pub fn new(mux: Mux) -> Self {
        Self {
            mux: Arc::new(mux),
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Returns the mux being served.
    #[must_use]
    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    /// Returns a handle that stops [`serve`](Self::serve) from any thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves requests on `listener` until shutdown or a fatal accept error.
    ///
    /// The listener's discovery artifact is removed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] when the runtime cannot start, the listener
    /// cannot be registered, or accepting fails for a reason other than a
    /// transient connection or resource error.
    pub fn serve(&self, listener: PluginListener) -> Result<(), ServeError> {
        let transport = listener.transport();
        let discovery = listener.discovery_path().map(Path::to_path_buf);
        let (kind, artifact) = listener.into_parts();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("dockplug-serve")
            .build()
            .map_err(|source| ServeError::Runtime { source })?;

        info!(
            target: SERVER_TARGET,
            transport,
            discovery = ?discovery,
            routes = self.mux.routes().len(),
            "plugin serving"
        );
        let outcome = runtime.block_on(self.run(kind));
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        drop(artifact);

        match &outcome {
            Ok(()) => info!(target: SERVER_TARGET, transport, "plugin stopped"),
            Err(error) => warn!(
                target: SERVER_TARGET,
                transport,
                error = %error,
                "plugin stopped with error"
            ),
        }
        outcome
    }

    /// Binds a TCP listener and serves on it.
    ///
    /// # Errors
    ///
    /// See [`PluginListener::tcp`] and [`serve`](Self::serve).
    pub fn serve_tcp(
        &self,
        address: &str,
        plugin_name: &str,
        spec_directory: &Path,
    ) -> Result<(), ServeError> {
        self.serve(PluginListener::tcp(address, plugin_name, spec_directory)?)
    }

    /// Binds a Unix listener and serves on it.
    ///
    /// # Errors
    ///
    /// See [`PluginListener::unix`] and [`serve`](Self::serve).
    pub fn serve_unix(
        &self,
        address: &Path,
        group: Option<&str>,
        socket_directory: &Path,
        activation: SocketActivation,
    ) -> Result<(), ServeError> {
        self.serve(PluginListener::unix(
            address,
            group,
            socket_directory,
            activation,
        )?)
    }

    /// Prepares a named pipe listener and serves on it.
    ///
    /// # Errors
    ///
    /// See [`PluginListener::named_pipe`] and [`serve`](Self::serve).
    pub fn serve_named_pipe(
        &self,
        address: &str,
        plugin_name: &str,
        spec_directory: &Path,
        options: &PipeOptions,
    ) -> Result<(), ServeError> {
        self.serve(PluginListener::named_pipe(
            address,
            plugin_name,
            spec_directory,
            options,
        )?)
    }

    /// Builds the listener described by `config` and serves on it.
    ///
    /// # Errors
    ///
    /// See [`PluginListener::from_config`] and [`serve`](Self::serve).
    pub fn serve_config(&self, config: &Config) -> Result<(), ServeError> {
        self.serve(PluginListener::from_config(config)?)
    }

    async fn run(&self, kind: ListenerKind) -> Result<(), ServeError> {
        let shutdown = self.shutdown.subscribe();
        match kind {
            ListenerKind::Tcp(listener) => {
                let listener = listener
                    .set_nonblocking(true)
                    .and_then(|()| tokio::net::TcpListener::from_std(listener))
                    .map_err(|source| ServeError::Register { source })?;
                accept_loop(listener, &self.mux, shutdown).await
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let listener = listener
                    .set_nonblocking(true)
                    .and_then(|()| tokio::net::UnixListener::from_std(listener))
                    .map_err(|source| ServeError::Register { source })?;
                accept_loop(listener, &self.mux, shutdown).await
            }
            #[cfg(windows)]
            ListenerKind::NamedPipe(binding) => {
                let address = binding.address.clone();
                let acceptor = crate::transport::named_pipe::PipeAcceptor::bind(binding)
                    .map_err(|source| ServeError::NamedPipe { address, source })?;
                accept_loop(acceptor, &self.mux, shutdown).await
            }
        }
    }
}

/// A source of connected byte streams.
trait Acceptor {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn next_stream(&mut self) -> io::Result<Self::Stream>;
}

impl Acceptor for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn next_stream(&mut self) -> io::Result<Self::Stream> {
        self.accept().await.map(|(stream, _peer)| stream)
    }
}

#[cfg(unix)]
impl Acceptor for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn next_stream(&mut self) -> io::Result<Self::Stream> {
        self.accept().await.map(|(stream, _peer)| stream)
    }
}

#[cfg(windows)]
impl Acceptor for crate::transport::named_pipe::PipeAcceptor {
    type Stream = tokio::net::windows::named_pipe::NamedPipeServer;

    async fn next_stream(&mut self) -> io::Result<Self::Stream> {
        self.accept().await
    }
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    mux: &Arc<Mux>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServeError> {
    let mut last_transient = None;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!(target: SERVER_TARGET, "accept loop stopping");
                return Ok(());
            }
            accepted = acceptor.next_stream() => match accepted {
                Ok(stream) => {
                    last_transient = None;
                    spawn_connection(stream, Arc::clone(mux));
                }
                Err(error) if is_transient(&error) => {
                    let kind = error.kind();
                    if last_transient != Some(kind) {
                        warn!(
                            target: SERVER_TARGET,
                            error = %error,
                            "accept failed, retrying"
                        );
                    }
                    last_transient = Some(kind);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(source) => return Err(ServeError::Accept { source }),
            }
        }
    }
}

fn spawn_connection<S>(stream: S, mux: Arc<Mux>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |request| connection::respond(Arc::clone(&mux), request));
        if let Err(error) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            debug!(target: SERVER_TARGET, error = %error, "connection ended with error");
        }
    });
}

fn is_transient(error: &io::Error) -> bool {
    use io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::OutOfMemory
    ) || is_resource_exhaustion(error)
}

#[cfg(unix)]
fn is_resource_exhaustion(error: &io::Error) -> bool {
    use nix::libc::{EMFILE, ENFILE, ENOBUFS, ENOMEM};

    matches!(error.raw_os_error(), Some(EMFILE | ENFILE | ENOBUFS | ENOMEM))
}

#[cfg(not(unix))]
const fn is_resource_exhaustion(_error: &io::Error) -> bool {
    false
}
