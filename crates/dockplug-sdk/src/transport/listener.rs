//! Listener factory for the three Engine transports.

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::path::Path;

use dockplug_config::{Config, PipeOptions, PluginEndpoint};
use tracing::info;

use super::spec_file::{DiscoveryArtifact, validate_plugin_name, write_spec_file};
use super::{LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::os::unix::net::UnixListener;

#[cfg(windows)]
use super::named_pipe::NamedPipeBinding;

/// Whether a Unix listener may adopt a socket passed by systemd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketActivation {
    /// Use an inherited socket when `LISTEN_PID` names this process.
    Enabled,
    /// Always bind a fresh socket.
    Disabled,
}

impl From<bool> for SocketActivation {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

/// A bound listener and the artifact that advertises it.
///
/// The artifact lives exactly as long as the listener: dropping a
/// `PluginListener` closes the socket, then removes its spec file or
/// socket path.
#[derive(Debug)]
pub struct PluginListener {
    // Field order is drop order: close the socket before removing the
    // artifact that advertises it.
    kind: ListenerKind,
    artifact: Option<DiscoveryArtifact>,
}

#[derive(Debug)]
pub(crate) enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
    #[cfg(windows)]
    NamedPipe(NamedPipeBinding),
}

impl PluginListener {
    /// Binds a TCP listener and advertises it in
    /// `<spec_directory>/<plugin_name>.spec` as `tcp://<bound address>`.
    ///
    /// An address starting with `:` binds every IPv4 interface.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound or the spec file cannot be
    /// written. No spec file remains after a failure.
    pub fn tcp(
        address: &str,
        plugin_name: &str,
        spec_directory: &Path,
    ) -> Result<Self, ListenerError> {
        validate_plugin_name(plugin_name)?;
        let listener = bind_tcp(address)?;
        let local = listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddress { source })?;
        info!(target: LISTENER_TARGET, address = %local, "tcp listener bound");
        let artifact = write_spec_file(spec_directory, plugin_name, &format!("tcp://{local}"))?;
        Ok(Self {
            kind: ListenerKind::Tcp(listener),
            artifact: Some(artifact),
        })
    }

    /// Binds a Unix socket the Engine discovers by path.
    ///
    /// With activation enabled and a socket inherited from systemd, that
    /// socket is served as-is and never deleted. Otherwise `address` is
    /// either an absolute socket path or a bare name placed at
    /// `<socket_directory>/<name>.sock`, and `group`, when set, receives
    /// read/write access.
    ///
    /// # Errors
    ///
    /// Fails on malformed activation state, live or non-socket files at the
    /// path, bind failures and group lookup or ownership failures.
    #[cfg(unix)]
    pub fn unix(
        address: &Path,
        group: Option<&str>,
        socket_directory: &Path,
        activation: SocketActivation,
    ) -> Result<Self, ListenerError> {
        use super::activation::inherited_listener;
        use super::unix;

        if activation == SocketActivation::Enabled
            && let Some(listener) = inherited_listener()?
        {
            return Ok(Self {
                kind: ListenerKind::Unix(listener),
                artifact: None,
            });
        }

        let path = unix::socket_path(address, socket_directory)?;
        let listener = unix::bind_unix(&path)?;
        // From here the socket file exists, so let the guard own it.
        let artifact = DiscoveryArtifact::unix_socket(path);
        if let Some(group) = group {
            unix::grant_group_access(artifact.path(), group)?;
        }
        info!(
            target: LISTENER_TARGET,
            path = %artifact.path().display(),
            "unix listener bound"
        );
        Ok(Self {
            kind: ListenerKind::Unix(listener),
            artifact: Some(artifact),
        })
    }

    /// Unix sockets are unavailable on this platform.
    ///
    /// # Errors
    ///
    /// Always returns [`ListenerError::UnixUnsupported`].
    #[cfg(not(unix))]
    pub fn unix(
        address: &Path,
        _group: Option<&str>,
        _socket_directory: &Path,
        _activation: SocketActivation,
    ) -> Result<Self, ListenerError> {
        Err(ListenerError::UnixUnsupported {
            address: address.display().to_string(),
        })
    }

    /// Prepares a named pipe listener advertised as `npipe://<address>`.
    ///
    /// The pipe name is claimed before the spec file is written, so a name
    /// already served by another process fails here and leaves that
    /// process's spec file alone. The long-lived first instance is created
    /// when serving starts.
    ///
    /// # Errors
    ///
    /// Fails on an invalid security descriptor, a pipe name owned elsewhere
    /// or a spec file that cannot be written, and always on platforms
    /// without named pipes.
    #[cfg(windows)]
    pub fn named_pipe(
        address: &str,
        plugin_name: &str,
        spec_directory: &Path,
        options: &PipeOptions,
    ) -> Result<Self, ListenerError> {
        validate_plugin_name(plugin_name)?;
        let binding = NamedPipeBinding {
            address: address.to_owned(),
            options: options.clone(),
        };
        binding.claim()?;
        info!(target: LISTENER_TARGET, address, "named pipe claimed");
        let artifact = write_spec_file(spec_directory, plugin_name, &format!("npipe://{address}"))?;
        Ok(Self {
            kind: ListenerKind::NamedPipe(binding),
            artifact: Some(artifact),
        })
    }

    /// Named pipes are unavailable on this platform.
    ///
    /// # Errors
    ///
    /// Always returns [`ListenerError::NamedPipeUnsupported`].
    #[cfg(not(windows))]
    pub fn named_pipe(
        address: &str,
        _plugin_name: &str,
        _spec_directory: &Path,
        _options: &PipeOptions,
    ) -> Result<Self, ListenerError> {
        Err(ListenerError::NamedPipeUnsupported {
            address: address.to_owned(),
        })
    }

    /// Builds the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the selected constructor.
    pub fn from_config(config: &Config) -> Result<Self, ListenerError> {
        match config.endpoint() {
            PluginEndpoint::Tcp { address } => Self::tcp(
                address,
                config.plugin_name(),
                config.spec_directory().as_std_path(),
            ),
            PluginEndpoint::Unix { address, group } => Self::unix(
                address.as_std_path(),
                group.as_deref(),
                config.socket_directory().as_std_path(),
                SocketActivation::from(config.socket_activation()),
            ),
            PluginEndpoint::NamedPipe { address, options } => Self::named_pipe(
                address,
                config.plugin_name(),
                config.spec_directory().as_std_path(),
                options,
            ),
        }
    }

    /// Returns the bound TCP address.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
            #[cfg(windows)]
            ListenerKind::NamedPipe(_) => None,
        }
    }

    /// Returns the spec file or socket path advertising this listener.
    #[must_use]
    pub fn discovery_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(DiscoveryArtifact::path)
    }

    /// Returns the transport name used in logs.
    #[must_use]
    pub const fn transport(&self) -> &'static str {
        match &self.kind {
            ListenerKind::Tcp(_) => "tcp",
            #[cfg(unix)]
            ListenerKind::Unix(_) => "unix",
            #[cfg(windows)]
            ListenerKind::NamedPipe(_) => "named_pipe",
        }
    }

    pub(crate) fn into_parts(self) -> (ListenerKind, Option<DiscoveryArtifact>) {
        (self.kind, self.artifact)
    }
}

fn bind_tcp(address: &str) -> Result<TcpListener, ListenerError> {
    let resolvable = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_owned()
    };
    let mut addrs = resolvable
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            address: address.to_owned(),
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        address: address.to_owned(),
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp {
        address: addr.to_string(),
        source,
    })
}
