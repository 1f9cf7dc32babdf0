//! Error types for listener construction.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while creating a listener or its discovery artifact.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Plugin name cannot be used as a file name.
    #[error("invalid plugin name '{name}'")]
    InvalidPluginName {
        /// Rejected name.
        name: String,
    },
    /// TCP address could not be resolved.
    #[error("failed to resolve TCP address {address}: {source}")]
    Resolve {
        /// Configured address.
        address: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// TCP address resolved to nothing.
    #[error("no TCP addresses resolved for {address}")]
    ResolveEmpty {
        /// Configured address.
        address: String,
    },
    /// Binding the TCP socket failed.
    #[error("failed to bind TCP listener at {address}: {source}")]
    BindTcp {
        /// Address being bound.
        address: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The bound TCP socket could not report its address.
    #[error("failed to read TCP listener address: {source}")]
    LocalAddress {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// A spec or socket directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        /// Directory being created.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The spec file could not be written.
    #[error("failed to write spec file {path}: {source}")]
    WriteSpec {
        /// Spec file path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are not available on this platform.
    #[error("unix sockets are unsupported for {address}")]
    UnixUnsupported {
        /// Configured address.
        address: String,
    },
    /// Another process is serving on the socket path.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: PathBuf,
    },
    /// The socket path is occupied by something other than a socket.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: PathBuf,
    },
    /// Inspecting an existing socket path failed.
    #[error("failed to inspect existing unix socket {path}: {source}")]
    UnixInspect {
        /// Socket path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket failed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Binding the Unix socket failed.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: PathBuf,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The configured group does not exist and is not a numeric gid.
    #[error("unknown group '{group}'")]
    UnknownGroup {
        /// Configured group.
        group: String,
    },
    /// Looking up the configured group failed.
    #[error("failed to look up group '{group}': {source}")]
    GroupLookup {
        /// Configured group.
        group: String,
        /// Lookup failure.
        #[source]
        source: io::Error,
    },
    /// Handing the socket to the configured group failed.
    #[error("failed to set group ownership of {path}: {source}")]
    SocketOwnership {
        /// Socket path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Restricting the socket's mode failed.
    #[error("failed to set permissions on {path}: {source}")]
    SocketPermissions {
        /// Socket path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// `LISTEN_PID` or `LISTEN_FDS` held unusable values.
    #[error("invalid socket activation environment: {reason}")]
    ActivationEnvironment {
        /// Description of the problem.
        reason: String,
    },
    /// systemd passed more sockets than a plugin can serve.
    #[error("socket activation passed {count} sockets; exactly one is supported")]
    TooManyActivationSockets {
        /// Number of inherited descriptors.
        count: usize,
    },
    /// An inherited socket descriptor could not be prepared.
    #[error("failed to adopt activation socket {fd}: {source}")]
    Activation {
        /// Descriptor number.
        fd: i32,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Named pipes are not available on this platform.
    #[error("named pipes are unsupported for {address}")]
    NamedPipeUnsupported {
        /// Configured address.
        address: String,
    },
    /// The pipe name could not be claimed, usually because another process
    /// already serves it.
    #[error("failed to claim named pipe {address}: {source}")]
    NamedPipeClaim {
        /// Pipe address.
        address: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The SDDL string cannot be handed to the operating system.
    #[error("invalid security descriptor '{descriptor}': {reason}")]
    SecurityDescriptor {
        /// Configured descriptor.
        descriptor: String,
        /// Description of the problem.
        reason: String,
    },
}
