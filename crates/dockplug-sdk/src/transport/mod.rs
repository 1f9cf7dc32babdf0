//! Listener construction and discovery artifacts.
//!
//! The Engine finds a plugin either through a spec file naming a TCP or
//! named pipe address, or through a Unix socket in a well-known directory.
//! [`PluginListener`] binds the socket and owns its advertisement so the two
//! appear and disappear together.

#[cfg(unix)]
mod activation;
mod errors;
mod listener;
#[cfg(windows)]
pub(crate) mod named_pipe;
mod spec_file;
#[cfg(unix)]
mod unix;

pub use errors::ListenerError;
pub(crate) use listener::ListenerKind;
pub use listener::{PluginListener, SocketActivation};
pub use spec_file::{ArtifactKind, DiscoveryArtifact};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
