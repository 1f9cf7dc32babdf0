//! Toolkit for writing Docker Engine plugins.
//!
//! A plugin is an HTTP/1.1 server the Engine reaches over a Unix socket, a
//! Windows named pipe or TCP. Every call is a `POST` whose path names the
//! operation and whose body is JSON. The Engine first calls
//! `/Plugin.Activate` to learn which protocols the plugin implements, then
//! routes protocol calls to it.
//!
//! The crate is split along those seams:
//!
//! - [`Mux`] holds the route table and the activation [`Manifest`].
//! - [`codec`] turns driver results into replies and request bodies into
//!   typed values.
//! - [`PluginListener`] binds a transport and owns the spec file or socket
//!   path that lets the Engine discover it.
//! - [`Server`] runs the accept loop and always removes the discovery
//!   artifact before returning.
//! - [`launch`] wires configuration, telemetry and signals for binaries.
//!
//! Protocol adapters implement [`Plugin`] and are installed into a mux:
//!
//! ```no_run
//! use dockplug_sdk::{Mux, Server, codec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut mux = Mux::new();
//! mux.handle("/VolumeDriver.Capabilities", |_request| {
//!     Ok(codec::encode_response(&serde_json::json!({"Capabilities": {"Scope": "local"}}), false))
//! })?;
//! mux.add_capability("VolumeDriver");
//! Server::new(mux).serve_tcp("127.0.0.1:0", "demo", std::path::Path::new("/etc/docker/plugins"))?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod driver;
pub mod launch;
mod mux;
mod reply;
mod request;
mod server;
pub mod telemetry;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dockplug_config::Config;
pub use driver::{DriverError, DriverResult, Plugin};
pub use hyper::{HeaderMap, StatusCode};
pub use mux::{ACTIVATE_PATH, Handler, Manifest, Mux, MuxError};
pub use reply::{HandlerResult, Rejection, Reply};
pub use request::{PluginRequest, RequestBody};
pub use server::{
    ServeError, Server, ShutdownError, ShutdownHandle, ShutdownSignal, SystemShutdownSignal,
    watch_signal,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{
    ArtifactKind, DiscoveryArtifact, ListenerError, PluginListener, SocketActivation,
};

#[cfg(test)]
mod tests;
