//! Docker Engine plugin protocols built on `dockplug-sdk`.
//!
//! Each module defines one protocol: its wire types, a driver trait for
//! the plugin author to implement, and a handler that installs the
//! protocol's routes into a [`dockplug_sdk::Mux`]. Several handlers may
//! share one mux, and therefore one socket.
//!
//! ```no_run
//! use dockplug_protocols::runtime::{ArgsResponse, PathResponse, RuntimeDriver, RuntimeHandler};
//! use dockplug_sdk::Mux;
//!
//! struct Runc;
//!
//! impl RuntimeDriver for Runc {
//!     fn path(&self) -> PathResponse {
//!         PathResponse { path: String::from("/usr/bin/runc") }
//!     }
//!
//!     fn args(&self) -> ArgsResponse {
//!         ArgsResponse::default()
//!     }
//! }
//!
//! let mut mux = Mux::new();
//! mux.install(RuntimeHandler::new(Runc))?;
//! dockplug_sdk::launch::run_plugin(mux)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod authorization;
pub mod graphdriver;
pub mod ipam;
pub mod mountpoint;
pub mod network;
pub mod runtime;
pub mod secrets;
pub mod volume;
mod wire;

pub use authorization::{AuthorizationDriver, AuthorizationHandler};
pub use graphdriver::{GraphDriver, GraphDriverHandler};
pub use ipam::{IpamDriver, IpamHandler};
pub use mountpoint::{MountPointHandler, MountPointPlugin};
pub use network::{NetworkDriver, NetworkHandler};
pub use runtime::{RuntimeDriver, RuntimeHandler};
pub use secrets::{SecretProvider, SecretsHandler};
pub use volume::{VolumeDriver, VolumeHandler};
