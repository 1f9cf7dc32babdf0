//! Local directory volume plugin.
//!
//! Volumes are plain directories under the configured data root. The
//! plugin serves the volume protocol through [`ShimDriver`] and keeps mount
//! reference counts in memory, so a restart forgets outstanding mounts.

mod store;

use std::sync::Arc;

use camino::Utf8PathBuf;
use dockplug_config::Config;
use dockplug_protocols::VolumeHandler;
use dockplug_protocols::volume::ShimDriver;
use dockplug_sdk::launch::{self, LaunchError};
use dockplug_sdk::{Mux, MuxError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

pub use store::{DirectoryStore, DirectoryVolume, StoreError};

/// Data root used when the configuration leaves it unset.
pub const DEFAULT_DATA_ROOT: &str = "/var/lib/dockplug/volumes";

/// Errors that stop the plugin from starting or serving.
#[derive(Debug, Error)]
pub enum LocalVolError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The volume store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The volume protocol could not be installed.
    #[error(transparent)]
    Mux(#[from] MuxError),
    /// Launching or serving failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Resolves the directory holding volumes for `config`.
#[must_use]
pub fn data_root(config: &Config) -> Utf8PathBuf {
    config
        .data_root()
        .map_or_else(|| Utf8PathBuf::from(DEFAULT_DATA_ROOT), ToOwned::to_owned)
}

/// Builds the plugin mux over `store`.
///
/// # Errors
///
/// Returns [`MuxError`] when the volume routes cannot be registered.
pub fn plugin_mux(store: DirectoryStore) -> Result<Mux, MuxError> {
    let mut mux = Mux::new();
    mux.install(VolumeHandler::new(ShimDriver::new(store)))?;
    Ok(mux)
}

/// Loads configuration and serves the plugin until a termination signal.
///
/// # Errors
///
/// Returns [`LocalVolError`] when configuration, the store or serving fails.
pub fn run() -> Result<(), LocalVolError> {
    let config = Config::load().map_err(|source| LocalVolError::Config { source })?;
    let store = DirectoryStore::open(data_root(&config))?;
    let mux = plugin_mux(store)?;
    launch::run(&config, mux)?;
    Ok(())
}
