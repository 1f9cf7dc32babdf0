//! Process entry points that wire configuration, telemetry and serving.

use std::io;
use std::sync::Arc;

use dockplug_config::Config;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::info;

use crate::mux::Mux;
use crate::server::{ServeError, Server, ShutdownSignal, SystemShutdownSignal, watch_signal};
use crate::telemetry::{self, TelemetryError};

const LAUNCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launch");

/// Errors surfaced while launching a plugin process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The signal watcher thread could not be started.
    #[error("failed to start the signal watcher: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serving failed.
    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Loads [`Config`] from the process environment and serves `mux` until a
/// termination signal arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when any launch stage fails.
pub fn run_plugin(mux: Mux) -> Result<(), LaunchError> {
    let config = Config::load().map_err(|source| LaunchError::Config { source })?;
    run(&config, mux)
}

/// Serves `mux` as described by `config` until a termination signal
/// arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when telemetry, the listener or serving fails.
pub fn run(config: &Config, mux: Mux) -> Result<(), LaunchError> {
    run_with(config, mux, SystemShutdownSignal)
}

/// Serves `mux` as described by `config`, stopping once `signal` fires.
///
/// # Errors
///
/// Returns [`LaunchError`] when telemetry, the listener or serving fails.
pub fn run_with<S>(config: &Config, mux: Mux, signal: S) -> Result<(), LaunchError>
where
    S: ShutdownSignal + 'static,
{
    telemetry::initialise(config)?;
    info!(
        target: LAUNCH_TARGET,
        plugin = config.plugin_name(),
        endpoint = %config.endpoint(),
        implements = ?mux.manifest().implements(),
        "starting plugin"
    );
    let server = Server::new(mux);
    // The watcher thread is detached: it either triggers shutdown or dies
    // with the process.
    watch_signal(signal, server.shutdown_handle())
        .map_err(|source| LaunchError::Signals { source })?;
    server.serve_config(config)?;
    Ok(())
}
