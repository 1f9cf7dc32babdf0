//! Shared configuration for Docker Engine plugins built with dockplug.
//!
//! [`Config`] is loaded through `ortho_config`, which layers built-in
//! defaults, an optional configuration file, `DOCKPLUG_*` environment
//! variables and command-line flags in increasing order of precedence. The
//! resolved values tell the SDK where to listen, where the Engine looks for
//! discovery artifacts and how to shape diagnostics.

mod defaults;
mod endpoint;
mod logging;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_PIPE_BUFFER_SIZE, DEFAULT_PLUGIN_NAME, DEFAULT_SOCKET_DIRECTORY,
    UNIX_SPEC_DIRECTORY, default_endpoint, default_log_filter, default_log_format,
    default_plugin_name, default_socket_directory, default_spec_directory,
};
pub use endpoint::{EndpointParseError, PipeOptions, PluginEndpoint};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for a plugin process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DOCKPLUG")]
pub struct Config {
    /// Name the Engine uses for the plugin. It also names the spec file and
    /// bare Unix sockets.
    #[ortho_config(default = defaults::default_plugin_name())]
    pub plugin_name: String,
    /// Listener endpoint.
    #[ortho_config(default = defaults::default_endpoint())]
    pub endpoint: PluginEndpoint,
    /// Spec-file directory. Unset means the platform default.
    pub spec_directory: Option<Utf8PathBuf>,
    /// Directory for bare Unix socket names. Unset means
    /// [`DEFAULT_SOCKET_DIRECTORY`].
    pub socket_directory: Option<Utf8PathBuf>,
    /// Bind a fresh socket even when systemd passes one.
    ///
    /// A bool flag parses to `false` when absent, so the setting is stored in
    /// its inverted form to keep activation on by default.
    pub disable_socket_activation: bool,
    /// Root directory for driver-managed state.
    pub data_root: Option<Utf8PathBuf>,
    /// `tracing_subscriber` filter expression.
    #[ortho_config(default = defaults::default_log_filter())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_name: default_plugin_name(),
            endpoint: default_endpoint(),
            spec_directory: None,
            socket_directory: None,
            disable_socket_activation: false,
            data_root: None,
            log_filter: default_log_filter(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Returns the plugin name.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &PluginEndpoint {
        &self.endpoint
    }

    /// Resolves the spec-file directory.
    #[must_use]
    pub fn spec_directory(&self) -> Utf8PathBuf {
        self.spec_directory
            .clone()
            .unwrap_or_else(default_spec_directory)
    }

    /// Resolves the directory used for bare Unix socket names.
    #[must_use]
    pub fn socket_directory(&self) -> Utf8PathBuf {
        self.socket_directory
            .clone()
            .unwrap_or_else(default_socket_directory)
    }

    /// Reports whether systemd socket activation is honoured.
    #[must_use]
    pub const fn socket_activation(&self) -> bool {
        !self.disable_socket_activation
    }

    /// Returns the configured data root, if any.
    #[must_use]
    pub fn data_root(&self) -> Option<&camino::Utf8Path> {
        self.data_root.as_deref()
    }

    /// Returns the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
