use camino::Utf8PathBuf;

use crate::endpoint::PluginEndpoint;

/// Plugin name used when none is configured.
pub const DEFAULT_PLUGIN_NAME: &str = "dockplug";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory the Engine scans for plugin Unix sockets.
pub const DEFAULT_SOCKET_DIRECTORY: &str = "/run/docker/plugins";

/// Directory the Engine scans for spec files on Unix hosts.
pub const UNIX_SPEC_DIRECTORY: &str = "/etc/docker/plugins";

/// Named pipe buffer size applied to both directions unless overridden.
pub const DEFAULT_PIPE_BUFFER_SIZE: u32 = 4096;

/// Owned default plugin name.
#[must_use]
pub fn default_plugin_name() -> String {
    DEFAULT_PLUGIN_NAME.to_owned()
}

/// Owned default log filter.
#[must_use]
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default socket directory for bare Unix socket names.
#[must_use]
pub fn default_socket_directory() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SOCKET_DIRECTORY)
}

/// Computes the platform spec-file directory.
///
/// Windows hosts use `%PROGRAMDATA%\docker\plugins`, falling back to
/// `C:\ProgramData` when the variable is unset.
#[must_use]
pub fn default_spec_directory() -> Utf8PathBuf {
    default_spec_directory_inner()
}

#[cfg(windows)]
fn default_spec_directory_inner() -> Utf8PathBuf {
    let base = std::env::var("PROGRAMDATA").unwrap_or_else(|_| String::from(r"C:\ProgramData"));
    let mut path = Utf8PathBuf::from(base);
    path.push("docker");
    path.push("plugins");
    path
}

#[cfg(not(windows))]
fn default_spec_directory_inner() -> Utf8PathBuf {
    Utf8PathBuf::from(UNIX_SPEC_DIRECTORY)
}

/// Computes the default endpoint for the platform.
///
/// Unix hosts listen on `<socket dir>/dockplug.sock`; Windows hosts on
/// `\\.\pipe\dockplug`.
#[must_use]
pub fn default_endpoint() -> PluginEndpoint {
    default_endpoint_inner()
}

#[cfg(windows)]
fn default_endpoint_inner() -> PluginEndpoint {
    PluginEndpoint::named_pipe(format!(r"\\.\pipe\{DEFAULT_PLUGIN_NAME}"))
}

#[cfg(not(windows))]
fn default_endpoint_inner() -> PluginEndpoint {
    PluginEndpoint::unix(DEFAULT_PLUGIN_NAME)
}
