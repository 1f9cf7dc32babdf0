use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::defaults::DEFAULT_PIPE_BUFFER_SIZE;

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";
const NPIPE_SCHEME: &str = "npipe://";

/// Where a plugin listens for Engine requests.
///
/// Endpoints are written as URLs in configuration files, environment
/// variables and flags:
///
/// - `tcp://127.0.0.1:8080` or `tcp://:8080` for all interfaces
/// - `unix://name` for `<socket dir>/name.sock`, or `unix:///run/x.sock`
/// - `npipe:////./pipe/name`
///
/// Unix endpoints accept `?group=NAME_OR_GID`. Named pipes accept
/// `security_descriptor`, `in_buffer_size` and `out_buffer_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PluginEndpoint {
    /// TCP listener advertised through a spec file.
    Tcp {
        /// `host:port` to bind. An empty host binds every IPv4 interface.
        address: String,
    },
    /// Unix domain socket discovered by its path.
    Unix {
        /// Bare socket name or absolute socket path.
        address: Utf8PathBuf,
        /// Group granted read/write access to the socket.
        group: Option<String>,
    },
    /// Windows named pipe advertised through a spec file.
    NamedPipe {
        /// Pipe path such as `\\.\pipe\name`.
        address: String,
        /// Pipe creation options.
        options: PipeOptions,
    },
}

/// Creation options for a named pipe listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeOptions {
    /// SDDL security descriptor applied to the pipe.
    pub security_descriptor: Option<String>,
    /// Inbound buffer size in bytes.
    pub in_buffer_size: u32,
    /// Outbound buffer size in bytes.
    pub out_buffer_size: u32,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            security_descriptor: None,
            in_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            out_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }
}

impl PluginEndpoint {
    /// Builds a TCP endpoint.
    #[must_use]
    pub fn tcp(address: impl Into<String>) -> Self {
        Self::Tcp {
            address: address.into(),
        }
    }

    /// Builds a Unix socket endpoint without a group override.
    #[must_use]
    pub fn unix(address: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix {
            address: address.into(),
            group: None,
        }
    }

    /// Builds a named pipe endpoint with default options.
    #[must_use]
    pub fn named_pipe(address: impl Into<String>) -> Self {
        Self::NamedPipe {
            address: address.into(),
            options: PipeOptions::default(),
        }
    }

    /// Returns the transport name used in logs.
    #[must_use]
    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix { .. } => "unix",
            Self::NamedPipe { .. } => "named_pipe",
        }
    }

    /// Returns the Unix socket address when the endpoint uses that transport.
    #[must_use]
    pub fn unix_address(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { address, .. } => Some(address.as_ref()),
            Self::Tcp { .. } | Self::NamedPipe { .. } => None,
        }
    }
}

impl fmt::Display for PluginEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { address } => write!(formatter, "{TCP_SCHEME}{address}"),
            Self::Unix { address, group } => {
                write!(formatter, "{UNIX_SCHEME}{address}")?;
                let mut query = form_urlencoded::Serializer::new(String::new());
                if let Some(group) = group {
                    query.append_pair("group", group);
                }
                write_query(formatter, &query.finish())
            }
            Self::NamedPipe { address, options } => {
                write!(formatter, "{NPIPE_SCHEME}{}", address.replace('\\', "/"))?;
                let mut query = form_urlencoded::Serializer::new(String::new());
                if let Some(descriptor) = &options.security_descriptor {
                    query.append_pair("security_descriptor", descriptor);
                }
                if options.in_buffer_size != DEFAULT_PIPE_BUFFER_SIZE {
                    query.append_pair("in_buffer_size", &options.in_buffer_size.to_string());
                }
                if options.out_buffer_size != DEFAULT_PIPE_BUFFER_SIZE {
                    query.append_pair("out_buffer_size", &options.out_buffer_size.to_string());
                }
                write_query(formatter, &query.finish())
            }
        }
    }
}

fn write_query(formatter: &mut fmt::Formatter<'_>, query: &str) -> fmt::Result {
    if query.is_empty() {
        Ok(())
    } else {
        write!(formatter, "?{query}")
    }
}

impl FromStr for PluginEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (location, query) = match input.split_once('?') {
            Some((location, query)) => (location, query),
            None => (input, ""),
        };

        if let Some(address) = location.strip_prefix(TCP_SCHEME) {
            reject_options(input, query)?;
            parse_tcp(input, address)
        } else if let Some(address) = location.strip_prefix(UNIX_SCHEME) {
            parse_unix(input, address, query)
        } else if let Some(address) = location.strip_prefix(NPIPE_SCHEME) {
            parse_named_pipe(input, address, query)
        } else {
            let scheme = input.split_once("://").map_or(input, |(scheme, _)| scheme);
            Err(EndpointParseError::UnsupportedScheme(scheme.to_owned()))
        }
    }
}

impl TryFrom<String> for PluginEndpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PluginEndpoint> for String {
    fn from(endpoint: PluginEndpoint) -> Self {
        endpoint.to_string()
    }
}

fn parse_tcp(input: &str, address: &str) -> Result<PluginEndpoint, EndpointParseError> {
    let Some((_, port)) = address.rsplit_once(':') else {
        return Err(EndpointParseError::MissingPort(input.to_owned()));
    };
    if port.parse::<u16>().is_err() {
        return Err(EndpointParseError::MissingPort(input.to_owned()));
    }
    Ok(PluginEndpoint::tcp(address))
}

fn parse_unix(
    input: &str,
    address: &str,
    query: &str,
) -> Result<PluginEndpoint, EndpointParseError> {
    if address.is_empty() {
        return Err(EndpointParseError::MissingAddress(input.to_owned()));
    }
    let mut group = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "group" if !value.is_empty() => group = Some(value.into_owned()),
            "group" => {}
            other => return Err(unknown_option(input, other)),
        }
    }
    Ok(PluginEndpoint::Unix {
        address: Utf8PathBuf::from(address),
        group,
    })
}

fn parse_named_pipe(
    input: &str,
    address: &str,
    query: &str,
) -> Result<PluginEndpoint, EndpointParseError> {
    if address.is_empty() {
        return Err(EndpointParseError::MissingAddress(input.to_owned()));
    }
    let mut options = PipeOptions::default();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "security_descriptor" => options.security_descriptor = Some(value.into_owned()),
            "in_buffer_size" => options.in_buffer_size = parse_buffer_size(input, &value)?,
            "out_buffer_size" => options.out_buffer_size = parse_buffer_size(input, &value)?,
            other => return Err(unknown_option(input, other)),
        }
    }
    Ok(PluginEndpoint::NamedPipe {
        address: address.replace('/', "\\"),
        options,
    })
}

fn parse_buffer_size(input: &str, value: &str) -> Result<u32, EndpointParseError> {
    value
        .parse()
        .map_err(|_| EndpointParseError::InvalidBufferSize {
            endpoint: input.to_owned(),
            value: value.to_owned(),
        })
}

fn reject_options(input: &str, query: &str) -> Result<(), EndpointParseError> {
    match form_urlencoded::parse(query.as_bytes()).next() {
        Some((key, _)) => Err(unknown_option(input, &key)),
        None => Ok(()),
    }
}

fn unknown_option(input: &str, key: &str) -> EndpointParseError {
    EndpointParseError::UnknownOption {
        endpoint: input.to_owned(),
        option: key.to_owned(),
    }
}

/// Errors encountered while parsing a [`PluginEndpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not one of `tcp`, `unix` or `npipe`.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// TCP endpoint did not end in a numeric port.
    #[error("missing or invalid TCP port in '{0}'")]
    MissingPort(String),
    /// Socket name, socket path or pipe path was empty.
    #[error("missing address in '{0}'")]
    MissingAddress(String),
    /// Pipe buffer size was not an unsigned 32-bit integer.
    #[error("invalid buffer size '{value}' in '{endpoint}'")]
    InvalidBufferSize {
        /// Endpoint text being parsed.
        endpoint: String,
        /// Rejected value.
        value: String,
    },
    /// Query carried an option the transport does not understand.
    #[error("unknown option '{option}' in '{endpoint}'")]
    UnknownOption {
        /// Endpoint text being parsed.
        endpoint: String,
        /// Unrecognised option name.
        option: String,
    },
}
