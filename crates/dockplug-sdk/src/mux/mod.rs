//! Route table and activation manifest shared by every protocol.
//!
//! A [`Mux`] maps exact request paths to handlers and accumulates the
//! capabilities advertised from `/Plugin.Activate`. Several protocol
//! adapters can be installed into one mux so a single process answers for
//! all of them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::encode_response;
use crate::driver::Plugin;
use crate::reply::{HandlerResult, Reply};
use crate::request::PluginRequest;

const MUX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mux");

/// Path the Engine calls to discover a plugin's capabilities.
pub const ACTIVATE_PATH: &str = "/Plugin.Activate";

/// Shared route handler.
pub type Handler = Arc<dyn Fn(PluginRequest) -> HandlerResult + Send + Sync>;

/// Capabilities advertised during activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Implements")]
    implements: Vec<String>,
}

impl Manifest {
    /// Builds an empty manifest.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            implements: Vec::new(),
        }
    }

    /// Adds `capability` unless present. Returns whether it was added.
    pub fn add(&mut self, capability: &str) -> bool {
        if self.contains(capability) {
            return false;
        }
        self.implements.push(capability.to_owned());
        true
    }

    /// Reports whether `capability` is advertised.
    #[must_use]
    pub fn contains(&self, capability: &str) -> bool {
        self.implements.iter().any(|entry| entry == capability)
    }

    /// Returns the capabilities in registration order.
    #[must_use]
    pub fn implements(&self) -> &[String] {
        &self.implements
    }
}

/// Errors raised while registering routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    /// Route path was empty.
    #[error("route path must not be empty")]
    EmptyPath,
    /// Route path did not start with `/`.
    #[error("route path '{path}' must start with '/'")]
    RelativePath {
        /// Offending path.
        path: String,
    },
    /// Route path collides with the activation endpoint.
    #[error("route path '{path}' is reserved for plugin activation")]
    ReservedPath {
        /// Offending path.
        path: String,
    },
    /// Route path was registered twice.
    #[error("route path '{path}' is already registered")]
    DuplicateRoute {
        /// Offending path.
        path: String,
    },
}

/// Exact-path router with an activation manifest.
#[derive(Default)]
pub struct Mux {
    routes: HashMap<String, Handler>,
    manifest: Manifest,
}

impl Mux {
    /// Builds an empty mux.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for requests to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError`] when `path` is empty, relative, reserved or
    /// already registered. The route table is unchanged on error.
    pub fn handle<F>(&mut self, path: &str, handler: F) -> Result<(), MuxError>
    where
        F: Fn(PluginRequest) -> HandlerResult + Send + Sync + 'static,
    {
        validate_path(path)?;
        if self.routes.contains_key(path) {
            return Err(MuxError::DuplicateRoute {
                path: path.to_owned(),
            });
        }
        self.routes.insert(path.to_owned(), Arc::new(handler));
        debug!(target: MUX_TARGET, path, "route registered");
        Ok(())
    }

    /// Registers a handler that borrows shared `state` on every call.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`Mux::handle`].
    pub fn handle_with<S, F>(
        &mut self,
        path: &str,
        state: Arc<S>,
        handler: F,
    ) -> Result<(), MuxError>
    where
        S: Send + Sync + ?Sized + 'static,
        F: Fn(&S, PluginRequest) -> HandlerResult + Send + Sync + 'static,
    {
        self.handle(path, move |request| handler(state.as_ref(), request))
    }

    /// Advertises `capability` from the activation endpoint.
    ///
    /// Adding a capability twice has no further effect.
    pub fn add_capability(&mut self, capability: &str) {
        if self.manifest.add(capability) {
            debug!(target: MUX_TARGET, capability, "capability advertised");
        }
    }

    /// Installs a protocol adapter: its routes, then its capability.
    ///
    /// The adapter registers into a scratch mux that is merged only once
    /// every route is accepted, so a failed install leaves both the route
    /// table and the manifest unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the adapter's first registration failure, or reports the
    /// lexically first route that is already registered here.
    pub fn install<P: Plugin>(&mut self, plugin: P) -> Result<(), MuxError> {
        let capability = plugin.capability();
        let mut staged = Self::new();
        plugin.register(&mut staged)?;
        if let Some(path) = staged
            .routes()
            .into_iter()
            .find(|path| self.contains_route(path))
        {
            return Err(MuxError::DuplicateRoute {
                path: path.to_owned(),
            });
        }
        self.routes.extend(staged.routes);
        for extra in &staged.manifest.implements {
            self.add_capability(extra);
        }
        self.add_capability(capability);
        Ok(())
    }

    /// Returns the activation manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Reports whether `path` has a registered handler.
    #[must_use]
    pub fn contains_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Returns the registered paths in lexical order.
    #[must_use]
    pub fn routes(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Answers the activation handshake.
    ///
    /// The reply is always a 200 carrying `{"Implements": [...]}`.
    #[must_use]
    pub fn activate(&self) -> Reply {
        encode_response(&self.manifest, false)
    }

    /// Routes `request` to its handler.
    ///
    /// Unknown paths receive a 404 and rejected requests a 400. The method
    /// is not checked.
    #[must_use]
    pub fn dispatch(&self, request: PluginRequest) -> Reply {
        if request.path() == ACTIVATE_PATH {
            debug!(target: MUX_TARGET, path = ACTIVATE_PATH, "activation requested");
            return self.activate();
        }
        let Some(handler) = self.routes.get(request.path()) else {
            debug!(target: MUX_TARGET, path = request.path(), "no route for request");
            return Reply::not_found();
        };
        debug!(target: MUX_TARGET, path = request.path(), "dispatching request");
        handler(request).unwrap_or_else(Reply::from)
    }
}

fn validate_path(path: &str) -> Result<(), MuxError> {
    if path.is_empty() {
        return Err(MuxError::EmptyPath);
    }
    if !path.starts_with('/') {
        return Err(MuxError::RelativePath {
            path: path.to_owned(),
        });
    }
    if path == ACTIVATE_PATH {
        return Err(MuxError::ReservedPath {
            path: path.to_owned(),
        });
    }
    Ok(())
}

impl fmt::Debug for Mux {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Mux")
            .field("routes", &self.routes())
            .field("manifest", &self.manifest)
            .finish()
    }
}
