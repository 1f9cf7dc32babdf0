//! Driver-facing failure type and the protocol registration seam.

use std::io;

use thiserror::Error;

use crate::mux::{Mux, MuxError};

/// Failure reported by a driver operation.
///
/// Returning `Err(DriverError)` always produces an error response, even when
/// the message is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    /// Builds a failure carrying `message` back to the Engine.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message sent in the response's error field.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for DriverError {
    fn from(error: io::Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<String> for DriverError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for DriverError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result type returned by driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// A protocol adapter that can install itself into a [`Mux`].
pub trait Plugin {
    /// Capability advertised in the activation manifest, e.g. `VolumeDriver`.
    fn capability(&self) -> &'static str;

    /// Registers the adapter's routes.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError`] when a route is invalid or already taken.
    fn register(self, mux: &mut Mux) -> Result<(), MuxError>;
}
