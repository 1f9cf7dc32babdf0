//! Replies produced by route handlers.

use std::fmt;
use std::io::{self, Read};

use hyper::StatusCode;
use thiserror::Error;

use crate::codec::{DEFAULT_CONTENT_TYPE_V1_1, PLAIN_TEXT_CONTENT_TYPE};

/// A fully formed response waiting to be written to the Engine.
pub enum Reply {
    /// JSON body in the plugin content type.
    Json {
        /// Response status.
        status: StatusCode,
        /// Serialised payload, including the trailing newline.
        body: Vec<u8>,
    },
    /// Plain-text body used for protocol-level failures.
    Text {
        /// Response status.
        status: StatusCode,
        /// Message without a trailing newline.
        message: String,
    },
    /// Raw byte stream copied to the connection as it is read.
    Stream(Box<dyn Read + Send>),
}

impl Reply {
    /// Builds a plain-text reply.
    #[must_use]
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Text {
            status,
            message: message.into(),
        }
    }

    /// Reply sent for paths without a registered route.
    #[must_use]
    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "404 page not found")
    }

    /// Builds a streaming reply from a reader.
    #[must_use]
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Returns the status written for this reply.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } | Self::Text { status, .. } => *status,
            Self::Stream(_) => StatusCode::OK,
        }
    }

    /// Returns the `Content-Type` written for this reply.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Json { .. } | Self::Stream(_) => DEFAULT_CONTENT_TYPE_V1_1,
            Self::Text { .. } => PLAIN_TEXT_CONTENT_TYPE,
        }
    }

    /// Collects the bytes that would go on the wire.
    ///
    /// # Errors
    ///
    /// Returns the reader's error when a streaming body fails.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Json { body, .. } => Ok(body),
            Self::Text { message, .. } => Ok(text_body(&message)),
            Self::Stream(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

pub(crate) fn text_body(message: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(message.len() + 1);
    body.extend_from_slice(message.as_bytes());
    body.push(b'\n');
    body
}

impl fmt::Debug for Reply {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json { status, body } => formatter
                .debug_struct("Json")
                .field("status", status)
                .field("body", &String::from_utf8_lossy(body))
                .finish(),
            Self::Text { status, message } => formatter
                .debug_struct("Text")
                .field("status", status)
                .field("message", message)
                .finish(),
            Self::Stream(_) => formatter.write_str("Stream(..)"),
        }
    }
}

/// A request the handler refused before reaching the driver.
///
/// Rejections become `400 Bad Request` plain-text replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    message: String,
}

impl Rejection {
    /// Builds a rejection with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the rejection message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Rejection> for Reply {
    fn from(rejection: Rejection) -> Self {
        Self::Text {
            status: StatusCode::BAD_REQUEST,
            message: rejection.message,
        }
    }
}

/// Outcome of a route handler.
pub type HandlerResult = Result<Reply, Rejection>;
