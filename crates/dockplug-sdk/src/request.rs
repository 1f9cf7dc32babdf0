//! Inbound plugin requests as seen by route handlers.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Cursor, Read};

use bytes::Bytes;
use hyper::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::codec::decode_request;
use crate::reply::Rejection;

/// A request routed to a handler.
///
/// The body is exposed as a blocking reader so drivers can consume large
/// uploads without buffering them.
#[derive(Debug)]
pub struct PluginRequest {
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: RequestBody,
}

impl PluginRequest {
    /// Builds a request for `path` with the given body.
    #[must_use]
    pub fn new(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Builds a request whose body is `payload` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serialiser error when `payload` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(
        path: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(path, RequestBody::from_bytes(body)))
    }

    /// Attaches the raw query string (without the leading `?`).
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attaches request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the first decoded value of the query parameter `name`.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| Cow::into_owned(value))
    }

    /// Returns the header `name` when it is present and valid text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns every request header.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decodes the first JSON value in the body.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the body is empty, unreadable or not
    /// valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<T, Rejection> {
        decode_request(&mut self.body)
    }

    /// Borrows the body reader.
    pub const fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Consumes the request, returning its body.
    #[must_use]
    pub fn into_body(self) -> RequestBody {
        self.body
    }
}

/// Blocking reader over a request body.
pub struct RequestBody {
    reader: Box<dyn Read + Send>,
}

impl RequestBody {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A body held entirely in memory.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_reader(Cursor::new(bytes.into()))
    }

    /// A body produced incrementally by `reader`.
    #[must_use]
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }
}

impl Read for RequestBody {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buffer)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("RequestBody(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn query_parameters_are_decoded() {
        let request = PluginRequest::new("/GraphDriver.ApplyDiff", RequestBody::empty())
            .with_query("id=layer%201&parent=base");
        assert_eq!(request.query("id").as_deref(), Some("layer 1"));
        assert_eq!(request.query("parent").as_deref(), Some("base"));
        assert_eq!(request.query("missing"), None);
    }

    #[test]
    fn headers_are_exposed_as_text() {
        let mut headers = HeaderMap::new();
        headers.insert("id", HeaderValue::from_static("layer"));
        let request =
            PluginRequest::new("/GraphDriver.ApplyDiff", RequestBody::empty()).with_headers(headers);
        assert_eq!(request.header("id"), Some("layer"));
        assert_eq!(request.header("parent"), None);
    }

    #[test]
    fn bodies_stream_through_read() {
        let request = PluginRequest::new("/x", RequestBody::from_bytes(&b"payload"[..]));
        let mut body = request.into_body();
        let mut collected = String::new();
        body.read_to_string(&mut collected).expect("read body");
        assert_eq!(collected, "payload");
    }
}
