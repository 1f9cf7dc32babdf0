//! JSON encoding and decoding for plugin payloads.
//!
//! Success and failure are signalled explicitly by the caller, never guessed
//! from the payload: `encode_response(&payload, true)` is a 500 whatever the
//! payload contains.

use std::io::{BufReader, Read};

use hyper::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::DriverError;
use crate::reply::{Rejection, Reply};

const CODEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::codec");

/// Content type of version 1 of the plugin protocol.
pub const DEFAULT_CONTENT_TYPE_V1: &str = "application/vnd.docker.plugins.v1+json";

/// Content type written on every JSON and streaming reply.
pub const DEFAULT_CONTENT_TYPE_V1_1: &str = "application/vnd.docker.plugins.v1.1+json";

pub(crate) const PLAIN_TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body shared by operations whose only result is an error message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message; empty on success.
    #[serde(rename = "Err", default)]
    pub err: String,
}

impl ErrorResponse {
    /// Builds an error body carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
        }
    }
}

impl From<&DriverError> for ErrorResponse {
    fn from(error: &DriverError) -> Self {
        Self::new(error.message())
    }
}

/// A protocol response with an `Err` field added alongside its own fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The operation's payload.
    #[serde(flatten)]
    pub body: T,
    /// Error message; empty on success.
    #[serde(rename = "Err", default)]
    pub err: String,
}

impl<T> Envelope<T> {
    /// Wraps a successful payload.
    #[must_use]
    pub const fn success(body: T) -> Self {
        Self {
            body,
            err: String::new(),
        }
    }
}

impl<T: Default> Envelope<T> {
    /// Builds a failure envelope with a zero-valued payload.
    #[must_use]
    pub fn failure(error: &DriverError) -> Self {
        Self {
            body: T::default(),
            err: error.message().to_owned(),
        }
    }
}

/// Serialises `payload` into a JSON reply.
///
/// The status is 500 when `is_error` is set and 200 otherwise. The body is
/// followed by a newline. A payload that cannot be serialised yields a 500
/// plain-text reply carrying the serialiser's message.
#[must_use]
pub fn encode_response<T: Serialize + ?Sized>(payload: &T, is_error: bool) -> Reply {
    let status = if is_error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    match serde_json::to_vec(payload) {
        Ok(mut body) => {
            if is_error {
                debug!(
                    target: CODEC_TARGET,
                    body = %String::from_utf8_lossy(&body),
                    "plugin call failed"
                );
            }
            body.push(b'\n');
            Reply::Json { status, body }
        }
        Err(error) => {
            warn!(
                target: CODEC_TARGET,
                error = %error,
                "failed to serialise plugin response"
            );
            Reply::text(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// Encodes a driver failure as `{"Err": message}` with status 500.
#[must_use]
pub fn encode_error(error: &DriverError) -> Reply {
    encode_response(&ErrorResponse::from(error), true)
}

/// Encodes a unit outcome as `{"Err": ""}` or `{"Err": message}`.
#[must_use]
pub fn encode_unit(result: Result<(), DriverError>) -> Reply {
    match result {
        Ok(()) => encode_response(&ErrorResponse::default(), false),
        Err(error) => encode_error(&error),
    }
}

/// Encodes a driver outcome inside an [`Envelope`].
///
/// Failures keep the response's shape with zero-valued fields and the
/// driver's message in `Err`.
#[must_use]
pub fn encode_result<T: Serialize + Default>(result: Result<T, DriverError>) -> Reply {
    match result {
        Ok(body) => encode_response(&Envelope::success(body), false),
        Err(error) => encode_response(&Envelope::<T>::failure(&error), true),
    }
}

/// Decodes the first JSON value read from `reader`.
///
/// Content after the first value is ignored.
///
/// # Errors
///
/// Returns a [`Rejection`] carrying the decoder message when the input is
/// empty, unreadable or does not match `T`.
pub fn decode_request<T: DeserializeOwned>(reader: impl Read) -> Result<T, Rejection> {
    let mut values = serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter::<T>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err(rejected(error.to_string())),
        None => Err(rejected(String::from("EOF"))),
    }
}

fn rejected(message: String) -> Rejection {
    warn!(
        target: CODEC_TARGET,
        error = %message,
        "rejected malformed plugin request"
    );
    Rejection::new(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
    struct Mount {
        #[serde(rename = "Mountpoint")]
        mountpoint: String,
    }

    fn body_text(reply: Reply) -> String {
        String::from_utf8(reply.into_bytes().expect("reply body")).expect("utf8 body")
    }

    #[rstest]
    #[case(false, StatusCode::OK)]
    #[case(true, StatusCode::INTERNAL_SERVER_ERROR)]
    fn status_follows_the_error_flag(#[case] is_error: bool, #[case] expected: StatusCode) {
        let reply = encode_response(&ErrorResponse::default(), is_error);
        assert_eq!(reply.status(), expected);
        assert_eq!(reply.content_type(), DEFAULT_CONTENT_TYPE_V1_1);
    }

    #[test]
    fn encoded_bodies_end_with_a_newline() {
        let reply = encode_response(&serde_json::json!({}), false);
        assert_eq!(body_text(reply), "{}\n");
    }

    #[test]
    fn failures_with_empty_messages_are_still_errors() {
        let reply = encode_unit(Err(DriverError::new("")));
        assert_eq!(reply.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(reply), "{\"Err\":\"\"}\n");
    }

    #[test]
    fn envelopes_flatten_the_payload() {
        let reply = encode_result(Ok(Mount {
            mountpoint: String::from("/mnt/data"),
        }));
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(body_text(reply), "{\"Mountpoint\":\"/mnt/data\",\"Err\":\"\"}\n");
    }

    #[test]
    fn failed_envelopes_zero_the_payload() {
        let reply = encode_result::<Mount>(Err(DriverError::new("busy")));
        assert_eq!(reply.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(reply), "{\"Mountpoint\":\"\",\"Err\":\"busy\"}\n");
    }

    #[rstest]
    #[case(Envelope::success(Mount { mountpoint: String::from("/mnt/data") }))]
    #[case(Envelope { body: Mount::default(), err: String::from("busy") })]
    #[case(Envelope { body: Mount { mountpoint: String::from("/mnt/\u{e9}t\u{e9}") }, err: String::from("partial") })]
    fn encoded_envelopes_decode_to_the_same_value(#[case] envelope: Envelope<Mount>) {
        let reply = encode_response(&envelope, !envelope.err.is_empty());
        let bytes = reply.into_bytes().expect("reply body");
        let decoded: Envelope<Mount> = decode_request(bytes.as_slice()).expect("decode envelope");
        assert_eq!(decoded, envelope);
    }

    #[rstest]
    #[case(ErrorResponse::default())]
    #[case(ErrorResponse::new("volume in use"))]
    fn encoded_error_bodies_decode_to_the_same_value(#[case] response: ErrorResponse) {
        let bytes = encode_response(&response, !response.err.is_empty())
            .into_bytes()
            .expect("reply body");
        let decoded: ErrorResponse = decode_request(bytes.as_slice()).expect("decode error body");
        assert_eq!(decoded, response);
    }

    #[test]
    fn decoding_reads_only_the_first_value() {
        let decoded: Mount =
            decode_request(&b"{\"Mountpoint\":\"/a\"} trailing"[..]).expect("decode first value");
        assert_eq!(decoded.mountpoint, "/a");
    }

    #[rstest]
    #[case(&b""[..], "EOF")]
    #[case(&b"{\"Mountpoint\":"[..], "EOF while parsing")]
    #[case(&b"[1, 2]"[..], "invalid type")]
    fn decoding_rejects_malformed_bodies(#[case] input: &[u8], #[case] fragment: &str) {
        let rejection = decode_request::<Mount>(input).expect_err("decode should fail");
        assert!(
            rejection.message().contains(fragment),
            "unexpected message: {}",
            rejection.message()
        );
    }
}
