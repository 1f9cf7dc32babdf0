//! Bridges hyper requests to the synchronous mux.

use std::convert::Infallible;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use hyper::{Request, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, error, warn};

use super::SERVER_TARGET;
use crate::codec::PLAIN_TEXT_CONTENT_TYPE;
use crate::mux::Mux;
use crate::reply::{Reply, text_body};
use crate::request::{PluginRequest, RequestBody};

const STREAM_CHUNK_BYTES: usize = 32 * 1024;
const STREAM_CHANNEL_DEPTH: usize = 4;

pub(crate) type ResponseBody = BoxBody<Bytes, io::Error>;

/// Serves one request by running the mux on the blocking pool.
pub(crate) async fn respond(
    mux: Arc<Mux>,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_owned();
    let query = parts.uri.query().map(str::to_owned);
    let chunks = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );
    let reader = SyncIoBridge::new(StreamReader::new(chunks));

    let dispatched = tokio::task::spawn_blocking(move || {
        let mut request = PluginRequest::new(path, RequestBody::from_reader(reader))
            .with_headers(parts.headers);
        if let Some(query) = query {
            request = request.with_query(query);
        }
        mux.dispatch(request)
    })
    .await;

    let reply = dispatched.unwrap_or_else(|join_error| {
        error!(
            target: SERVER_TARGET,
            error = %join_error,
            "plugin handler did not complete"
        );
        Reply::text(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    });
    Ok(into_response(reply))
}

/// Converts a reply into a hyper response.
pub(crate) fn into_response(reply: Reply) -> Response<ResponseBody> {
    let status = reply.status();
    let content_type = reply.content_type();
    let body = match reply {
        Reply::Json { body, .. } => full(body),
        Reply::Text { message, .. } => full(text_body(&message)),
        Reply::Stream(reader) => stream(reader),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if content_type == PLAIN_TEXT_CONTENT_TYPE {
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    }
    response
}

fn full(bytes: Vec<u8>) -> ResponseBody {
    Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed()
}

/// Pumps a blocking reader into the response body.
///
/// A read failure ends the body with an error, which aborts the connection
/// so the Engine sees a truncated transfer rather than a short success.
fn stream(mut reader: Box<dyn Read + Send>) -> ResponseBody {
    let (sender, receiver) = mpsc::channel::<io::Result<Frame<Bytes>>>(STREAM_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0_u8; STREAM_CHUNK_BYTES];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => {
                    let chunk = Bytes::copy_from_slice(buffer.get(..read).unwrap_or_default());
                    if sender.blocking_send(Ok(Frame::data(chunk))).is_err() {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "streaming response aborted"
                    );
                    if sender.blocking_send(Err(error)).is_err() {
                        debug!(target: SERVER_TARGET, "client left before the stream failed");
                    }
                    break;
                }
            }
        }
    });
    StreamBody::new(ReceiverStream::new(receiver)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DEFAULT_CONTENT_TYPE_V1_1, encode_response};

    async fn collect(response: Response<ResponseBody>) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn json_replies_carry_the_plugin_content_type() {
        let response = into_response(encode_response(&serde_json::json!({}), true));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(DEFAULT_CONTENT_TYPE_V1_1)
        );
        assert_eq!(collect(response).await, b"{}\n");
    }

    #[tokio::test]
    async fn text_replies_are_not_sniffed() {
        let response = into_response(Reply::not_found());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response
                .headers()
                .get(X_CONTENT_TYPE_OPTIONS)
                .and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );
        assert_eq!(collect(response).await, b"404 page not found\n");
    }

    #[tokio::test]
    async fn streamed_replies_deliver_every_byte() {
        let payload: Vec<u8> = b"dockplug".iter().copied().cycle().take(100_000).collect();
        let response = into_response(Reply::stream(io::Cursor::new(payload.clone())));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(collect(response).await, payload);
    }
}
