//! Minimal blocking HTTP client for exercising a served plugin.
//!
//! Requests are sent as HTTP/1.0 so the server closes the connection after
//! replying and the whole response can be read to end of stream.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::codec::DEFAULT_CONTENT_TYPE_V1_1;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A response read back from a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Numeric status code.
    pub status: u16,
    /// Header names and values in the order received. Names are lowercase.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Returns the first value of `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == wanted)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the body as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Posts `body` to `path` on a TCP plugin.
///
/// # Errors
///
/// Fails when the connection or exchange fails, or the response is not
/// valid HTTP.
pub fn post_tcp(address: SocketAddr, path: &str, body: &[u8]) -> io::Result<RawResponse> {
    let mut stream = TcpStream::connect(address)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    exchange(&mut stream, path, body)
}

/// Posts `body` to `path` on a Unix socket plugin.
///
/// # Errors
///
/// Fails when the connection or exchange fails, or the response is not
/// valid HTTP.
#[cfg(unix)]
pub fn post_unix(socket: &std::path::Path, path: &str, body: &[u8]) -> io::Result<RawResponse> {
    let mut stream = std::os::unix::net::UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    exchange(&mut stream, path, body)
}

fn exchange<S: Read + Write>(stream: &mut S, path: &str, body: &[u8]) -> io::Result<RawResponse> {
    write!(
        stream,
        "POST {path} HTTP/1.0\r\nHost: plugin\r\nContent-Type: {DEFAULT_CONTENT_TYPE_V1_1}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> io::Result<RawResponse> {
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| invalid("response has no header terminator"))?;
    let (head, rest) = raw.split_at(split);
    let body = rest.get(4..).unwrap_or_default().to_vec();
    let head = std::str::from_utf8(head).map_err(|_| invalid("response head is not UTF-8"))?;

    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| invalid("malformed status line"))?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_owned())
}
