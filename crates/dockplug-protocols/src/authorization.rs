//! Authorization plugin protocol (`authz`).
//!
//! The Engine consults the plugin before forwarding a client request and
//! again before returning the daemon's response. Bodies and certificates
//! travel as base64.

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::encode_response;
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, Reply};
use serde::{Deserialize, Serialize};

use crate::wire::{base64_bytes, base64_list, is_default, nullable};

/// Capability advertised by authorization plugins.
pub const CAPABILITY: &str = "authz";

const REQUEST_PATH: &str = "/AuthZPlugin.AuthZReq";
const RESPONSE_PATH: &str = "/AuthZPlugin.AuthZRes";

/// A client call under review, with the daemon's answer once known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthZRequest {
    /// Authenticated user name.
    #[serde(rename = "User", skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// How the user authenticated, e.g. `TLS`.
    #[serde(rename = "UserAuthNMethod", skip_serializing_if = "String::is_empty")]
    pub user_authn_method: String,
    /// HTTP method of the client call.
    #[serde(rename = "RequestMethod", skip_serializing_if = "String::is_empty")]
    pub request_method: String,
    /// Request URI of the client call.
    #[serde(
        rename = "RequestUri",
        alias = "RequestURI",
        skip_serializing_if = "String::is_empty"
    )]
    pub request_uri: String,
    /// Raw body of the client call.
    #[serde(
        rename = "RequestBody",
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub request_body: Vec<u8>,
    /// Headers of the client call.
    #[serde(
        rename = "RequestHeaders",
        deserialize_with = "nullable",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub request_headers: BTreeMap<String, String>,
    /// DER-encoded client certificates.
    #[serde(
        rename = "RequestPeerCertificates",
        with = "base64_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub request_peer_certificates: Vec<Vec<u8>>,
    /// Raw body of the daemon's response.
    #[serde(
        rename = "ResponseBody",
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub response_body: Vec<u8>,
    /// Headers of the daemon's response.
    #[serde(
        rename = "ResponseHeaders",
        deserialize_with = "nullable",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub response_headers: BTreeMap<String, String>,
    /// Status of the daemon's response.
    #[serde(rename = "ResponseStatusCode", skip_serializing_if = "is_default")]
    pub response_status_code: u16,
}

/// The plugin's verdict on a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthZResponse {
    /// Whether the call may proceed.
    #[serde(rename = "Allow")]
    pub allow: bool,
    /// Message shown to the client when the call is denied.
    #[serde(rename = "Msg", default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
}

impl AuthZResponse {
    /// Lets the call proceed.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allow: true,
            msg: String::new(),
        }
    }

    /// Denies the call with `msg`.
    #[must_use]
    pub fn deny(msg: impl Into<String>) -> Self {
        Self {
            allow: false,
            msg: msg.into(),
        }
    }
}

#[derive(Serialize)]
struct Verdict<'a> {
    #[serde(rename = "Allow")]
    allow: bool,
    #[serde(rename = "Msg", skip_serializing_if = "str::is_empty")]
    msg: &'a str,
    #[serde(rename = "Err", skip_serializing_if = "str::is_empty")]
    err: &'a str,
}

fn verdict(result: &DriverResult<AuthZResponse>) -> Reply {
    match result {
        Ok(response) => encode_response(
            &Verdict {
                allow: response.allow,
                msg: &response.msg,
                err: "",
            },
            false,
        ),
        Err(error) => encode_response(
            &Verdict {
                allow: false,
                msg: "",
                err: error.message(),
            },
            true,
        ),
    }
}

/// Decisions an authorization plugin makes.
pub trait AuthorizationDriver: Send + Sync {
    /// Reviews a client call before the daemon handles it.
    ///
    /// # Errors
    ///
    /// A failure denies the call and is reported to the Engine as `Err`.
    fn authz_request(&self, request: &AuthZRequest) -> DriverResult<AuthZResponse>;

    /// Reviews the daemon's response before the client sees it.
    ///
    /// # Errors
    ///
    /// A failure denies the call and is reported to the Engine as `Err`.
    fn authz_response(&self, request: &AuthZRequest) -> DriverResult<AuthZResponse>;
}

/// Routes the authorization protocol to an [`AuthorizationDriver`].
#[derive(Debug)]
pub struct AuthorizationHandler<D> {
    driver: Arc<D>,
}

impl<D: AuthorizationDriver + 'static> AuthorizationHandler<D> {
    /// Wraps `driver`.
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self::from_arc(Arc::new(driver))
    }

    /// Wraps a driver that is shared with other code.
    #[must_use]
    pub const fn from_arc(driver: Arc<D>) -> Self {
        Self { driver }
    }
}

impl<D: AuthorizationDriver + 'static> Plugin for AuthorizationHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(REQUEST_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: AuthZRequest = request.decode()?;
            Ok(verdict(&driver.authz_request(&body)))
        })?;
        mux.handle_with(RESPONSE_PATH, driver, |driver, mut request| {
            let body: AuthZRequest = request.decode()?;
            Ok(verdict(&driver.authz_response(&body)))
        })
    }
}
