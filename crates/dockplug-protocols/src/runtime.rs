//! Runtime plugin protocol (`RuntimeDriver`).
//!
//! Both operations are infallible and ignore the request body.

use std::sync::Arc;

use dockplug_sdk::codec::encode_response;
use dockplug_sdk::{Mux, MuxError, Plugin};
use serde::{Deserialize, Serialize};

/// Capability advertised by runtime plugins.
pub const CAPABILITY: &str = "RuntimeDriver";

const PATH_PATH: &str = "/RuntimeDriver.Path";
const ARGS_PATH: &str = "/RuntimeDriver.Args";

/// Result of `RuntimeDriver.Path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResponse {
    /// Path of the OCI runtime binary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Result of `RuntimeDriver.Args`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgsResponse {
    /// Extra arguments passed to the runtime.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Describes an OCI runtime to the Engine.
pub trait RuntimeDriver: Send + Sync {
    /// Path of the runtime binary.
    fn path(&self) -> PathResponse;

    /// Arguments for the runtime binary.
    fn args(&self) -> ArgsResponse;
}

/// Routes the runtime protocol to a [`RuntimeDriver`].
#[derive(Debug)]
pub struct RuntimeHandler<D> {
    driver: Arc<D>,
}

impl<D: RuntimeDriver + 'static> RuntimeHandler<D> {
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

impl<D: RuntimeDriver + 'static> Plugin for RuntimeHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(PATH_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(encode_response(&driver.path(), false))
        })?;
        mux.handle_with(ARGS_PATH, driver, |driver, _request| {
            Ok(encode_response(&driver.args(), false))
        })
    }
}

#[cfg(test)]
mod tests {
    use dockplug_sdk::{PluginRequest, RequestBody, StatusCode};
    use rstest::rstest;

    use super::*;

    struct Runc {
        debug: bool,
    }

    impl RuntimeDriver for Runc {
        fn path(&self) -> PathResponse {
            PathResponse {
                path: String::from("/usr/bin/runc"),
            }
        }

        fn args(&self) -> ArgsResponse {
            ArgsResponse {
                args: if self.debug {
                    vec![String::from("--debug")]
                } else {
                    Vec::new()
                },
            }
        }
    }

    #[rstest]
    #[case(PATH_PATH, false, "{\"path\":\"/usr/bin/runc\"}\n")]
    #[case(ARGS_PATH, true, "{\"args\":[\"--debug\"]}\n")]
    #[case(ARGS_PATH, false, "{}\n")]
    fn answers_without_a_request_body(
        #[case] path: &str,
        #[case] debug: bool,
        #[case] expected: &str,
    ) {
        let mut mux = Mux::new();
        mux.install(RuntimeHandler::new(Runc { debug }))
            .expect("install runtime handler");

        let reply = mux.dispatch(PluginRequest::new(path, RequestBody::empty()));
        assert_eq!(reply.status(), StatusCode::OK);
        let body = String::from_utf8(reply.into_bytes().expect("bytes")).expect("utf8");
        assert_eq!(body, expected);
    }
}
