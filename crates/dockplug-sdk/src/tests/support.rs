//! Shared fixtures for serving tests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::codec::{encode_result, encode_unit};
use crate::testing::{self, RawResponse};
use crate::{DriverError, Mux, MuxError, Plugin, PluginListener, ServeError, Server, ShutdownHandle};

pub(crate) const PLUGIN_NAME: &str = "jerry";
pub(crate) const ECHO_PATH: &str = "/Echo.Call";
pub(crate) const FAIL_PATH: &str = "/Echo.Fail";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EchoRequest {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Default, Serialize)]
struct EchoResponse {
    #[serde(rename = "Name")]
    name: String,
}

/// Test protocol that echoes a name and counts invocations.
#[derive(Debug, Clone, Default)]
pub(crate) struct EchoPlugin {
    calls: Arc<AtomicUsize>,
}

impl EchoPlugin {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for EchoPlugin {
    fn capability(&self) -> &'static str {
        "Echo"
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let calls = Arc::clone(&self.calls);
        mux.handle(ECHO_PATH, move |mut request| {
            let body: EchoRequest = request.decode()?;
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(encode_result(Ok(EchoResponse { name: body.name })))
        })?;
        let calls = Arc::clone(&self.calls);
        mux.handle(FAIL_PATH, move |_request| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(encode_unit(Err(DriverError::default())))
        })
    }
}

/// A server running on a background thread over loopback TCP.
pub(crate) struct ServingPlugin {
    address: SocketAddr,
    spec_path: PathBuf,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<Result<(), ServeError>>>,
    _spec_directory: TempDir,
}

impl ServingPlugin {
    pub(crate) fn start(mux: Mux) -> Self {
        let spec_directory = tempfile::tempdir().expect("spec directory");
        let listener = PluginListener::tcp("127.0.0.1:0", PLUGIN_NAME, spec_directory.path())
            .expect("bind tcp listener");
        let address = listener.local_addr().expect("tcp address");
        let spec_path = listener.discovery_path().expect("spec path").to_path_buf();
        let server = Server::new(mux);
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || server.serve(listener));
        Self {
            address,
            spec_path,
            shutdown,
            thread: Some(thread),
            _spec_directory: spec_directory,
        }
    }

    pub(crate) const fn address(&self) -> SocketAddr {
        self.address
    }

    pub(crate) fn spec_path(&self) -> &Path {
        &self.spec_path
    }

    pub(crate) fn post(&self, path: &str, body: &[u8]) -> RawResponse {
        testing::post_tcp(self.address, path, body).expect("plugin exchange")
    }

    pub(crate) fn stop(&mut self) -> Option<Result<(), ServeError>> {
        self.shutdown.trigger();
        self.thread
            .take()
            .map(|thread| thread.join().expect("serve thread panicked"))
    }
}

impl Drop for ServingPlugin {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }
}
