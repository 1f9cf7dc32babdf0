//! Behavioural tests for protocol adapters served over TCP.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use dockplug_protocols::network::{
    CapabilitiesResponse as NetworkCapabilities, CreateEndpointRequest, CreateEndpointResponse,
    CreateNetworkRequest, DeleteEndpointRequest, DeleteNetworkRequest, InfoRequest, InfoResponse,
    JoinRequest, JoinResponse, LeaveRequest,
};
use dockplug_protocols::volume::{
    CreateRequest, GetRequest, GetResponse, ListResponse, MountRequest, MountResponse,
    PathRequest, PathResponse, RemoveRequest, UnmountRequest,
};
use dockplug_protocols::{NetworkDriver, NetworkHandler, VolumeDriver, VolumeHandler};
use dockplug_sdk::testing::{self, RawResponse};
use dockplug_sdk::{
    DriverError, DriverResult, Mux, MuxError, PluginListener, ServeError, Server, ShutdownHandle,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

/// Volume driver that only counts creations.
#[derive(Debug, Default)]
struct CountingVolumes {
    created: AtomicUsize,
}

impl VolumeDriver for CountingVolumes {
    fn create(&self, _request: &CreateRequest) -> DriverResult<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> DriverResult<ListResponse> {
        Ok(ListResponse::default())
    }

    fn get(&self, _request: &GetRequest) -> DriverResult<GetResponse> {
        Ok(GetResponse::default())
    }

    fn remove(&self, _request: &RemoveRequest) -> DriverResult<()> {
        Ok(())
    }

    fn path(&self, _request: &PathRequest) -> DriverResult<PathResponse> {
        Ok(PathResponse::default())
    }

    fn mount(&self, _request: &MountRequest) -> DriverResult<MountResponse> {
        Ok(MountResponse::default())
    }

    fn unmount(&self, _request: &UnmountRequest) -> DriverResult<()> {
        Ok(())
    }
}

/// Network driver that refuses to create networks.
struct BrokenNetwork;

impl NetworkDriver for BrokenNetwork {
    fn capabilities(&self) -> DriverResult<NetworkCapabilities> {
        Ok(NetworkCapabilities::default())
    }

    fn create_network(&self, _request: &CreateNetworkRequest) -> DriverResult<()> {
        Err(DriverError::new("I CAN HAZ ERRORZ"))
    }

    fn delete_network(&self, _request: &DeleteNetworkRequest) -> DriverResult<()> {
        Ok(())
    }

    fn create_endpoint(
        &self,
        _request: &CreateEndpointRequest,
    ) -> DriverResult<CreateEndpointResponse> {
        Ok(CreateEndpointResponse::default())
    }

    fn delete_endpoint(&self, _request: &DeleteEndpointRequest) -> DriverResult<()> {
        Ok(())
    }

    fn endpoint_info(&self, _request: &InfoRequest) -> DriverResult<InfoResponse> {
        Ok(InfoResponse::default())
    }

    fn join(&self, _request: &JoinRequest) -> DriverResult<JoinResponse> {
        Ok(JoinResponse::default())
    }

    fn leave(&self, _request: &LeaveRequest) -> DriverResult<()> {
        Ok(())
    }
}

struct Serving {
    address: std::net::SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<Result<(), ServeError>>>,
    _spec_directory: TempDir,
}

impl Serving {
    fn start(mux: Mux) -> Self {
        let spec_directory = tempfile::tempdir().expect("spec directory");
        let listener = PluginListener::tcp("127.0.0.1:0", "multi", spec_directory.path())
            .expect("bind tcp listener");
        let address = listener.local_addr().expect("tcp address");
        let server = Server::new(mux);
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || server.serve(listener));
        Self {
            address,
            shutdown,
            thread: Some(thread),
            _spec_directory: spec_directory,
        }
    }
}

impl Drop for Serving {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }
}

#[derive(Default)]
struct ProtocolWorld {
    volumes: Arc<CountingVolumes>,
    serving: Option<Serving>,
    mux: Option<Mux>,
    response: Option<RawResponse>,
    install_error: Option<MuxError>,
}

impl ProtocolWorld {
    fn response(&self) -> &RawResponse {
        self.response.as_ref().expect("a response should be recorded")
    }
}

#[fixture]
fn world() -> RefCell<ProtocolWorld> {
    RefCell::new(ProtocolWorld::default())
}

#[given("a plugin serving the volume and network protocols")]
fn given_multi_protocol_plugin(world: &RefCell<ProtocolWorld>) {
    let mut state = world.borrow_mut();
    let mut mux = Mux::new();
    mux.install(VolumeHandler::from_arc(Arc::clone(&state.volumes)))
        .expect("install volume handler");
    mux.install(NetworkHandler::new(BrokenNetwork))
        .expect("install network handler");
    state.serving = Some(Serving::start(mux));
}

#[given("a mux with the volume protocol installed")]
fn given_volume_mux(world: &RefCell<ProtocolWorld>) {
    let mut state = world.borrow_mut();
    let mut mux = Mux::new();
    mux.install(VolumeHandler::from_arc(Arc::clone(&state.volumes)))
        .expect("install volume handler");
    state.mux = Some(mux);
}

#[when("the Engine calls \"{path}\" with \"{body}\"")]
fn when_engine_calls(world: &RefCell<ProtocolWorld>, path: String, body: String) {
    let address = world
        .borrow()
        .serving
        .as_ref()
        .map(|serving| serving.address)
        .expect("plugin should be serving");
    let response = testing::post_tcp(address, &path, body.as_bytes()).expect("plugin exchange");
    world.borrow_mut().response = Some(response);
}

#[when("the volume protocol is installed again")]
fn when_volume_installed_again(world: &RefCell<ProtocolWorld>) {
    let mut state = world.borrow_mut();
    let volumes = Arc::clone(&state.volumes);
    let mux = state.mux.as_mut().expect("mux should exist");
    let result = mux.install(VolumeHandler::from_arc(volumes));
    state.install_error = result.err();
}

#[then("the response status is {status}")]
fn then_status(world: &RefCell<ProtocolWorld>, status: u16) {
    assert_eq!(world.borrow().response().status, status);
}

#[then("the response body is JSON {body}")]
fn then_json_body(world: &RefCell<ProtocolWorld>, body: String) {
    let state = world.borrow();
    let response = state.response();
    assert_eq!(
        response.header("content-type"),
        Some("application/vnd.docker.plugins.v1.1+json")
    );
    assert_eq!(response.text(), format!("{body}\n"));
}

#[then("the volume driver created {count} volumes")]
fn then_volume_creations(world: &RefCell<ProtocolWorld>, count: usize) {
    assert_eq!(world.borrow().volumes.created.load(Ordering::SeqCst), count);
}

#[then("installation fails with a duplicate route")]
fn then_duplicate_route(world: &RefCell<ProtocolWorld>) {
    let state = world.borrow();
    assert!(
        matches!(state.install_error, Some(MuxError::DuplicateRoute { .. })),
        "expected a duplicate route error, got {:?}",
        state.install_error
    );
}

#[then("the manifest lists \"{capability}\" once")]
fn then_manifest_lists_once(world: &RefCell<ProtocolWorld>, capability: String) {
    let state = world.borrow();
    let mux = state.mux.as_ref().expect("mux should exist");
    let listed = mux
        .manifest()
        .implements()
        .iter()
        .filter(|entry| **entry == capability)
        .count();
    assert_eq!(listed, 1);
}

#[scenario(path = "tests/features/protocol_dispatch.feature", index = 0)]
fn volume_creation_succeeds(#[from(world)] world: RefCell<ProtocolWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/protocol_dispatch.feature", index = 1)]
fn network_failures_are_server_errors(#[from(world)] world: RefCell<ProtocolWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/protocol_dispatch.feature", index = 2)]
fn malformed_requests_are_rejected(#[from(world)] world: RefCell<ProtocolWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/protocol_dispatch.feature", index = 3)]
fn activation_merges_protocols(#[from(world)] world: RefCell<ProtocolWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/protocol_dispatch.feature", index = 4)]
fn duplicate_installs_are_refused(#[from(world)] world: RefCell<ProtocolWorld>) {
    drop(world);
}
