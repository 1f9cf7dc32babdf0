//! Behavioural tests for serving a plugin and tearing it down.

use std::cell::RefCell;
use std::fs;
use std::net::TcpListener;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use super::support::{EchoPlugin, PLUGIN_NAME, ServingPlugin};
use crate::testing::RawResponse;
use crate::{Mux, PluginListener, ServeError};

struct LifecycleWorld {
    echo: EchoPlugin,
    serving: Option<ServingPlugin>,
    response: Option<RawResponse>,
    outcome: Option<Result<(), ServeError>>,
    reserved: Option<TcpListener>,
    spec_directory: TempDir,
    listen_error: Option<String>,
}

impl LifecycleWorld {
    fn new() -> Self {
        Self {
            echo: EchoPlugin::default(),
            serving: None,
            response: None,
            outcome: None,
            reserved: None,
            spec_directory: tempfile::tempdir().expect("spec directory"),
            listen_error: None,
        }
    }

    fn serving(&self) -> &ServingPlugin {
        self.serving.as_ref().expect("plugin should be serving")
    }

    fn response(&self) -> &RawResponse {
        self.response.as_ref().expect("a response should be recorded")
    }
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}

#[given("a plugin implementing \"{capability}\" is serving")]
fn given_serving_plugin(world: &RefCell<LifecycleWorld>, capability: String) {
    let mut state = world.borrow_mut();
    let mut mux = Mux::new();
    mux.add_capability(&capability);
    mux.install(state.echo.clone()).expect("install echo plugin");
    state.serving = Some(ServingPlugin::start(mux));
}

#[given("a TCP port is already bound")]
fn given_port_in_use(world: &RefCell<LifecycleWorld>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("reserve port");
    world.borrow_mut().reserved = Some(listener);
}

#[when("the Engine calls \"{path}\" with \"{body}\"")]
fn when_engine_calls(world: &RefCell<LifecycleWorld>, path: String, body: String) {
    let response = world.borrow().serving().post(&path, body.as_bytes());
    world.borrow_mut().response = Some(response);
}

#[when("the Engine calls \"{path}\" without a body")]
fn when_engine_calls_without_body(world: &RefCell<LifecycleWorld>, path: String) {
    let response = world.borrow().serving().post(&path, b"");
    world.borrow_mut().response = Some(response);
}

#[when("the plugin shuts down")]
fn when_plugin_shuts_down(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let outcome = state.serving.as_mut().and_then(ServingPlugin::stop);
    state.outcome = outcome;
}

#[when("a plugin tries to listen on that port")]
fn when_listen_on_reserved_port(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let address = state
        .reserved
        .as_ref()
        .and_then(|listener| listener.local_addr().ok())
        .expect("reserved address");
    let result = PluginListener::tcp(
        &address.to_string(),
        PLUGIN_NAME,
        state.spec_directory.path(),
    );
    state.listen_error = result.err().map(|error| error.to_string());
}

#[then("the response status is {status}")]
fn then_status(world: &RefCell<LifecycleWorld>, status: u16) {
    assert_eq!(world.borrow().response().status, status);
}

#[then("the response body is JSON {body}")]
fn then_json_body(world: &RefCell<LifecycleWorld>, body: String) {
    let state = world.borrow();
    let response = state.response();
    assert_eq!(
        response.header("content-type"),
        Some("application/vnd.docker.plugins.v1.1+json")
    );
    assert_eq!(response.text(), format!("{body}\n"));
}

#[then("the response is plain text \"{message}\"")]
fn then_plain_text(world: &RefCell<LifecycleWorld>, message: String) {
    let state = world.borrow();
    let response = state.response();
    assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(response.text(), format!("{message}\n"));
}

#[then("the echo driver was invoked {count} times")]
fn then_echo_invocations(world: &RefCell<LifecycleWorld>, count: usize) {
    assert_eq!(world.borrow().echo.calls(), count);
}

#[then("the spec file advertises the listener")]
fn then_spec_file_advertises(world: &RefCell<LifecycleWorld>) {
    let state = world.borrow();
    let serving = state.serving();
    let contents = fs::read_to_string(serving.spec_path()).expect("read spec file");
    assert_eq!(contents, format!("tcp://{}", serving.address()));
}

#[then("serving returns successfully")]
fn then_serving_succeeds(world: &RefCell<LifecycleWorld>) {
    let state = world.borrow();
    assert!(
        matches!(state.outcome, Some(Ok(()))),
        "serve should return Ok, got {:?}",
        state.outcome
    );
}

#[then("the spec file is removed")]
fn then_spec_file_removed(world: &RefCell<LifecycleWorld>) {
    let state = world.borrow();
    assert!(!state.serving().spec_path().exists());
}

#[then("listening fails")]
fn then_listening_fails(world: &RefCell<LifecycleWorld>) {
    assert!(world.borrow().listen_error.is_some());
}

#[then("no spec file is written")]
fn then_no_spec_file(world: &RefCell<LifecycleWorld>) {
    let state = world.borrow();
    let spec = state.spec_directory.path().join(format!("{PLUGIN_NAME}.spec"));
    assert!(!spec.exists());
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 0)]
fn activation_lists_capabilities(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 1)]
fn routed_calls_reach_the_driver(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 2)]
fn malformed_bodies_are_rejected(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 3)]
fn empty_driver_errors_still_fail(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 4)]
fn unknown_paths_are_not_found(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 5)]
fn shutdown_removes_the_spec_file(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/plugin_lifecycle.feature", index = 6)]
fn failed_binds_leave_no_spec_file(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[cfg(unix)]
#[test]
fn unix_sockets_are_removed_after_serving() {
    use crate::{Server, SocketActivation};
    use std::path::Path;
    use std::thread;

    let directory = tempfile::tempdir().expect("socket directory");
    let mut mux = Mux::new();
    mux.install(EchoPlugin::default()).expect("install echo plugin");
    let listener = PluginListener::unix(
        Path::new(PLUGIN_NAME),
        None,
        directory.path(),
        SocketActivation::Disabled,
    )
    .expect("bind unix listener");
    let socket = listener.discovery_path().expect("socket path").to_path_buf();
    let server = Server::new(mux);
    let shutdown = server.shutdown_handle();
    let serving = thread::spawn(move || server.serve(listener));

    let response = crate::testing::post_unix(&socket, "/Plugin.Activate", b"")
        .expect("activate over unix socket");
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "{\"Implements\":[\"Echo\"]}\n");

    shutdown.trigger();
    serving
        .join()
        .expect("serve thread")
        .expect("serve should succeed");
    assert!(!socket.exists());
}
