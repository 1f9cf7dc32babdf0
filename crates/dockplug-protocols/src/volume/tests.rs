//! Unit tests for the volume protocol adapter and shim.

use std::collections::BTreeMap;
use std::sync::Mutex;

use dockplug_sdk::codec::{Envelope, decode_request, encode_response};
use dockplug_sdk::{DriverError, PluginRequest, RequestBody, StatusCode};
use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

mock! {
    Driver {}
    impl VolumeDriver for Driver {
        fn create(&self, request: &CreateRequest) -> DriverResult<()>;
        fn list(&self) -> DriverResult<ListResponse>;
        fn get(&self, request: &GetRequest) -> DriverResult<GetResponse>;
        fn remove(&self, request: &RemoveRequest) -> DriverResult<()>;
        fn path(&self, request: &PathRequest) -> DriverResult<PathResponse>;
        fn mount(&self, request: &MountRequest) -> DriverResult<MountResponse>;
        fn unmount(&self, request: &UnmountRequest) -> DriverResult<()>;
        fn capabilities(&self) -> CapabilitiesResponse;
    }
}

fn serve(driver: impl VolumeDriver + 'static) -> Mux {
    let mut mux = Mux::new();
    mux.install(VolumeHandler::new(driver)).expect("install volume handler");
    mux
}

fn call(mux: &Mux, path: &str, body: &Value) -> (StatusCode, Value) {
    let request = PluginRequest::json(path, body).expect("encode request");
    let reply = mux.dispatch(request);
    let status = reply.status();
    let bytes = reply.into_bytes().expect("reply bytes");
    (status, serde_json::from_slice(&bytes).expect("reply json"))
}

#[fixture]
fn driver() -> MockDriver {
    MockDriver::new()
}

#[rstest]
fn create_passes_name_and_options(mut driver: MockDriver) {
    driver
        .expect_create()
        .withf(|request| {
            request.name == "foo" && request.options.get("size").map(String::as_str) == Some("1g")
        })
        .times(1)
        .returning(|_| Ok(()));
    let mux = serve(driver);

    let (status, body) = call(
        &mux,
        CREATE_PATH,
        &json!({"Name": "foo", "Opts": {"size": "1g"}}),
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": ""}));
}

#[rstest]
fn create_failures_are_server_errors(mut driver: MockDriver) {
    driver
        .expect_create()
        .returning(|_| Err(DriverError::new("no space left")));
    let mux = serve(driver);

    let (status, body) = call(&mux, CREATE_PATH, &json!({"Name": "foo"}));
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"Err": "no space left"}));
}

#[rstest]
fn mount_returns_the_mountpoint(mut driver: MockDriver) {
    driver
        .expect_mount()
        .withf(|request| request.name == "foo" && request.id == "c1")
        .returning(|_| {
            Ok(MountResponse {
                mountpoint: String::from("/mnt/foo"),
            })
        });
    let mux = serve(driver);

    let (status, body) = call(&mux, MOUNT_PATH, &json!({"Name": "foo", "ID": "c1"}));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Mountpoint": "/mnt/foo", "Err": ""}));
}

#[rstest]
fn failed_gets_keep_the_response_shape(mut driver: MockDriver) {
    driver
        .expect_get()
        .returning(|_| Err(DriverError::new("no such volume")));
    let mux = serve(driver);

    let (status, body) = call(&mux, GET_PATH, &json!({"Name": "missing"}));
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"Volume": null, "Err": "no such volume"}));
}

#[rstest]
fn list_ignores_the_request_body(mut driver: MockDriver) {
    driver.expect_list().returning(|| {
        Ok(ListResponse {
            volumes: vec![Volume {
                name: String::from("foo"),
                ..Volume::default()
            }],
        })
    });
    let mux = serve(driver);

    let reply = mux.dispatch(PluginRequest::new(LIST_PATH, RequestBody::empty()));
    assert_eq!(reply.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&reply.into_bytes().expect("bytes")).expect("json");
    assert_eq!(body, json!({"Volumes": [{"Name": "foo"}], "Err": ""}));
}

#[rstest]
fn capabilities_default_to_local_scope() {
    struct Minimal;
    impl VolumeDriver for Minimal {
        fn create(&self, _: &CreateRequest) -> DriverResult<()> {
            Ok(())
        }
        fn list(&self) -> DriverResult<ListResponse> {
            Ok(ListResponse::default())
        }
        fn get(&self, _: &GetRequest) -> DriverResult<GetResponse> {
            Ok(GetResponse::default())
        }
        fn remove(&self, _: &RemoveRequest) -> DriverResult<()> {
            Ok(())
        }
        fn path(&self, _: &PathRequest) -> DriverResult<PathResponse> {
            Ok(PathResponse::default())
        }
        fn mount(&self, _: &MountRequest) -> DriverResult<MountResponse> {
            Ok(MountResponse::default())
        }
        fn unmount(&self, _: &UnmountRequest) -> DriverResult<()> {
            Ok(())
        }
    }

    let mux = serve(Minimal);
    let (status, body) = call(&mux, CAPABILITIES_PATH, &json!({}));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Capabilities": {"Scope": "local"}, "Err": ""}));
}

#[rstest]
fn malformed_bodies_never_reach_the_driver(mut driver: MockDriver) {
    driver.expect_create().times(0);
    let mux = serve(driver);

    let reply = mux.dispatch(PluginRequest::new(
        CREATE_PATH,
        RequestBody::from_bytes(&b"{\"Name\":"[..]),
    ));
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
}

#[rstest]
fn registers_every_route_and_the_capability(driver: MockDriver) {
    let mux = serve(driver);
    assert_eq!(mux.manifest().implements(), [CAPABILITY]);
    for path in [
        CREATE_PATH,
        GET_PATH,
        LIST_PATH,
        REMOVE_PATH,
        PATH_PATH,
        MOUNT_PATH,
        UNMOUNT_PATH,
        CAPABILITIES_PATH,
    ] {
        assert!(mux.contains_route(path), "missing {path}");
    }
}

/// In-memory backend recording mounts per caller.
#[derive(Default)]
struct MemoryBackend {
    volumes: Mutex<BTreeMap<String, Vec<String>>>,
}

struct MemoryVolume<'a> {
    name: String,
    backend: &'a MemoryBackend,
}

impl VolumeHandle for MemoryVolume<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> String {
        format!("/mem/{}", self.name)
    }

    fn mount(&self, id: &str) -> DriverResult<String> {
        let mut volumes = self.backend.volumes.lock().expect("lock");
        volumes
            .entry(self.name.clone())
            .or_default()
            .push(id.to_owned());
        Ok(self.path())
    }

    fn unmount(&self, id: &str) -> DriverResult<()> {
        let mut volumes = self.backend.volumes.lock().expect("lock");
        let callers = volumes.entry(self.name.clone()).or_default();
        callers.retain(|caller| caller != id);
        Ok(())
    }

    fn status(&self) -> BTreeMap<String, Value> {
        let volumes = self.backend.volumes.lock().expect("lock");
        let mounts = volumes.get(&self.name).map_or(0, Vec::len);
        BTreeMap::from([(String::from("mounts"), json!(mounts))])
    }
}

impl<'a> VolumeBackend for &'a MemoryBackend {
    type Volume = MemoryVolume<'a>;

    fn create(&self, name: &str, _options: &BTreeMap<String, String>) -> DriverResult<Self::Volume> {
        self.volumes
            .lock()
            .expect("lock")
            .insert(name.to_owned(), Vec::new());
        self.get(name)
    }

    fn get(&self, name: &str) -> DriverResult<Self::Volume> {
        if self.volumes.lock().expect("lock").contains_key(name) {
            Ok(MemoryVolume {
                name: name.to_owned(),
                backend: *self,
            })
        } else {
            Err(DriverError::new(format!("volume {name} not found")))
        }
    }

    fn list(&self) -> DriverResult<Vec<Self::Volume>> {
        let names: Vec<String> = self.volumes.lock().expect("lock").keys().cloned().collect();
        names.iter().map(|name| self.get(name)).collect()
    }

    fn remove(&self, volume: Self::Volume) -> DriverResult<()> {
        self.volumes.lock().expect("lock").remove(&volume.name);
        Ok(())
    }
}

#[test]
fn shim_drives_the_backend_lifecycle() {
    let backend = MemoryBackend::default();
    let shim = ShimDriver::new(&backend);

    shim.create(&CreateRequest {
        name: String::from("foo"),
        options: BTreeMap::new(),
    })
    .expect("create");
    let mounted = shim
        .mount(&MountRequest {
            name: String::from("foo"),
            id: String::from("c1"),
        })
        .expect("mount");
    assert_eq!(mounted.mountpoint, "/mem/foo");

    let described = shim
        .get(&GetRequest {
            name: String::from("foo"),
        })
        .expect("get")
        .volume
        .expect("volume");
    assert_eq!(described.status.get("mounts"), Some(&json!(1)));

    let listed = shim.list().expect("list");
    assert_eq!(listed.volumes.len(), 1);
    assert!(listed.volumes.iter().all(|volume| volume.status.is_empty()));

    shim.remove(&RemoveRequest {
        name: String::from("foo"),
    })
    .expect("remove");
    let error = shim
        .path(&PathRequest {
            name: String::from("foo"),
        })
        .expect_err("volume should be gone");
    assert_eq!(error.message(), "volume foo not found");
}

#[test]
fn shim_reports_the_backend_scope() {
    let backend = MemoryBackend::default();
    let shim = ShimDriver::new(&backend);
    assert_eq!(shim.capabilities().capabilities.scope, Scope::Local);
}

fn sample_volume() -> Volume {
    Volume {
        name: String::from("foo"),
        mountpoint: String::from("/var/lib/dockplug/volumes/foo"),
        created_at: String::from("2024-05-01T12:00:00Z"),
        status: BTreeMap::from([(String::from("size"), json!(4096))]),
    }
}

#[rstest]
#[case(Envelope::success(GetResponse { volume: Some(sample_volume()) }))]
#[case(Envelope::success(GetResponse { volume: None }))]
#[case(Envelope { body: GetResponse::default(), err: String::from("volume foo not found") })]
fn get_envelopes_survive_the_wire(#[case] envelope: Envelope<GetResponse>) {
    let bytes = encode_response(&envelope, !envelope.err.is_empty())
        .into_bytes()
        .expect("reply bytes");
    let decoded: Envelope<GetResponse> = decode_request(bytes.as_slice()).expect("decode");
    assert_eq!(decoded, envelope);
}

#[test]
fn list_envelopes_survive_the_wire() {
    let bare = Volume {
        name: String::from("bar"),
        ..Volume::default()
    };
    let envelope = Envelope::success(ListResponse {
        volumes: vec![sample_volume(), bare],
    });
    let bytes = encode_response(&envelope, false)
        .into_bytes()
        .expect("reply bytes");
    let decoded: Envelope<ListResponse> = decode_request(bytes.as_slice()).expect("decode");
    assert_eq!(decoded, envelope);
}
