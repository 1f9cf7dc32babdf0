//! Graph driver plugin protocol (`GraphDriver`).
//!
//! `Diff` streams a tar archive back to the Engine. `ApplyDiff` receives
//! one as the raw request body, with the layer named by the `id` and
//! `parent` query parameters or, failing those, headers.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use dockplug_sdk::codec::{encode_error, encode_response, encode_result, encode_unit};
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, PluginRequest, Reply};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::wire::nullable;

/// Capability advertised by graph driver plugins.
pub const CAPABILITY: &str = "GraphDriver";

const GRAPH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::graphdriver");

const INIT_PATH: &str = "/GraphDriver.Init";
const CREATE_PATH: &str = "/GraphDriver.Create";
const CREATE_RW_PATH: &str = "/GraphDriver.CreateReadWrite";
const REMOVE_PATH: &str = "/GraphDriver.Remove";
const GET_PATH: &str = "/GraphDriver.Get";
const PUT_PATH: &str = "/GraphDriver.Put";
const EXISTS_PATH: &str = "/GraphDriver.Exists";
const STATUS_PATH: &str = "/GraphDriver.Status";
const GET_METADATA_PATH: &str = "/GraphDriver.GetMetadata";
const CLEANUP_PATH: &str = "/GraphDriver.Cleanup";
const DIFF_PATH: &str = "/GraphDriver.Diff";
const CHANGES_PATH: &str = "/GraphDriver.Changes";
const APPLY_DIFF_PATH: &str = "/GraphDriver.ApplyDiff";
const DIFF_SIZE_PATH: &str = "/GraphDriver.DiffSize";

/// Arguments of `GraphDriver.Init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitRequest {
    /// Root directory the driver should manage.
    #[serde(rename = "Home")]
    pub home: String,
    /// Driver options from the daemon's `--storage-opt`.
    #[serde(rename = "Opts", deserialize_with = "nullable")]
    pub options: Vec<String>,
}

/// Arguments of `GraphDriver.Create` and `GraphDriver.CreateReadWrite`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    /// Layer identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Parent layer; empty for a base layer.
    #[serde(rename = "Parent")]
    pub parent: String,
    /// SELinux label for the layer's mounts.
    #[serde(rename = "MountLabel")]
    pub mount_label: String,
}

/// Arguments naming one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerRequest {
    /// Layer identifier.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Arguments of `GraphDriver.Remove`.
pub type RemoveRequest = LayerRequest;
/// Arguments of `GraphDriver.Put`.
pub type PutRequest = LayerRequest;
/// Arguments of `GraphDriver.Exists`.
pub type ExistsRequest = LayerRequest;
/// Arguments of `GraphDriver.GetMetadata`.
pub type GetMetadataRequest = LayerRequest;

/// Arguments of `GraphDriver.Get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRequest {
    /// Layer identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// SELinux label for the mount.
    #[serde(rename = "MountLabel")]
    pub mount_label: String,
}

/// Result of `GraphDriver.Get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Directory where the layer is mounted.
    #[serde(rename = "Dir")]
    pub dir: String,
}

/// Result of `GraphDriver.Exists`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResponse {
    /// Whether the layer exists.
    #[serde(rename = "Exists")]
    pub exists: bool,
}

/// Result of `GraphDriver.Status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Key and value pairs shown by `docker info`.
    #[serde(rename = "Status")]
    pub status: Vec<[String; 2]>,
}

/// Result of `GraphDriver.GetMetadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataResponse {
    /// Driver-specific layer metadata.
    #[serde(rename = "Metadata")]
    pub metadata: BTreeMap<String, String>,
}

/// Arguments of `GraphDriver.Diff`, `Changes` and `DiffSize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffRequest {
    /// Layer identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Layer to compare against; empty means the layer's own parent.
    #[serde(rename = "Parent")]
    pub parent: String,
}

/// Arguments of `GraphDriver.Changes`.
pub type ChangesRequest = DiffRequest;
/// Arguments of `GraphDriver.DiffSize`.
pub type DiffSizeRequest = DiffRequest;

/// How a path differs between two layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChangeKind {
    /// Contents or metadata changed.
    #[default]
    Modify,
    /// The path is new.
    Add,
    /// The path was removed.
    Delete,
}

impl From<ChangeKind> for u8 {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Modify => 0,
            ChangeKind::Add => 1,
            ChangeKind::Delete => 2,
        }
    }
}

impl TryFrom<u8> for ChangeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Modify),
            1 => Ok(Self::Add),
            2 => Ok(Self::Delete),
            other => Err(format!("unknown change kind {other}")),
        }
    }
}

/// One changed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Path inside the layer.
    #[serde(rename = "Path")]
    pub path: String,
    /// Kind of change.
    #[serde(rename = "Kind")]
    pub kind: ChangeKind,
}

/// Result of `GraphDriver.Changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changed paths.
    #[serde(rename = "Changes")]
    pub changes: Vec<Change>,
}

/// Result of `GraphDriver.ApplyDiff` and `GraphDriver.DiffSize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeResponse {
    /// Size in bytes.
    #[serde(rename = "Size")]
    pub size: i64,
}

/// Layer named by a `GraphDriver.ApplyDiff` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyDiffRequest {
    /// Layer receiving the archive.
    pub id: String,
    /// Parent of that layer.
    pub parent: String,
}

impl ApplyDiffRequest {
    fn from_request(request: &PluginRequest) -> Self {
        let field = |name: &str| {
            request
                .query(name)
                .or_else(|| request.header(name).map(str::to_owned))
                .unwrap_or_default()
        };
        Self {
            id: field("id"),
            parent: field("parent"),
        }
    }
}

/// Operations a graph driver plugin provides.
pub trait GraphDriver: Send + Sync {
    /// Prepares the driver to manage `request.home`.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn init(&self, request: &InitRequest) -> DriverResult<()>;

    /// Creates a read-only layer.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn create(&self, request: &CreateRequest) -> DriverResult<()>;

    /// Creates a writable container layer.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn create_read_write(&self, request: &CreateRequest) -> DriverResult<()>;

    /// Removes a layer.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn remove(&self, request: &RemoveRequest) -> DriverResult<()>;

    /// Mounts a layer and returns its directory.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn get(&self, request: &GetRequest) -> DriverResult<GetResponse>;

    /// Releases a mount taken by [`GraphDriver::get`].
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn put(&self, request: &PutRequest) -> DriverResult<()>;

    /// Reports whether a layer exists.
    fn exists(&self, request: &ExistsRequest) -> bool;

    /// Describes the driver for `docker info`.
    fn status(&self) -> StatusResponse;

    /// Returns layer metadata.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn get_metadata(&self, request: &GetMetadataRequest) -> DriverResult<MetadataResponse>;

    /// Releases every driver resource before the daemon exits.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}`.
    fn cleanup(&self) -> DriverResult<()>;

    /// Produces a tar archive of the layer's changes.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `{"Err": message}` instead
    /// of a stream.
    fn diff(&self, request: &DiffRequest) -> DriverResult<Box<dyn Read + Send>>;

    /// Lists the paths changed in a layer.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn changes(&self, request: &ChangesRequest) -> DriverResult<ChangesResponse>;

    /// Extracts `archive` into a layer, returning the bytes applied.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn apply_diff(
        &self,
        request: &ApplyDiffRequest,
        archive: &mut dyn Read,
    ) -> DriverResult<SizeResponse>;

    /// Computes the size of a layer's changes.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn diff_size(&self, request: &DiffSizeRequest) -> DriverResult<SizeResponse>;
}

/// Routes the graph driver protocol to a [`GraphDriver`].
#[derive(Debug)]
pub struct GraphDriverHandler<D> {
    driver: Arc<D>,
}

impl<D: GraphDriver + 'static> GraphDriverHandler<D> {
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

impl<D: GraphDriver + 'static> GraphDriverHandler<D> {
    fn register_layer_routes(driver: &Arc<D>, mux: &mut Mux) -> Result<(), MuxError> {
        mux.handle_with(INIT_PATH, Arc::clone(driver), |driver, mut request| {
            let body: InitRequest = request.decode()?;
            Ok(encode_unit(driver.init(&body)))
        })?;
        mux.handle_with(CREATE_PATH, Arc::clone(driver), |driver, mut request| {
            let body: CreateRequest = request.decode()?;
            Ok(encode_unit(driver.create(&body)))
        })?;
        mux.handle_with(CREATE_RW_PATH, Arc::clone(driver), |driver, mut request| {
            let body: CreateRequest = request.decode()?;
            Ok(encode_unit(driver.create_read_write(&body)))
        })?;
        mux.handle_with(REMOVE_PATH, Arc::clone(driver), |driver, mut request| {
            let body: RemoveRequest = request.decode()?;
            Ok(encode_unit(driver.remove(&body)))
        })?;
        mux.handle_with(GET_PATH, Arc::clone(driver), |driver, mut request| {
            let body: GetRequest = request.decode()?;
            Ok(encode_result(driver.get(&body)))
        })?;
        mux.handle_with(PUT_PATH, Arc::clone(driver), |driver, mut request| {
            let body: PutRequest = request.decode()?;
            Ok(encode_unit(driver.put(&body)))
        })?;
        mux.handle_with(EXISTS_PATH, Arc::clone(driver), |driver, mut request| {
            let body: ExistsRequest = request.decode()?;
            let exists = driver.exists(&body);
            Ok(encode_response(&ExistsResponse { exists }, false))
        })?;
        mux.handle_with(STATUS_PATH, Arc::clone(driver), |driver, _request| {
            Ok(encode_response(&driver.status(), false))
        })?;
        mux.handle_with(GET_METADATA_PATH, Arc::clone(driver), |driver, mut request| {
            let body: GetMetadataRequest = request.decode()?;
            Ok(encode_result(driver.get_metadata(&body)))
        })?;
        mux.handle_with(CLEANUP_PATH, Arc::clone(driver), |driver, _request| {
            Ok(encode_unit(driver.cleanup()))
        })
    }

    fn register_diff_routes(driver: Arc<D>, mux: &mut Mux) -> Result<(), MuxError> {
        mux.handle_with(DIFF_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: DiffRequest = request.decode()?;
            Ok(match driver.diff(&body) {
                Ok(archive) => Reply::stream(archive),
                Err(error) => encode_error(&error),
            })
        })?;
        mux.handle_with(CHANGES_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: ChangesRequest = request.decode()?;
            Ok(encode_result(driver.changes(&body)))
        })?;
        mux.handle_with(APPLY_DIFF_PATH, Arc::clone(&driver), |driver, mut request| {
            let layer = ApplyDiffRequest::from_request(&request);
            debug!(
                target: GRAPH_TARGET,
                id = %layer.id,
                parent = %layer.parent,
                "applying layer archive"
            );
            Ok(encode_result(driver.apply_diff(&layer, request.body_mut())))
        })?;
        mux.handle_with(DIFF_SIZE_PATH, driver, |driver, mut request| {
            let body: DiffSizeRequest = request.decode()?;
            Ok(encode_result(driver.diff_size(&body)))
        })
    }
}

impl<D: GraphDriver + 'static> Plugin for GraphDriverHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        Self::register_layer_routes(&self.driver, mux)?;
        Self::register_diff_routes(self.driver, mux)
    }
}
