//! Volume plugin protocol (`VolumeDriver`).
//!
//! Operations that only succeed or fail answer `{"Err": ""}`. Operations
//! that return data answer their payload with an `Err` field beside it.

mod shim;

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::{encode_result, encode_unit};
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin};
use serde::{Deserialize, Serialize};

use crate::wire::nullable;

pub use shim::{ShimDriver, VolumeBackend, VolumeHandle};

/// Capability advertised by volume plugins.
pub const CAPABILITY: &str = "VolumeDriver";

const CREATE_PATH: &str = "/VolumeDriver.Create";
const GET_PATH: &str = "/VolumeDriver.Get";
const LIST_PATH: &str = "/VolumeDriver.List";
const REMOVE_PATH: &str = "/VolumeDriver.Remove";
const PATH_PATH: &str = "/VolumeDriver.Path";
const MOUNT_PATH: &str = "/VolumeDriver.Mount";
const UNMOUNT_PATH: &str = "/VolumeDriver.Unmount";
const CAPABILITIES_PATH: &str = "/VolumeDriver.Capabilities";

/// Arguments of `VolumeDriver.Create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Driver options passed with `--opt`.
    #[serde(
        rename = "Opts",
        deserialize_with = "nullable",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub options: BTreeMap<String, String>,
}

/// Arguments naming a single volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameRequest {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// Arguments of `VolumeDriver.Get`.
pub type GetRequest = NameRequest;
/// Arguments of `VolumeDriver.Remove`.
pub type RemoveRequest = NameRequest;
/// Arguments of `VolumeDriver.Path`.
pub type PathRequest = NameRequest;

/// Arguments of `VolumeDriver.Mount` and `VolumeDriver.Unmount`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountRequest {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Identifier of the caller, unique per mount.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Arguments of `VolumeDriver.Unmount`.
pub type UnmountRequest = MountRequest;

/// A volume as reported to the Engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    /// Volume name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Host path, when mounted.
    #[serde(rename = "Mountpoint", skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    /// Creation time in RFC 3339 form.
    #[serde(rename = "CreatedAt", skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    /// Driver-specific status shown by `docker volume inspect`.
    #[serde(
        rename = "Status",
        deserialize_with = "nullable",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub status: BTreeMap<String, serde_json::Value>,
}

/// Result of `VolumeDriver.Get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    /// The requested volume.
    #[serde(rename = "Volume")]
    pub volume: Option<Volume>,
}

/// Result of `VolumeDriver.List`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Every volume the driver knows.
    #[serde(rename = "Volumes")]
    pub volumes: Vec<Volume>,
}

/// Result of `VolumeDriver.Path` and `VolumeDriver.Mount`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountpointResponse {
    /// Host path of the volume.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

/// Result of `VolumeDriver.Path`.
pub type PathResponse = MountpointResponse;
/// Result of `VolumeDriver.Mount`.
pub type MountResponse = MountpointResponse;

/// Where a volume is visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible on this host only.
    #[default]
    Local,
    /// Visible across the cluster.
    Global,
}

/// Driver capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Volume scope.
    #[serde(rename = "Scope")]
    pub scope: Scope,
}

/// Result of `VolumeDriver.Capabilities`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    /// Reported capabilities.
    #[serde(rename = "Capabilities")]
    pub capabilities: Capability,
}

/// Operations a volume plugin provides.
///
/// Implementations are shared between concurrent requests.
pub trait VolumeDriver: Send + Sync {
    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn create(&self, request: &CreateRequest) -> DriverResult<()>;

    /// Lists every volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn list(&self) -> DriverResult<ListResponse>;

    /// Describes one volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn get(&self, request: &GetRequest) -> DriverResult<GetResponse>;

    /// Deletes a volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn remove(&self, request: &RemoveRequest) -> DriverResult<()>;

    /// Returns the host path of a volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn path(&self, request: &PathRequest) -> DriverResult<PathResponse>;

    /// Makes a volume available for the caller in `request.id`.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn mount(&self, request: &MountRequest) -> DriverResult<MountResponse>;

    /// Releases the caller's use of a volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn unmount(&self, request: &UnmountRequest) -> DriverResult<()>;

    /// Reports driver capabilities. Defaults to local scope.
    fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse::default()
    }
}

/// Routes the volume protocol to a [`VolumeDriver`].
#[derive(Debug)]
pub struct VolumeHandler<D> {
    driver: Arc<D>,
}

impl<D: VolumeDriver + 'static> VolumeHandler<D> {
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

impl<D: VolumeDriver + 'static> Plugin for VolumeHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(CREATE_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: CreateRequest = request.decode()?;
            Ok(encode_unit(driver.create(&body)))
        })?;
        mux.handle_with(REMOVE_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: RemoveRequest = request.decode()?;
            Ok(encode_unit(driver.remove(&body)))
        })?;
        mux.handle_with(MOUNT_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: MountRequest = request.decode()?;
            Ok(encode_result(driver.mount(&body)))
        })?;
        mux.handle_with(PATH_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: PathRequest = request.decode()?;
            Ok(encode_result(driver.path(&body)))
        })?;
        mux.handle_with(GET_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: GetRequest = request.decode()?;
            Ok(encode_result(driver.get(&body)))
        })?;
        mux.handle_with(UNMOUNT_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: UnmountRequest = request.decode()?;
            Ok(encode_unit(driver.unmount(&body)))
        })?;
        mux.handle_with(LIST_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(encode_result(driver.list()))
        })?;
        mux.handle_with(CAPABILITIES_PATH, driver, |driver, _request| {
            Ok(encode_result(Ok(driver.capabilities())))
        })
    }
}

#[cfg(test)]
mod tests;
