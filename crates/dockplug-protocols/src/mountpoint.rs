//! Mount point plugin protocol (`mountpoint`).
//!
//! Every response carries `Success` and `Err`. A failed call answers
//! `Success: false` with zero-valued payload fields and status 500.

use std::collections::BTreeMap;
use std::sync::Arc;

use dockplug_sdk::codec::encode_response;
use dockplug_sdk::{DriverResult, Mux, MuxError, Plugin, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::nullable;

/// Capability advertised by mount point plugins.
pub const CAPABILITY: &str = "mountpoint";

const PROPERTIES_PATH: &str = "/MountPointPlugin.MountPointProperties";
const ATTACH_PATH: &str = "/MountPointPlugin.MountPointAttach";
const DETACH_PATH: &str = "/MountPointPlugin.MountPointDetach";

/// Result of `MountPointProperties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertiesResponse {
    /// Patterns selecting the mounts the plugin wants to see. Their schema
    /// is owned by the Engine and passed through untouched.
    #[serde(rename = "Patterns")]
    pub patterns: Vec<Value>,
}

/// A mount about to be attached to a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountPoint {
    /// Source as seen by the daemon after earlier plugins ran.
    #[serde(rename = "EffectiveSource")]
    pub effective_source: String,
    /// Source requested by the user.
    #[serde(rename = "Source")]
    pub source: String,
    /// Path inside the container.
    #[serde(rename = "Destination")]
    pub destination: String,
    /// Whether the mount is read-only.
    #[serde(rename = "ReadOnly")]
    pub read_only: bool,
    /// Volume name, for volume mounts.
    #[serde(rename = "Name")]
    pub name: String,
    /// Volume driver, for volume mounts.
    #[serde(rename = "Driver")]
    pub driver: String,
    /// Mount type, e.g. `bind` or `volume`.
    #[serde(rename = "Type")]
    pub kind: String,
    /// Mount mode flags.
    #[serde(rename = "Mode")]
    pub mode: String,
    /// Mount propagation.
    #[serde(rename = "Propagation")]
    pub propagation: String,
    /// Mount identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Arguments of `MountPointAttach`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachRequest {
    /// Container identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Mounts of the container.
    #[serde(rename = "Mounts", deserialize_with = "nullable")]
    pub mounts: Vec<MountPoint>,
}

/// The plugin's decision for one mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Whether the plugin attaches to this mount.
    #[serde(rename = "Attach")]
    pub attach: bool,
    /// Replacement source for the mount; empty keeps the current one.
    #[serde(rename = "EffectiveSource", default)]
    pub effective_source: String,
    /// Replacement consistency for the mount; empty keeps the current one.
    #[serde(rename = "EffectiveConsistency", default)]
    pub effective_consistency: String,
}

/// Result of `MountPointAttach`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachResponse {
    /// One entry per requested mount, in order.
    #[serde(rename = "Attachments")]
    pub attachments: Vec<Attachment>,
}

/// Arguments of `MountPointDetach`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetachRequest {
    /// Container identifier.
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Serialize)]
struct Outcome<T> {
    #[serde(rename = "Success")]
    success: bool,
    #[serde(flatten)]
    body: T,
    #[serde(rename = "Err")]
    err: String,
}

fn outcome<T: Serialize + Default>(result: DriverResult<T>) -> Reply {
    match result {
        Ok(body) => encode_response(
            &Outcome {
                success: true,
                body,
                err: String::new(),
            },
            false,
        ),
        Err(error) => encode_response(
            &Outcome {
                success: false,
                body: T::default(),
                err: error.message().to_owned(),
            },
            true,
        ),
    }
}

/// Middleware consulted when containers with matching mounts start and stop.
pub trait MountPointPlugin: Send + Sync {
    /// Describes which mounts the plugin is interested in.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `Success: false` with `Err`.
    fn properties(&self) -> DriverResult<PropertiesResponse>;

    /// Inspects the mounts of a starting container.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `Success: false` with `Err`.
    fn attach(&self, request: &AttachRequest) -> DriverResult<AttachResponse>;

    /// Releases the plugin's interest in a stopping container.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as `Success: false` with `Err`.
    fn detach(&self, request: &DetachRequest) -> DriverResult<()>;
}

/// Routes the mount point protocol to a [`MountPointPlugin`].
#[derive(Debug)]
pub struct MountPointHandler<D> {
    driver: Arc<D>,
}

impl<D: MountPointPlugin + 'static> MountPointHandler<D> {
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

impl<D: MountPointPlugin + 'static> Plugin for MountPointHandler<D> {
    fn capability(&self) -> &'static str {
        CAPABILITY
    }

    fn register(self, mux: &mut Mux) -> Result<(), MuxError> {
        let driver = self.driver;
        mux.handle_with(PROPERTIES_PATH, Arc::clone(&driver), |driver, _request| {
            Ok(outcome(driver.properties()))
        })?;
        mux.handle_with(ATTACH_PATH, Arc::clone(&driver), |driver, mut request| {
            let body: AttachRequest = request.decode()?;
            Ok(outcome(driver.attach(&body)))
        })?;
        mux.handle_with(DETACH_PATH, driver, |driver, mut request| {
            let body: DetachRequest = request.decode()?;
            Ok(outcome(driver.detach(&body).map(|()| serde_json::Map::new())))
        })
    }
}
