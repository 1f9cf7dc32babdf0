//! Adapts an object-style volume backend to [`VolumeDriver`].
//!
//! Backends that already model volumes as values with their own mount
//! lifecycle implement [`VolumeBackend`] and get the request-shaped driver
//! for free.

use std::collections::BTreeMap;

use dockplug_sdk::DriverResult;
use tracing::debug;

use super::{
    Capability, CapabilitiesResponse, CreateRequest, GetRequest, GetResponse, ListResponse,
    MountRequest, MountResponse, PathRequest, PathResponse, RemoveRequest, Scope,
    UnmountRequest, Volume, VolumeDriver,
};

const SHIM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::volume::shim");

/// One volume owned by a [`VolumeBackend`].
pub trait VolumeHandle {
    /// Volume name.
    fn name(&self) -> &str;

    /// Host path where the volume is or will be mounted.
    fn path(&self) -> String;

    /// Mounts the volume for caller `id`, returning the host path.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn mount(&self, id: &str) -> DriverResult<String>;

    /// Releases caller `id`'s mount.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn unmount(&self, id: &str) -> DriverResult<()>;

    /// Creation time in RFC 3339 form, when known.
    fn created_at(&self) -> Option<String> {
        None
    }

    /// Driver-specific status.
    fn status(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }
}

/// A volume store addressed by volume values.
pub trait VolumeBackend: Send + Sync {
    /// Handle type for volumes in this store.
    type Volume: VolumeHandle;

    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn create(&self, name: &str, options: &BTreeMap<String, String>) -> DriverResult<Self::Volume>;

    /// Looks a volume up by name.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn get(&self, name: &str) -> DriverResult<Self::Volume>;

    /// Lists every volume.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn list(&self) -> DriverResult<Vec<Self::Volume>>;

    /// Deletes `volume`.
    ///
    /// # Errors
    ///
    /// A failure is reported to the Engine as the call's `Err`.
    fn remove(&self, volume: Self::Volume) -> DriverResult<()>;

    /// Volume scope. Defaults to local.
    fn scope(&self) -> Scope {
        Scope::Local
    }
}

/// [`VolumeDriver`] backed by a [`VolumeBackend`].
#[derive(Debug, Default)]
pub struct ShimDriver<B> {
    backend: B,
}

impl<B: VolumeBackend> ShimDriver<B> {
    /// Wraps `backend`.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Borrows the wrapped backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}

fn describe<V: VolumeHandle>(volume: &V, with_status: bool) -> Volume {
    Volume {
        name: volume.name().to_owned(),
        mountpoint: volume.path(),
        created_at: volume.created_at().unwrap_or_default(),
        status: if with_status {
            volume.status()
        } else {
            BTreeMap::new()
        },
    }
}

impl<B: VolumeBackend> VolumeDriver for ShimDriver<B> {
    fn create(&self, request: &CreateRequest) -> DriverResult<()> {
        self.backend.create(&request.name, &request.options)?;
        Ok(())
    }

    fn list(&self) -> DriverResult<ListResponse> {
        let volumes = self.backend.list()?;
        Ok(ListResponse {
            volumes: volumes.iter().map(|volume| describe(volume, false)).collect(),
        })
    }

    fn get(&self, request: &GetRequest) -> DriverResult<GetResponse> {
        let volume = self.backend.get(&request.name)?;
        Ok(GetResponse {
            volume: Some(describe(&volume, true)),
        })
    }

    fn remove(&self, request: &RemoveRequest) -> DriverResult<()> {
        let volume = self.backend.get(&request.name)?;
        self.backend.remove(volume)
    }

    fn path(&self, request: &PathRequest) -> DriverResult<PathResponse> {
        let volume = self.backend.get(&request.name)?;
        Ok(PathResponse {
            mountpoint: volume.path(),
        })
    }

    fn mount(&self, request: &MountRequest) -> DriverResult<MountResponse> {
        let volume = self.backend.get(&request.name)?;
        let mountpoint = volume.mount(&request.id)?;
        debug!(
            target: SHIM_TARGET,
            volume = %request.name,
            caller = %request.id,
            "volume mounted"
        );
        Ok(MountResponse { mountpoint })
    }

    fn unmount(&self, request: &UnmountRequest) -> DriverResult<()> {
        let volume = self.backend.get(&request.name)?;
        volume.unmount(&request.id)?;
        debug!(
            target: SHIM_TARGET,
            volume = %request.name,
            caller = %request.id,
            "volume unmounted"
        );
        Ok(())
    }

    fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            capabilities: Capability {
                scope: self.backend.scope(),
            },
        }
    }
}
