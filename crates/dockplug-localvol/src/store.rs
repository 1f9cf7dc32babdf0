//! Directory-backed volume store.
//!
//! Each volume is a directory under the store root. Mounts are counted per
//! caller id in memory; a volume with live mounts cannot be removed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use dockplug_protocols::volume::{VolumeBackend, VolumeHandle};
use dockplug_sdk::{DriverError, DriverResult};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Failures raised by [`DirectoryStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The volume name cannot be used as a directory name.
    #[error("invalid volume name '{name}'")]
    InvalidName {
        /// Offending name.
        name: String,
    },
    /// No directory exists for the volume.
    #[error("volume {name} not found")]
    NotFound {
        /// Requested volume.
        name: String,
    },
    /// The volume still has live mounts.
    #[error("volume {name} is in use by {mounts} mount(s)")]
    InUse {
        /// Requested volume.
        name: String,
        /// Number of live mounts.
        mounts: usize,
    },
    /// The caller never mounted the volume.
    #[error("volume {name} is not mounted by {id}")]
    NotMounted {
        /// Requested volume.
        name: String,
        /// Caller id.
        id: String,
    },
    /// A filesystem operation failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl From<StoreError> for DriverError {
    fn from(error: StoreError) -> Self {
        Self::new(error.to_string())
    }
}

type MountTable = Arc<Mutex<HashMap<String, BTreeSet<String>>>>;

fn lock(mounts: &MountTable) -> MutexGuard<'_, HashMap<String, BTreeSet<String>>> {
    mounts.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Volumes stored as directories under one root.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: Utf8PathBuf,
    mounts: MountTable,
}

impl DirectoryStore {
    /// Opens the store at `root`, creating the directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the root cannot be created.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root: Utf8PathBuf = path.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            action: "create data root",
            path: root.clone(),
            source,
        })?;
        info!(target: STORE_TARGET, root = %root, "volume store opened");
        Ok(Self {
            root,
            mounts: MountTable::default(),
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn volume_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if valid {
            Ok(self.root.join(name))
        } else {
            Err(StoreError::InvalidName {
                name: name.to_owned(),
            })
        }
    }

    fn handle(&self, name: &str, path: Utf8PathBuf) -> DirectoryVolume {
        DirectoryVolume {
            name: name.to_owned(),
            path,
            mounts: Arc::clone(&self.mounts),
        }
    }

    fn lookup(&self, name: &str) -> Result<DirectoryVolume, StoreError> {
        let path = self.volume_path(name)?;
        if path.is_dir() {
            Ok(self.handle(name, path))
        } else {
            Err(StoreError::NotFound {
                name: name.to_owned(),
            })
        }
    }
}

/// One volume directory.
#[derive(Debug)]
pub struct DirectoryVolume {
    name: String,
    path: Utf8PathBuf,
    mounts: MountTable,
}

impl DirectoryVolume {
    fn mount_count(&self) -> usize {
        lock(&self.mounts).get(&self.name).map_or(0, BTreeSet::len)
    }
}

impl VolumeHandle for DirectoryVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> String {
        self.path.to_string()
    }

    fn mount(&self, id: &str) -> DriverResult<String> {
        let mut mounts = lock(&self.mounts);
        if !self.path.is_dir() {
            return Err(StoreError::NotFound {
                name: self.name.clone(),
            }
            .into());
        }
        mounts
            .entry(self.name.clone())
            .or_default()
            .insert(id.to_owned());
        Ok(self.path())
    }

    fn unmount(&self, id: &str) -> DriverResult<()> {
        let mut mounts = lock(&self.mounts);
        let released = mounts
            .get_mut(&self.name)
            .is_some_and(|callers| callers.remove(id));
        if !released {
            return Err(StoreError::NotMounted {
                name: self.name.clone(),
                id: id.to_owned(),
            }
            .into());
        }
        if mounts.get(&self.name).is_some_and(BTreeSet::is_empty) {
            mounts.remove(&self.name);
        }
        Ok(())
    }

    fn created_at(&self) -> Option<String> {
        let metadata = fs::metadata(&self.path).ok()?;
        let created = metadata.created().or_else(|_| metadata.modified()).ok()?;
        OffsetDateTime::from(created).format(&Rfc3339).ok()
    }

    fn status(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([(String::from("Mounts"), Value::from(self.mount_count()))])
    }
}

impl VolumeBackend for DirectoryStore {
    type Volume = DirectoryVolume;

    fn create(&self, name: &str, options: &BTreeMap<String, String>) -> DriverResult<Self::Volume> {
        let path = self.volume_path(name)?;
        if !options.is_empty() {
            return Err(DriverError::new(format!(
                "volume {name}: options are not supported"
            )));
        }
        fs::create_dir_all(&path).map_err(|source| StoreError::Io {
            action: "create volume",
            path: path.clone(),
            source,
        })?;
        debug!(target: STORE_TARGET, volume = name, path = %path, "volume created");
        Ok(self.handle(name, path))
    }

    fn get(&self, name: &str) -> DriverResult<Self::Volume> {
        self.lookup(name).map_err(DriverError::from)
    }

    fn list(&self) -> DriverResult<Vec<Self::Volume>> {
        let entries = self.root.read_dir_utf8().map_err(|source| StoreError::Io {
            action: "list",
            path: self.root.clone(),
            source,
        })?;
        let mut volumes = Vec::new();
        for item in entries {
            let entry = item.map_err(|source| StoreError::Io {
                action: "list",
                path: self.root.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                volumes.push(self.handle(entry.file_name(), entry.path().to_path_buf()));
            }
        }
        volumes.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(volumes)
    }

    fn remove(&self, volume: Self::Volume) -> DriverResult<()> {
        let mounts = lock(&self.mounts);
        let live = mounts.get(&volume.name).map_or(0, BTreeSet::len);
        if live > 0 {
            return Err(StoreError::InUse {
                name: volume.name,
                mounts: live,
            }
            .into());
        }
        fs::remove_dir_all(&volume.path).map_err(|source| StoreError::Io {
            action: "remove volume",
            path: volume.path.clone(),
            source,
        })?;
        drop(mounts);
        debug!(target: STORE_TARGET, volume = %volume.name, "volume removed");
        Ok(())
    }
}
