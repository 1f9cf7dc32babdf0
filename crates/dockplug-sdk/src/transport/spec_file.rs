//! Discovery artifacts: spec files and socket paths the Engine scans for.

use std::fs::{self, DirBuilder};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{info, warn};

use super::{LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const SPEC_EXTENSION: &str = "spec";

/// Kind of file a [`DiscoveryArtifact`] owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `<name>.spec` holding the listener URL.
    SpecFile,
    /// Unix socket path bound by the plugin.
    UnixSocket,
}

impl ArtifactKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SpecFile => "spec file",
            Self::UnixSocket => "unix socket",
        }
    }
}

/// A file that advertises the plugin while it is alive.
///
/// Dropping the artifact removes the file, including while unwinding from a
/// panic. A file that is already gone is ignored and any other removal
/// failure is logged.
#[derive(Debug)]
pub struct DiscoveryArtifact {
    path: PathBuf,
    kind: ArtifactKind,
}

impl DiscoveryArtifact {
    pub(crate) const fn unix_socket(path: PathBuf) -> Self {
        Self {
            path,
            kind: ArtifactKind::UnixSocket,
        }
    }

    /// Returns the artifact's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns what the artifact is.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }
}

impl Drop for DiscoveryArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(
                target: LISTENER_TARGET,
                file = %self.path.display(),
                artifact = self.kind.as_str(),
                "discovery artifact removed"
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: LISTENER_TARGET,
                file = %self.path.display(),
                artifact = self.kind.as_str(),
                error = %error,
                "failed to remove discovery artifact"
            ),
        }
    }
}

/// Rejects names that cannot safely become `<name>.spec` or `<name>.sock`.
pub(crate) fn validate_plugin_name(name: &str) -> Result<(), ListenerError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(ListenerError::InvalidPluginName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// Creates `directory` and its parents with mode 0755.
pub(crate) fn create_directory(directory: &Path) -> Result<(), ListenerError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(directory)
        .map_err(|source| ListenerError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })
}

/// Writes `<directory>/<plugin_name>.spec` containing `address`.
///
/// The directory is created when missing. The file is written to a
/// temporary sibling, flushed and renamed into place, so the Engine never
/// reads a partial address.
pub(crate) fn write_spec_file(
    directory: &Path,
    plugin_name: &str,
    address: &str,
) -> Result<DiscoveryArtifact, ListenerError> {
    validate_plugin_name(plugin_name)?;
    create_directory(directory)?;
    let path = directory.join(format!("{plugin_name}.{SPEC_EXTENSION}"));
    atomic_write(&path, address.as_bytes()).map_err(|source| ListenerError::WriteSpec {
        path: path.clone(),
        source,
    })?;
    info!(
        target: LISTENER_TARGET,
        file = %path.display(),
        address,
        "spec file written"
    );
    Ok(DiscoveryArtifact {
        path,
        kind: ArtifactKind::SpecFile,
    })
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "spec file path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(".dockplug-spec");
    #[cfg(unix)]
    builder.permissions(fs::Permissions::from_mode(0o644));

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
