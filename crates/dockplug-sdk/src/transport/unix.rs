//! Unix socket binding with stale-socket recovery and group access.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, chown};
use tracing::info;

use super::spec_file::{create_directory, validate_plugin_name};
use super::{LISTENER_TARGET, ListenerError};

const SOCKET_EXTENSION: &str = "sock";
const SOCKET_MODE: u32 = 0o660;

/// Resolves the socket path for `address`.
///
/// Absolute addresses are used verbatim. Bare names become
/// `<socket_directory>/<name>.sock`, creating the directory when needed.
pub(super) fn socket_path(
    address: &Path,
    socket_directory: &Path,
) -> Result<PathBuf, ListenerError> {
    if address.is_absolute() {
        if let Some(parent) = address.parent() {
            create_directory(parent)?;
        }
        return Ok(address.to_path_buf());
    }
    let name = address.to_string_lossy();
    validate_plugin_name(&name)?;
    create_directory(socket_directory)?;
    Ok(socket_directory.join(format!("{name}.{SOCKET_EXTENSION}")))
}

/// Binds `path`, replacing a socket left behind by a dead process.
pub(super) fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if let Some(metadata) = existing_metadata(path)? {
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket {
                path: path.to_path_buf(),
            });
        }
        match UnixStream::connect(path) {
            Ok(_stream) => {
                return Err(ListenerError::UnixInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound =>
            {
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(
                    target: LISTENER_TARGET,
                    path = %path.display(),
                    "removed stale unix socket"
                );
            }
            Err(source) => {
                return Err(ListenerError::UnixInspect {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_path_buf(),
        source,
    })
}

fn existing_metadata(path: &Path) -> Result<Option<fs::Metadata>, ListenerError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ListenerError::UnixInspect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Grants `group` read/write access to the socket at `path`.
///
/// The group is looked up by name first and then read as a numeric gid.
pub(super) fn grant_group_access(path: &Path, group: &str) -> Result<(), ListenerError> {
    let gid = resolve_group(group)?;
    chown(path, None, Some(gid)).map_err(|errno| ListenerError::SocketOwnership {
        path: path.to_path_buf(),
        source: io::Error::from(errno),
    })?;
    fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE)).map_err(|source| {
        ListenerError::SocketPermissions {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!(
        target: LISTENER_TARGET,
        path = %path.display(),
        group,
        gid = gid.as_raw(),
        "unix socket shared with group"
    );
    Ok(())
}

fn resolve_group(group: &str) -> Result<Gid, ListenerError> {
    match Group::from_name(group) {
        Ok(Some(entry)) => Ok(entry.gid),
        Ok(None) => group
            .parse::<u32>()
            .map(Gid::from_raw)
            .map_err(|_| ListenerError::UnknownGroup {
                group: group.to_owned(),
            }),
        Err(errno) => Err(ListenerError::GroupLookup {
            group: group.to_owned(),
            source: io::Error::from(errno),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getegid;

    #[test]
    fn bare_names_land_in_the_socket_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sockets = dir.path().join("run").join("docker").join("plugins");
        let path = socket_path(Path::new("jerry"), &sockets).expect("resolve path");
        assert_eq!(path, sockets.join("jerry.sock"));
        assert!(sockets.is_dir(), "socket directory should be created");
    }

    #[test]
    fn absolute_paths_are_used_verbatim() {
        let dir = tempfile::tempdir().expect("temp dir");
        let address = dir.path().join("custom.sock");
        let path = socket_path(&address, Path::new("/nonexistent")).expect("resolve path");
        assert_eq!(path, address);
    }

    #[test]
    fn stale_sockets_are_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jerry.sock");
        drop(UnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists(), "stale socket should remain");
        let _listener = bind_unix(&path).expect("rebind over stale socket");
        UnixStream::connect(&path).expect("connect to new listener");
    }

    #[test]
    fn live_sockets_are_refused() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jerry.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing");
        let error = bind_unix(&path).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }

    #[test]
    fn regular_files_are_not_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jerry.sock");
        fs::write(&path, b"not a socket").expect("write file");
        let error = bind_unix(&path).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    }

    #[test]
    fn numeric_groups_restrict_the_socket_mode() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("jerry.sock");
        let _listener = bind_unix(&path).expect("bind");
        let gid = getegid().as_raw().to_string();
        grant_group_access(&path, &gid).expect("grant own group");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);
    }

    #[test]
    fn unknown_groups_are_reported() {
        let error = resolve_group("dockplug-no-such-group").expect_err("lookup should fail");
        assert!(matches!(error, ListenerError::UnknownGroup { .. }));
    }
}
