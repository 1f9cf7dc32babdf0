//! systemd socket activation.
//!
//! systemd passes listening sockets as descriptors starting at 3 and
//! describes them through `LISTEN_PID` and `LISTEN_FDS`. The variables only
//! apply when `LISTEN_PID` names this process.

use std::env;
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixListener;

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use tracing::info;

use super::{LISTENER_TARGET, ListenerError};

const LISTEN_FDS_START: RawFd = 3;

/// Returns the listener systemd passed to this process, if any.
///
/// # Errors
///
/// Fails when the environment is malformed, when more than one socket was
/// passed, or when the descriptor cannot be marked close-on-exec.
pub(super) fn inherited_listener() -> Result<Option<UnixListener>, ListenerError> {
    let listen_pid = env::var("LISTEN_PID").ok();
    let listen_fds = env::var("LISTEN_FDS").ok();
    let count = activation_count(
        listen_pid.as_deref(),
        listen_fds.as_deref(),
        std::process::id(),
    )?;
    match count {
        0 => Ok(None),
        1 => adopt(LISTEN_FDS_START).map(Some),
        count => Err(ListenerError::TooManyActivationSockets { count }),
    }
}

/// Counts descriptors passed to the process with id `current_pid`.
pub(super) fn activation_count(
    listen_pid: Option<&str>,
    listen_fds: Option<&str>,
    current_pid: u32,
) -> Result<usize, ListenerError> {
    let Some(listen_pid) = listen_pid else {
        return Ok(0);
    };
    let pid = listen_pid
        .trim()
        .parse::<u32>()
        .map_err(|_| ListenerError::ActivationEnvironment {
            reason: format!("LISTEN_PID '{listen_pid}' is not a process id"),
        })?;
    if pid != current_pid {
        return Ok(0);
    }
    let Some(listen_fds) = listen_fds else {
        return Ok(0);
    };
    listen_fds
        .trim()
        .parse::<usize>()
        .map_err(|_| ListenerError::ActivationEnvironment {
            reason: format!("LISTEN_FDS '{listen_fds}' is not a descriptor count"),
        })
}

fn adopt(fd: RawFd) -> Result<UnixListener, ListenerError> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|errno| {
        ListenerError::Activation {
            fd,
            source: io::Error::from(errno),
        }
    })?;
    // SAFETY: LISTEN_PID names this process, so systemd handed descriptor 3
    // to us as an open listening socket that nothing else owns.
    let listener = unsafe { UnixListener::from_raw_fd(fd) };
    info!(target: LISTENER_TARGET, fd, "adopted socket from systemd");
    Ok(listener)
}
