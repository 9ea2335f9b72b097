//! Signal delivery to spawned process groups, plus port-owner termination.
//!
//! Every supervised process is spawned as the leader of its own process
//! group, so signalling `-pid` reaches the tool and anything it forked.

#![allow(unsafe_code)]

use std::io;

use tokio::process::Command;
use tracing::{debug, warn};

/// Signal to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn to_pid_t(pid: u32) -> io::Result<libc::pid_t> {
    pid.try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))
}

#[cfg(unix)]
fn raw_signal(signal: Signal) -> libc::c_int {
    match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    }
}

/// Signal the whole process group led by `pid`, falling back to the single
/// process when the group kill is refused. A vanished target is not an error.
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let pid_t = to_pid_t(pid)?;
    let sig = raw_signal(signal);

    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group.
    let result = unsafe { libc::kill(-pid_t, sig) };
    if result == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) | Some(libc::EPERM) => {
            debug!(pid, error = %err, "Group signal refused, signalling process");
            // SAFETY: as above, for the single process.
            let result = unsafe { libc::kill(pid_t, sig) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ESRCH) => Ok(()),
                _ => Err(err),
            }
        }
        _ => Err(err),
    }
}

/// Signal a single process
#[cfg(unix)]
pub(crate) fn signal_process(pid: u32, signal: Signal) -> io::Result<()> {
    let pid_t = to_pid_t(pid)?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid_t, raw_signal(signal)) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_process(pid: u32, signal: Signal) -> io::Result<()> {
    signal_group(pid, signal)
}

#[cfg(not(unix))]
pub(crate) fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T"]);
    if signal == Signal::Kill {
        cmd.arg("/F");
    }
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {}", status)))
    }
}

/// Whether a process with this pid still exists
#[cfg(unix)]
pub(crate) fn is_alive(pid: u32) -> bool {
    let Ok(pid_t) = to_pid_t(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence and permission check.
    let result = unsafe { libc::kill(pid_t, 0) };
    if result == 0 {
        return true;
    }
    matches!(io::Error::last_os_error().raw_os_error(), Some(libc::EPERM))
}

#[cfg(not(unix))]
pub(crate) fn is_alive(_pid: u32) -> bool {
    true
}

/// Terminate whatever is listening on `port`.
///
/// Uses `fuser` where available and falls back to `lsof` + SIGTERM.
pub(crate) async fn kill_port(port: u16) -> io::Result<()> {
    let target = format!("{}/tcp", port);
    match Command::new("fuser")
        .args(["-k", "-TERM", &target])
        .output()
        .await
    {
        Ok(output) => {
            debug!(port, code = ?output.status.code(), "fuser finished");
            return Ok(());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(port, "fuser unavailable, trying lsof");
        }
        Err(e) => return Err(e),
    }

    let output = Command::new("lsof")
        .args(["-t", "-i", &format!("tcp:{}", port)])
        .output()
        .await?;
    let pids = parse_pid_list(&String::from_utf8_lossy(&output.stdout));
    for pid in pids {
        if let Err(e) = signal_process(pid, Signal::Term) {
            warn!(port, pid, error = %e, "Failed to terminate port owner");
        }
    }
    Ok(())
}

pub(crate) fn parse_pid_list(text: &str) -> Vec<u32> {
    text.split_whitespace()
        .filter_map(|tok| tok.parse::<u32>().ok())
        .collect()
}
