//! Capturing namespace and working-directory file descriptors off a
//! running process, for later reuse by a sibling task that wants to join
//! the same container instead of creating its own.
//!
//! `cgroup` namespaces are younger than the other two this plugin cares
//! about and may not exist on an older kernel; that entry is the only one
//! allowed to be absent.

use std::os::unix::io::RawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::error::Result;

/// File descriptors captured from a container's namespace-holding process,
/// each opened `O_CLOEXEC` so they don't leak across an `execvp`.
pub struct CapturedNamespaces {
    pub user: RawFd,
    pub mnt: RawFd,
    pub cgroup: Option<RawFd>,
}

fn open_ns_fd(pid: libc::pid_t, kind: &str) -> Result<Option<RawFd>> {
    let path = format!("/proc/{}/ns/{}", pid, kind);
    match fcntl::open(path.as_str(), OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
        Ok(fd) => Ok(Some(fd)),
        Err(nix::Error::ENOENT) if kind == "cgroup" => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Opens the `user`, `mnt`, and (if present) `cgroup` namespace fds of
/// `pid`.
pub fn capture_namespaces(pid: libc::pid_t) -> Result<CapturedNamespaces> {
    let user = open_ns_fd(pid, "user")?.expect("user namespace always exists");
    let mnt = open_ns_fd(pid, "mnt")?.expect("mnt namespace always exists");
    let cgroup = open_ns_fd(pid, "cgroup")?;
    Ok(CapturedNamespaces { user, mnt, cgroup })
}

/// Opens the working directory of `pid` as a fd, so a later task can
/// `fchdir` into the same directory without knowing its path.
pub fn capture_cwd(pid: libc::pid_t) -> Result<RawFd> {
    let path = format!("/proc/{}/cwd", pid);
    let fd = fcntl::open(path.as_str(), OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())?;
    Ok(fd)
}

/// Closes a captured fd, ignoring errors (best-effort teardown).
pub fn close_best_effort(fd: RawFd) {
    let _ = unistd::close(fd);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_own_namespaces() {
        let pid = unsafe { libc::getpid() };
        let ns = capture_namespaces(pid).unwrap();
        assert!(ns.user >= 0);
        assert!(ns.mnt >= 0);
        close_best_effort(ns.user);
        close_best_effort(ns.mnt);
        if let Some(fd) = ns.cgroup {
            close_best_effort(fd);
        }
    }

    #[test]
    fn captures_own_cwd() {
        let pid = unsafe { libc::getpid() };
        let fd = capture_cwd(pid).unwrap();
        assert!(fd >= 0);
        close_best_effort(fd);
    }

    #[test]
    fn missing_pid_is_an_error() {
        let bogus = 999_999_999;
        assert!(capture_namespaces(bogus).is_err());
    }
}
