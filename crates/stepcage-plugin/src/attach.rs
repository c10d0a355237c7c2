//! `Created/Started -> Attached(n)`: performed once per task, right after
//! the shared region's mutex is released by whichever task ran
//! [`crate::creation::create_and_start`]. Joins the container's
//! namespaces, chdirs into its working directory, and drops identity
//! privileges the task never legitimately had outside the namespace.

use std::path::Path;

use nix::sched::{setns, CloneFlags};
use nix::unistd;

use stepcage_model::Container;

use crate::error::Result;

/// Captures the namespace and cwd fds this task will join, filling in
/// `container.{userns,mntns,cgroupns,cwd}_fd`.
///
/// Namespaces always come from `ns_pid` (the container's namespace
/// holder). `cwd` is taken from `helper_pid` when this task started a
/// fresh helper; when reusing another container's namespaces there is no
/// live helper for this step, so `ns_pid` doubles as the cwd source too.
pub fn capture_fds(container: &mut Container, helper_pid: i32, ns_pid: i32) -> Result<()> {
    let captured = stepcage_shared::capture_namespaces(ns_pid)?;
    container.userns_fd = Some(captured.user);
    container.mntns_fd = Some(captured.mnt);
    container.cgroupns_fd = captured.cgroup;

    let cwd_source = if helper_pid > 0 { helper_pid } else { ns_pid };
    container.cwd_fd = Some(stepcage_shared::capture_cwd(cwd_source)?);
    Ok(())
}

/// Joins the namespaces captured by [`capture_fds`], chdirs into the
/// requested workdir (or the captured cwd fd if none was requested), and
/// installs the privileged-identity stub filter unless the job opted
/// into running as a genuine superuser.
pub fn attach(container: &Container, workdir: Option<&str>, privileged: bool) -> Result<()> {
    if !privileged {
        let userns_fd = container.userns_fd.expect("capture_fds runs before attach");
        setns(userns_fd, CloneFlags::CLONE_NEWUSER).map_err(stepcage_runtime::Error::from)?;
    }

    if let Some(cgroupns_fd) = container.cgroupns_fd {
        setns(cgroupns_fd, CloneFlags::CLONE_NEWCGROUP).map_err(stepcage_runtime::Error::from)?;
    }

    let mntns_fd = container.mntns_fd.expect("capture_fds runs before attach");
    setns(mntns_fd, CloneFlags::CLONE_NEWNS).map_err(stepcage_runtime::Error::from)?;

    match workdir {
        Some(dir) => unistd::chdir(Path::new(dir)).map_err(stepcage_runtime::Error::from)?,
        None => {
            let cwd_fd = container.cwd_fd.expect("capture_fds runs before attach");
            unistd::fchdir(cwd_fd).map_err(stepcage_runtime::Error::from)?;
        }
    }

    if !privileged {
        crate::seccomp::install()?;
    }

    Ok(())
}

/// Closes the fds captured for this task once it has attached; each task
/// owns its own copies (`fcntl::open` was called per-task, not shared),
/// so this is safe to call right after [`attach`] regardless of what
/// other tasks are doing.
pub fn close_fds(container: &mut Container) {
    if let Some(fd) = container.userns_fd.take() {
        stepcage_shared::close_best_effort(fd);
    }
    if let Some(fd) = container.mntns_fd.take() {
        stepcage_shared::close_best_effort(fd);
    }
    if let Some(fd) = container.cgroupns_fd.take() {
        stepcage_shared::close_best_effort(fd);
    }
    if let Some(fd) = container.cwd_fd.take() {
        stepcage_shared::close_best_effort(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_fds_uses_ns_pid_as_cwd_fallback_when_no_helper() {
        let mut container = Container::new("pyxis_test".into());
        let pid = unsafe { libc::getpid() };
        capture_fds(&mut container, -1, pid).unwrap();
        assert!(container.userns_fd.is_some());
        assert!(container.mntns_fd.is_some());
        assert!(container.cwd_fd.is_some());
        close_fds(&mut container);
    }

    #[test]
    fn capture_fds_prefers_helper_pid_for_cwd_when_present() {
        let mut container = Container::new("pyxis_test".into());
        let pid = unsafe { libc::getpid() };
        capture_fds(&mut container, pid, pid).unwrap();
        assert!(container.cwd_fd.is_some());
        close_fds(&mut container);
    }
}
