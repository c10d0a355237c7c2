use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::node_config::ContainerScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMethod {
    EnrootImport,
    EnrootLoad,
    Importer,
}

/// Builds the container name for a *named* container (outlives the step
/// within its scope), uniformly `pyxis_`-prefixed.
pub fn named_container_name(scope: ContainerScope, jobid: u32, name: &str) -> String {
    match scope {
        ContainerScope::Job => format!("pyxis_{jobid}_{name}"),
        ContainerScope::Global => format!("pyxis_{name}"),
    }
}

/// Builds the container name for an *unnamed*, step-local container
/// (removed on `task_exit`).
pub fn unnamed_container_name(scope: ContainerScope, jobid: u32, stepid: u32) -> String {
    match scope {
        ContainerScope::Job => format!("pyxis_{jobid}_{jobid}.{stepid}"),
        ContainerScope::Global => format!("pyxis_{jobid}.{stepid}"),
    }
}

/// Builds the container name for a cache-derived rootfs; scope is always
/// forced to global for these, per the cache's data model.
pub fn cache_container_name(basename: &str) -> String {
    format!("pyxis_{basename}")
}

/// Parses a container name produced by [`named_container_name`] under job
/// scope back into its job id, for the epilog sweeper's matching rule:
/// the name must match `^pyxis_<jobid>_` exactly, with no trailing garbage
/// left unaccounted for beyond the free-form suffix.
pub fn job_scoped_container_jobid(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("pyxis_")?;
    let (digits, remainder) = rest.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if remainder.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// The orchestrator's in-memory view of the container it is managing for
/// this step. Constructed at `Configured`, filled in across `Imported` /
/// `Created` / `Started`, torn down at `Torn`.
#[derive(Debug)]
pub struct Container {
    pub name: String,
    pub squashfs_path: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
    pub reuse_rootfs: bool,
    pub reuse_ns: bool,
    /// When `reuse_ns` is set, the pid whose `/proc/<pid>/ns/*` is the
    /// source of truth — a pid discovered via the registry lookup at
    /// `Configured`, distinct from the fresh helper child's pid.
    pub reuse_ns_source_pid: Option<u32>,
    pub temporary_rootfs: bool,
    pub cache_mode: bool,
    pub cache_data_root: Option<PathBuf>,
    pub cache_data_path: Option<PathBuf>,
    /// Held for the whole step lifetime while `cache_mode` is set.
    pub cache_lock_fd: Option<RawFd>,
    pub import_method: Option<ImportMethod>,
    pub userns_fd: Option<RawFd>,
    pub mntns_fd: Option<RawFd>,
    pub cgroupns_fd: Option<RawFd>,
    pub cwd_fd: Option<RawFd>,
}

impl Container {
    pub fn new(name: String) -> Self {
        Container {
            name,
            squashfs_path: None,
            save_path: None,
            reuse_rootfs: false,
            reuse_ns: false,
            reuse_ns_source_pid: None,
            temporary_rootfs: true,
            cache_mode: false,
            cache_data_root: None,
            cache_data_path: None,
            cache_lock_fd: None,
            import_method: None,
            userns_fd: None,
            mntns_fd: None,
            cgroupns_fd: None,
            cwd_fd: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_containers_use_job_or_global_prefix() {
        assert_eq!(
            named_container_name(ContainerScope::Job, 123, "foo"),
            "pyxis_123_foo"
        );
        assert_eq!(
            named_container_name(ContainerScope::Global, 123, "foo"),
            "pyxis_foo"
        );
    }

    #[test]
    fn unnamed_containers_embed_job_and_step() {
        assert_eq!(
            unnamed_container_name(ContainerScope::Job, 123, 0),
            "pyxis_123_123.0"
        );
        assert_eq!(
            unnamed_container_name(ContainerScope::Global, 123, 0),
            "pyxis_123.0"
        );
    }

    #[test]
    fn cache_name_is_global_and_pyxis_prefixed() {
        assert_eq!(cache_container_name("cache_u0_deadbeef"), "pyxis_cache_u0_deadbeef");
    }

    #[test]
    fn job_scoped_jobid_parses_exactly() {
        assert_eq!(job_scoped_container_jobid("pyxis_123_foo"), Some(123));
        assert_eq!(job_scoped_container_jobid("pyxis_123_123.0"), Some(123));
        assert_eq!(job_scoped_container_jobid("pyxis_foo"), None);
        assert_eq!(job_scoped_container_jobid("pyxis_123"), None);
        assert_eq!(job_scoped_container_jobid("notpyxis_123_foo"), None);
    }
}
