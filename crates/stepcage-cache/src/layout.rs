//! On-disk layout of the cache data root and the per-rootfs flock
//! protocol: a shared lock held for the life of a step, an exclusive
//! nonblocking lock used by the garbage collector to claim an unused
//! directory before deleting it.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, Gid, Uid};

use crate::error::Result;

pub const LOCK_FILE_NAME: &str = ".pyxis_cache_lock";
pub const GC_LOCK_FILE_NAME: &str = "pyxis-container-cache-gc.lock";

/// `<root>/<uid>`, created with mode 0700 and chowned to `uid:gid` if it
/// didn't already exist.
pub fn per_uid_dir(root: &Path, uid: u32, gid: u32) -> Result<PathBuf> {
    let dir = root.join(uid.to_string());
    if !dir.exists() {
        fs::DirBuilder::new().recursive(true).mode(0o700).create(&dir)?;
        unistd::chown(&dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
    }
    Ok(dir)
}

/// `<per-uid>/<container-name>`, the rootfs directory for a cached
/// container.
pub fn rootfs_dir(root: &Path, uid: u32, container_name: &str) -> PathBuf {
    root.join(uid.to_string()).join(container_name)
}

pub fn lock_path(rootfs_dir: &Path) -> PathBuf {
    rootfs_dir.join(LOCK_FILE_NAME)
}

fn open_lock_file(path: &Path) -> Result<RawFd> {
    let fd = fcntl::open(
        path,
        OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o600),
    )?;
    Ok(fd)
}

/// Acquires a shared (`LOCK_SH`) flock on the rootfs's lock file, intended
/// to be held for the entire step lifetime. Returns the fd the caller must
/// keep alive (and eventually close) to release it.
pub fn lock_shared(rootfs_dir: &Path) -> Result<RawFd> {
    let path = lock_path(rootfs_dir);
    let fd = open_lock_file(&path)?;
    nix::fcntl::flock(fd, nix::fcntl::FlockArg::LockShared)?;
    Ok(fd)
}

/// Tries to acquire an exclusive, nonblocking flock on `path`. `Ok(None)`
/// means it's held by someone else right now — not an error.
pub fn try_lock_exclusive(path: &Path) -> Result<Option<RawFd>> {
    let fd = open_lock_file(path)?;
    match nix::fcntl::flock(fd, nix::fcntl::FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(Some(fd)),
        Err(nix::Error::EWOULDBLOCK) => {
            let _ = unistd::close(fd);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn unlock_and_close(fd: RawFd) {
    let _ = nix::fcntl::flock(fd, nix::fcntl::FlockArg::Unlock);
    let _ = unistd::close(fd);
}

/// Sets the rootfs directory's mtime (and atime) to now, best-effort. A
/// `NULL` times argument to `utimensat` means "now" per POSIX.
pub fn touch(rootfs_dir: &Path) {
    use std::ffi::CString;
    let path = match CString::new(rootfs_dir.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => return,
    };
    unsafe {
        libc::utimensat(libc::AT_FDCWD, path.as_ptr(), std::ptr::null(), 0);
    }
}
