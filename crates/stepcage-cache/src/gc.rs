//! Watermark-gated LRU eviction of cached rootfs directories. Runs only
//! when a step is about to create a new cached rootfs (never on a hit),
//! and only if the data root's filesystem is already above `gc_high`
//! percent used; it then deletes least-recently-used, lock-free rootfs
//! directories until usage drops below `gc_low`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::sys::statvfs::statvfs;

use crate::error::Result;
use crate::layout::{self, GC_LOCK_FILE_NAME};

fn used_percent(root: &Path) -> Result<f64> {
    let stats = statvfs(root)?;
    let total = stats.blocks() as f64;
    if total == 0.0 {
        return Ok(0.0);
    }
    let free = stats.blocks_available() as f64;
    Ok((total - free) / total * 100.0)
}

fn candidate_dirs(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let per_uid_entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    for uid_entry in per_uid_entries.flatten() {
        let uid_dir = uid_entry.path();
        if !uid_dir.is_dir() {
            continue;
        }
        let rootfs_entries = match fs::read_dir(&uid_dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in rootfs_entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() && name.starts_with("pyxis_cache_") {
                out.push(path);
            }
        }
    }
    out
}

fn mtime_of(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Runs garbage collection against `root` if, and only if, the filesystem
/// is currently at or above `gc_high` percent used. Stops evicting once
/// usage drops below `gc_low`. Returns the list of directories it removed.
pub fn maybe_collect(root: &Path, gc_high: u8, gc_low: u8) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let gc_lock_path = root.join(GC_LOCK_FILE_NAME);
    let guard = match layout::try_lock_exclusive(&gc_lock_path)? {
        Some(fd) => fd,
        None => return Ok(removed),
    };

    let result = (|| -> Result<Vec<PathBuf>> {
        if used_percent(root)? < gc_high as f64 {
            return Ok(removed.clone());
        }

        let mut dirs = candidate_dirs(root);
        dirs.sort_by_key(|p| mtime_of(p));

        for dir in dirs {
            if used_percent(root)? < gc_low as f64 {
                break;
            }
            let lock_path = layout::lock_path(&dir);
            match layout::try_lock_exclusive(&lock_path) {
                Ok(Some(lock_fd)) => {
                    let _ = fs::remove_dir_all(&dir);
                    layout::unlock_and_close(lock_fd);
                    removed.push(dir);
                }
                Ok(None) => continue,
                Err(_) => continue,
            }
        }

        Ok(removed)
    })();

    layout::unlock_and_close(guard);
    result
}
