//! The one operation this crate needs directly from the node-daemon init
//! hook: creating the runtime root directory before any step can use it.

use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd;

use crate::error::Result;

/// `mkdir`s only the last path component of `path` with mode `0755`,
/// tolerating `EEXIST`. Parent directories are assumed to already exist
/// (the node-daemon's own installation is responsible for those).
pub fn ensure_runtime_dir(path: &Path) -> Result<()> {
    match unistd::mkdir(path, Mode::from_bits_truncate(0o755)) {
        Ok(()) => Ok(()),
        Err(nix::Error::EEXIST) => Ok(()),
        Err(e) => Err(stepcage_runtime::Error::Nix(e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let parent = tempdir().unwrap();
        let target = parent.path().join("pyxis");
        ensure_runtime_dir(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn tolerates_already_existing_directory() {
        let parent = tempdir().unwrap();
        let target = parent.path().join("pyxis");
        ensure_runtime_dir(&target).unwrap();
        ensure_runtime_dir(&target).unwrap();
    }
}
