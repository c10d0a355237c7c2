//! The per-uid scratch directory under the runtime root, created at
//! `post_opt` and used to hold temporary import squashfs files.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::unistd::{self, Gid, Uid};

use crate::error::Result;

pub fn ensure_uid_scratch_dir(runtime_path: &Path, uid: u32, gid: u32) -> Result<PathBuf> {
    let dir = runtime_path.join(uid.to_string());
    if !dir.exists() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)?;
        unistd::chown(&dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(stepcage_runtime::Error::from)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_scratch_dir_with_expected_mode() {
        use std::os::unix::fs::PermissionsExt;
        let root = tempdir().unwrap();
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        let dir = ensure_uid_scratch_dir(root.path(), uid, gid).unwrap();
        let meta = fs::metadata(&dir).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }
}
