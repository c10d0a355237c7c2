//! Writes the temporary helper configuration script: bind mounts, the
//! optional entrypoint-replacing hook, and host environment pass-through.

use std::io::Write;
use std::path::PathBuf;

use stepcage_model::MountEntry;

use crate::error::Result;

/// Emits a fresh `/tmp/.enroot_config_XXXXXX` script and returns its path.
/// The caller is responsible for unlinking it once the helper has exited.
pub fn emit(mounts: &[MountEntry], disable_entrypoint: bool, env_vars: &[String]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(".enroot_config_")
        .rand_bytes(6)
        .tempfile_in("/tmp")?;

    if !mounts.is_empty() {
        writeln!(file, "mounts() {{")?;
        for m in mounts {
            writeln!(file, "    echo \"{}\"", m.config_line())?;
        }
        writeln!(file, "}}")?;
        writeln!(file)?;
    }

    if disable_entrypoint {
        writeln!(file, "hooks() {{")?;
        writeln!(file, "    echo 'exec \"$@\"' > \"${{ENROOT_ROOTFS}}/etc/rc.local\"")?;
        writeln!(file, "    chmod +x \"${{ENROOT_ROOTFS}}/etc/rc.local\"")?;
        writeln!(file, "}}")?;
        writeln!(file)?;
    }

    if !env_vars.is_empty() {
        writeln!(file, "environ() {{")?;
        for k in env_vars {
            writeln!(file, "    echo \"{k}=${k}\"")?;
        }
        writeln!(file, "}}")?;
    }

    file.flush()?;
    // Keep the file around after the handle is dropped; the caller owns its
    // removal once the helper has consumed it.
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_mounts_block() {
        let mounts = vec![MountEntry::parse("/data:/data").unwrap()];
        let path = emit(&mounts, false, &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("mounts() {"));
        assert!(contents.contains("echo \"/data /data x-create=auto,rbind\""));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn emits_hooks_block_only_when_entrypoint_disabled() {
        let path = emit(&[], true, &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hooks() {"));
        assert!(contents.contains("rc.local"));
        std::fs::remove_file(&path).ok();

        let path = emit(&[], false, &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("hooks() {"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn emits_environ_block_per_requested_var() {
        let path = emit(&[], false, &["FOO".to_owned(), "BAR".to_owned()]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("echo \"FOO=$FOO\""));
        assert!(contents.contains("echo \"BAR=$BAR\""));
        std::fs::remove_file(&path).ok();
    }
}
