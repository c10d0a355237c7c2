//! Cache key derivation: a 64-bit FNV-1a hash of the image reference, plus
//! an mtime/size suffix when the image is a stat-able local path. Two
//! identical inputs must always hash to the same basename, on any node —
//! nothing time-of-day or host-specific is allowed to leak in.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Computes the cache basename `cache_u<uid>_<16 lowercase hex digits>` for
/// `image`. If `image` names a file that can be `stat`-ed, its mtime and
/// size are folded into the hash so a changed file gets a fresh key.
pub fn cache_basename(image: &str, uid: u32) -> String {
    let mut buf = image.as_bytes().to_vec();
    if let Ok(meta) = Path::new(image).metadata() {
        buf.extend_from_slice(format!("|{}|{}", meta.mtime(), meta.size()).as_bytes());
    }
    let hash = fnv1a(&buf);
    format!("cache_u{}_{:016x}", uid, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_image_same_uid_is_stable() {
        let a = cache_basename("docker://library/ubuntu", 1000);
        let b = cache_basename("docker://library/ubuntu", 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn different_uid_changes_key() {
        let a = cache_basename("docker://library/ubuntu", 1000);
        let b = cache_basename("docker://library/ubuntu", 1001);
        assert_ne!(a, b);
    }

    #[test]
    fn basename_has_expected_shape() {
        let a = cache_basename("docker://library/ubuntu", 1000);
        assert!(a.starts_with("cache_u1000_"));
        assert_eq!(a.len(), "cache_u1000_".len() + 16);
    }

    #[test]
    fn path_like_image_picks_up_stat_suffix() {
        let tmp = tempfile_path();
        std::fs::write(&tmp, b"hello").unwrap();
        let before = cache_basename(tmp.to_str().unwrap(), 1000);
        std::fs::write(&tmp, b"hello world, much longer now").unwrap();
        let after = cache_basename(tmp.to_str().unwrap(), 1000);
        std::fs::remove_file(&tmp).ok();
        assert_ne!(before, after);
    }

    fn tempfile_path() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("stepcage-cache-key-test-{}", unsafe { libc::getpid() }));
        p
    }
}
