//! Content-addressed local rootfs cache used when a step requests
//! `--container-cache`: deterministic key derivation, per-uid on-disk
//! layout with a per-rootfs shared/exclusive flock protocol, and a
//! watermark-gated LRU collector run before creating a new entry.

pub mod error;
pub mod gc;
pub mod key;
pub mod layout;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};

/// A resolved cache entry: where its rootfs lives, the container name
/// derived from its key, and whether it already existed (a hit) or still
/// needs to be created.
pub struct CacheEntry {
    pub container_name: String,
    pub rootfs_dir: PathBuf,
    pub is_hit: bool,
}

/// Resolves the cache entry for `image`/`uid` under `data_root`, running
/// the garbage collector first if this would be a miss (a new rootfs is
/// about to be created). Does not create the rootfs directory itself —
/// that's the importer's job; this only decides where it goes and whether
/// it's already there.
pub fn resolve(
    data_root: &Path,
    image: &str,
    uid: u32,
    gid: u32,
    gc_high: u8,
    gc_low: u8,
) -> Result<CacheEntry> {
    let basename = key::cache_basename(image, uid);
    let container_name = format!("pyxis_{}", basename);

    layout::per_uid_dir(data_root, uid, gid)?;
    let rootfs_dir = layout::rootfs_dir(data_root, uid, &container_name);
    let is_hit = rootfs_dir.exists();

    if !is_hit {
        let _ = gc::maybe_collect(data_root, gc_high, gc_low);
    }

    Ok(CacheEntry {
        container_name,
        rootfs_dir,
        is_hit,
    })
}
