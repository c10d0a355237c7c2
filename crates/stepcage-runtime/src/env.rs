//! Translates the plugin's own options into the environment variables the
//! runtime helper reads, and strips anything from the inherited job
//! environment that should never reach the helper's fork.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;

use stepcage_model::{NodeConfig, StepRequest};

static DENY_LIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "PATH",
        "LD_LIBRARY_PATH",
        "LD_PRELOAD",
        "SLURM_PROCID",
        "SLURM_LOCALID",
        "SLURM_TASK_PID",
        "PMIX_RANK",
        "PMI_FD",
        "ENROOT_LIBRARY_PATH",
        "ENROOT_SYSCONF_PATH",
        "ENROOT_RUNTIME_PATH",
        "ENROOT_CACHE_PATH",
        "ENROOT_DATA_PATH",
        "ENROOT_TEMP_PATH",
        "ENROOT_ZSTD_OPTIONS",
        "ENROOT_TRANSFER_RETRIES",
        "ENROOT_CONNECT_TIMEOUT",
        "ENROOT_MAX_CONNECTIONS",
        "ENROOT_ALLOW_HTTP",
    ]
    .into_iter()
    .collect()
});

pub const PYXIS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the full set of environment variables the helper child should run
/// with: `PATH` plus whatever of the job's environment survives the
/// deny-list, plus the helper-facing knobs derived from the step's typed
/// options. Returned in a stable order for testability.
pub fn build_helper_env(
    job_env: &[(String, String)],
    job_path: Option<&str>,
    req: &StepRequest,
    node: &NodeConfig,
    cache_data_path: Option<&Path>,
) -> Vec<(String, String)> {
    let mut out = Vec::new();

    if let Some(path) = job_path {
        out.push(("PATH".to_owned(), path.to_owned()));
    }

    for (k, v) in job_env {
        if !DENY_LIST.contains(k.as_str()) {
            out.push((k.clone(), v.clone()));
        }
    }

    if let Some(yn) = req.mount_home.as_yn() {
        out.push(("ENROOT_MOUNT_HOME".to_owned(), yn.to_owned()));
    }
    if let Some(yn) = req.remap_root.as_yn() {
        out.push(("ENROOT_REMAP_ROOT".to_owned(), yn.to_owned()));
    }
    if let Some(yn) = req.writable.as_yn() {
        out.push(("ENROOT_ROOTFS_WRITABLE".to_owned(), yn.to_owned()));
    }

    if let Some(cache_path) = cache_data_path {
        out.push((
            "ENROOT_DATA_PATH".to_owned(),
            cache_path.to_string_lossy().into_owned(),
        ));
    }

    out.push((
        "PYXIS_RUNTIME_PATH".to_owned(),
        node.runtime_path.to_string_lossy().into_owned(),
    ));
    out.push(("PYXIS_VERSION".to_owned(), PYXIS_VERSION.to_owned()));

    out
}

/// Applies a built environment to the current process: clears everything
/// but `PATH` first (the helper runner's contract), matching step 1 of the
/// sanitiser's recipe, then sets every entry `build_helper_env` produced
/// (which already includes `PATH` when the caller supplied one).
///
/// Must only be called in a helper child between fork and exec.
pub fn apply_env(entries: &[(String, String)]) {
    for (k, _) in std::env::vars() {
        if k != "PATH" {
            std::env::remove_var(k);
        }
    }
    for (k, v) in entries {
        std::env::set_var(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcage_model::Ternary;

    fn req() -> StepRequest {
        StepRequest::default()
    }

    fn node() -> NodeConfig {
        NodeConfig::default()
    }

    #[test]
    fn deny_list_strips_unsafe_vars() {
        let env = vec![
            ("PATH".to_owned(), "/evil".to_owned()),
            ("LD_PRELOAD".to_owned(), "/evil.so".to_owned()),
            ("MY_VAR".to_owned(), "keep".to_owned()),
        ];
        let built = build_helper_env(&env, Some("/usr/bin:/bin"), &req(), &node(), None);
        assert!(built.iter().any(|(k, v)| k == "PATH" && v == "/usr/bin:/bin"));
        assert!(!built.iter().any(|(k, _)| k == "LD_PRELOAD"));
        assert!(built.iter().any(|(k, v)| k == "MY_VAR" && v == "keep"));
    }

    #[test]
    fn unset_ternary_options_are_not_exported() {
        let built = build_helper_env(&[], None, &req(), &node(), None);
        assert!(!built.iter().any(|(k, _)| k == "ENROOT_MOUNT_HOME"));
        assert!(!built.iter().any(|(k, _)| k == "ENROOT_REMAP_ROOT"));
        assert!(!built.iter().any(|(k, _)| k == "ENROOT_ROOTFS_WRITABLE"));
    }

    #[test]
    fn explicit_ternary_options_map_to_yn() {
        let mut r = req();
        r.mount_home = Ternary::True;
        r.remap_root = Ternary::False;
        let built = build_helper_env(&[], None, &r, &node(), None);
        assert!(built.contains(&("ENROOT_MOUNT_HOME".to_owned(), "y".to_owned())));
        assert!(built.contains(&("ENROOT_REMAP_ROOT".to_owned(), "n".to_owned())));
    }

    #[test]
    fn cache_mode_sets_data_path() {
        let built = build_helper_env(&[], None, &req(), &node(), Some(Path::new("/cache/0")));
        assert!(built.contains(&("ENROOT_DATA_PATH".to_owned(), "/cache/0".to_owned())));
    }

    #[test]
    fn always_exports_runtime_path_and_version() {
        let built = build_helper_env(&[], None, &req(), &node(), None);
        assert!(built.iter().any(|(k, _)| k == "PYXIS_RUNTIME_PATH"));
        assert!(built.iter().any(|(k, _)| k == "PYXIS_VERSION"));
    }
}
