//! `SLURM_*` -> PyTorch rank convention remap, triggered whenever the task
//! environment has `PYTORCH_VERSION` set (PyTorch images set this; it is
//! not itself one of the variables this module touches).

const REMAPS: &[(&str, &str)] = &[
    ("SLURM_PROCID", "RANK"),
    ("SLURM_LOCALID", "LOCAL_RANK"),
];

const TRIGGER_VAR: &str = "PYTORCH_VERSION";

/// Applies the remap to the current process's environment when
/// `PYTORCH_VERSION` is present in `job_env`. Each mapped target is set
/// unconditionally from its source; a missing source just skips that one
/// mapping rather than failing the task.
pub fn apply(job_env: &[(String, String)]) {
    if !job_env.iter().any(|(k, _)| k == TRIGGER_VAR) {
        return;
    }

    for (src, dst) in REMAPS {
        if let Some((_, v)) = job_env.iter().find(|(k, _)| k == src) {
            std::env::set_var(dst, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_targets() {
        for (_, dst) in REMAPS {
            std::env::remove_var(dst);
        }
    }

    #[test]
    fn does_nothing_without_pytorch_version_set() {
        clear_targets();
        let job_env = vec![("SLURM_PROCID".to_owned(), "3".to_owned())];
        apply(&job_env);
        assert!(std::env::var_os("RANK").is_none());
    }

    #[test]
    fn remaps_when_pytorch_version_present() {
        clear_targets();
        let job_env = vec![
            (TRIGGER_VAR.to_owned(), "2.1.0".to_owned()),
            ("SLURM_PROCID".to_owned(), "3".to_owned()),
            ("SLURM_LOCALID".to_owned(), "1".to_owned()),
        ];
        apply(&job_env);
        assert_eq!(std::env::var("RANK").unwrap(), "3");
        assert_eq!(std::env::var("LOCAL_RANK").unwrap(), "1");
        clear_targets();
    }

    #[test]
    fn overwrites_an_existing_target() {
        clear_targets();
        std::env::set_var("RANK", "preset");
        let job_env = vec![
            (TRIGGER_VAR.to_owned(), "2.1.0".to_owned()),
            ("SLURM_PROCID".to_owned(), "3".to_owned()),
        ];
        apply(&job_env);
        assert_eq!(std::env::var("RANK").unwrap(), "3");
        clear_targets();
    }

    #[test]
    fn missing_source_skips_that_mapping_without_failing() {
        clear_targets();
        let job_env = vec![(TRIGGER_VAR.to_owned(), "2.1.0".to_owned())];
        apply(&job_env);
        assert!(std::env::var_os("RANK").is_none());
        assert!(std::env::var_os("LOCAL_RANK").is_none());
    }
}
