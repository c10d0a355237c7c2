/// The sentinel stepid used for the batch-script step (the step that runs
/// the submitted script itself, rather than a user `srun` task).
pub const BATCH_SCRIPT_STEPID: u32 = u32::MAX;

/// Facts about the running job/step that the scheduler hands the plugin;
/// none of this is mutated by the plugin, only captured once at `user_init`.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub uid: u32,
    pub gid: u32,
    pub jobid: u32,
    pub stepid: u32,
    pub local_task_count: u32,
    pub total_task_count: u32,
    /// Deep copy of the job's environment at capture time: the scheduler
    /// may invalidate its own pointer to this data after the call returns,
    /// so the plugin never holds a borrowed view of it.
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    pub allow_superuser: bool,
    /// The step's argv, as seen by the step manager. Only `argv[0]` is
    /// used (the node-local path to the submitted batch script, for the
    /// sbatch bind-mount rule), but the whole vector is kept for fidelity.
    pub argv: Vec<String>,
}

impl JobInfo {
    /// True iff uid 0 *and* the job explicitly opted in via
    /// `ENROOT_ALLOW_SUPERUSER`; a plain root uid alone is not enough.
    pub fn privileged(&self) -> bool {
        self.uid == 0 && self.allow_superuser
    }

    pub fn is_batch_script(&self) -> bool {
        self.stepid == BATCH_SCRIPT_STEPID
    }

    pub fn env_get(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The node-local path to the submitted batch script, when this is the
    /// batch-script step and an argv was captured.
    pub fn script_path(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobInfo {
        JobInfo {
            uid: 0,
            gid: 0,
            jobid: 123,
            stepid: 0,
            local_task_count: 2,
            total_task_count: 4,
            env: vec![("FOO".into(), "bar".into())],
            cwd: Some("/home/u".into()),
            allow_superuser: false,
            argv: Vec::new(),
        }
    }

    #[test]
    fn privileged_requires_both_root_and_opt_in() {
        let mut j = sample();
        assert!(!j.privileged());
        j.allow_superuser = true;
        assert!(j.privileged());
        j.uid = 1000;
        assert!(!j.privileged());
    }

    #[test]
    fn batch_script_sentinel_detected() {
        let mut j = sample();
        assert!(!j.is_batch_script());
        j.stepid = BATCH_SCRIPT_STEPID;
        assert!(j.is_batch_script());
    }

    #[test]
    fn env_get_looks_up_by_key() {
        let j = sample();
        assert_eq!(j.env_get("FOO"), Some("bar"));
        assert_eq!(j.env_get("MISSING"), None);
    }
}
