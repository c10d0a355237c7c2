//! `Exited(n) -> Torn`: run once per step, by whichever task observes
//! `completed_tasks` reach `local_task_count`. Exports the container if
//! requested, tears down its rootfs if it was step-local, and releases
//! the external importer's resources.

use std::path::{Path, PathBuf};

use stepcage_model::{Container, JobInfo, NodeConfig};
use stepcage_runtime::client;

use crate::error::{Error, Result};

/// Resolves `--container-save`'s target against the job's cwd when it's a
/// relative path.
fn resolve_save_path(save_path: &str, job: &JobInfo) -> Result<PathBuf> {
    let path = Path::new(save_path);
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let cwd = job.cwd.as_deref().ok_or_else(|| Error::SaveWithoutCwd {
        path: save_path.to_owned(),
    })?;
    Ok(Path::new(cwd).join(path))
}

/// Runs `enroot export -f -o <resolved-path> <name>`. Skipped entirely by
/// the caller when not every task in the step actually started (a task
/// that never ran has nothing worth exporting).
fn export(enroot_binary: &str, job: &JobInfo, container: &Container, save_path: &str, env: &[(String, String)]) -> Result<()> {
    let resolved = resolve_save_path(save_path, job)?;
    let resolved_str = resolved.to_string_lossy().into_owned();
    client::run_wait(
        enroot_binary,
        job.uid,
        job.gid,
        &["export", "-f", "-o", &resolved_str, &container.name],
        env,
    )?;
    Ok(())
}

/// The whole `Torn` sequence. `started_tasks`/`local_task_count` gates
/// whether export runs at all (a step where not every task reached
/// `Started` has nothing coherent to export).
pub fn tear_down(
    enroot_binary: &str,
    node: &NodeConfig,
    job: &JobInfo,
    container: &Container,
    save_path: Option<&str>,
    started_tasks: u32,
    local_task_count: u32,
    env: &[(String, String)],
) -> Result<()> {
    if let Some(path) = save_path {
        if started_tasks == local_task_count {
            export(enroot_binary, job, container, path, env)?;
        } else {
            log::warn!(
                "skipping --container-save for {}: only {started_tasks}/{local_task_count} tasks started",
                container.name
            );
        }
    }

    if container.temporary_rootfs {
        if let Err(e) = client::run_wait(enroot_binary, job.uid, job.gid, &["remove", "-f", &container.name], env) {
            log::warn!("failed to remove step-local container {}: {e}", container.name);
        }
    }

    if let Some(importer_path) = &node.importer_path {
        let importer_path = importer_path.to_string_lossy().into_owned();
        if let Err(e) = stepcage_runtime::importer::release(&importer_path, job.uid, job.gid, env) {
            log::warn!("importer release failed: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(cwd: Option<&str>) -> JobInfo {
        JobInfo {
            uid: 1000,
            gid: 1000,
            jobid: 1,
            stepid: 0,
            local_task_count: 1,
            total_task_count: 1,
            env: vec![],
            cwd: cwd.map(str::to_owned),
            allow_superuser: false,
            argv: Vec::new(),
        }
    }

    #[test]
    fn resolve_save_path_keeps_absolute_paths_as_is() {
        let p = resolve_save_path("/tmp/out.sqsh", &job(None)).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/out.sqsh"));
    }

    #[test]
    fn resolve_save_path_joins_relative_against_cwd() {
        let p = resolve_save_path("out.sqsh", &job(Some("/home/u"))).unwrap();
        assert_eq!(p, PathBuf::from("/home/u/out.sqsh"));
    }

    #[test]
    fn resolve_save_path_fails_without_cwd() {
        assert!(resolve_save_path("out.sqsh", &job(None)).is_err());
    }
}
