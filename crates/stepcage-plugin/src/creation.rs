//! `Configured -> Imported -> Created -> Started`, performed exactly once
//! per step by the task that observes `init_tasks == 1` while holding the
//! shared region's mutex.

use std::path::PathBuf;

use stepcage_model::{JobInfo, NodeConfig, StepRequest};
use stepcage_runtime::{client, config_emitter, importer};

use crate::error::{Error, Result};

/// Resolves the URI the helper/importer should see: verbatim when already
/// `docker://`/`dockerd://`-prefixed, otherwise prefixed with `docker://`.
fn resolve_uri(image: &str) -> String {
    if image.starts_with("docker://") || image.starts_with("dockerd://") {
        image.to_owned()
    } else {
        format!("docker://{image}")
    }
}

fn squashfs_scratch_path(runtime_path: &std::path::Path, uid: u32, jobid: u32, stepid: u32) -> PathBuf {
    runtime_path
        .join(uid.to_string())
        .join(format!("{jobid}.{stepid}.squashfs"))
}

/// Imports (or loads) the rootfs and creates the named container, using
/// whichever method the node config selects. Always unlinks any temporary
/// squashfs this step produced, on every return path.
fn import_and_create(
    enroot_binary: &str,
    node: &NodeConfig,
    job: &JobInfo,
    name: &str,
    image: &str,
    env: &[(String, String)],
) -> Result<()> {
    let uri = resolve_uri(image);

    if let Some(importer_path) = &node.importer_path {
        let importer_path = importer_path.to_string_lossy().into_owned();
        let squashfs = importer::get(&importer_path, job.uid, job.gid, env, &uri)?;
        let result = client::run_wait(enroot_binary, job.uid, job.gid, &["create", "--name", name, &squashfs], env);
        let _ = std::fs::remove_file(&squashfs);
        return result.map_err(Error::from);
    }

    if node.use_enroot_load && !uri.starts_with("dockerd://") {
        client::run_wait(enroot_binary, job.uid, job.gid, &["load", "--name", name, &uri], env)?;
        return Ok(());
    }

    let squashfs = squashfs_scratch_path(&node.runtime_path, job.uid, job.jobid, job.stepid);
    let squashfs_str = squashfs.to_string_lossy().into_owned();
    let import_result = client::run_wait(
        enroot_binary,
        job.uid,
        job.gid,
        &["import", "--output", &squashfs_str, &uri],
        env,
    );
    let import_result = import_result.and_then(|()| {
        client::run_wait(enroot_binary, job.uid, job.gid, &["create", "--name", name, &squashfs_str], env)
    });
    let _ = std::fs::remove_file(&squashfs);
    import_result.map_err(Error::from)
}

/// Emits the config script, runs `enroot start`, and waits for the
/// `SIGSTOP` handshake. Returns the now-stopped helper's pid.
fn start_container(
    enroot_binary: &str,
    node: &NodeConfig,
    job: &JobInfo,
    request: &StepRequest,
    name: &str,
    env: &[(String, String)],
) -> Result<nix::unistd::Pid> {
    let mut mounts = request.mounts.clone();
    if job.is_batch_script() && node.sbatch_support {
        if let Some(script) = job.script_path() {
            mounts.push(stepcage_model::MountEntry {
                src: script.to_owned(),
                dst: script.to_owned(),
                flags: vec![
                    "file".to_owned(),
                    "bind".to_owned(),
                    "ro".to_owned(),
                    "nosuid".to_owned(),
                    "nodev".to_owned(),
                    "private".to_owned(),
                ],
            });
        }
    }
    let mounts = stepcage_model::step_request::dedup_mounts(mounts);

    let execute_entrypoint = request.entrypoint.or(node.execute_entrypoint);
    let env_var_names: Vec<String> = request.env_vars.iter().cloned().collect();

    let conf_path = config_emitter::emit(&mounts, !execute_entrypoint, &env_var_names)?;
    let conf_str = conf_path.to_string_lossy().into_owned();

    let pid = client::run_start(
        enroot_binary,
        job.uid,
        job.gid,
        &["start", "--conf", &conf_str, name, "sh", "-c", "kill -STOP $$ ; exit 0"],
        env,
    );

    let _ = std::fs::remove_file(&conf_path);
    Ok(pid?)
}

/// The full first-task sequence: import/create if needed, then start
/// unless the step is reusing a live container's namespaces. Returns
/// `(helper_pid, ns_pid)` to publish into the shared region, using `-1`
/// for `helper_pid` when no fresh child was started.
pub fn create_and_start(
    enroot_binary: &str,
    node: &NodeConfig,
    job: &JobInfo,
    request: &StepRequest,
    container: &mut stepcage_model::Container,
) -> Result<(i32, i32)> {
    if container.reuse_ns {
        let ns_pid = container
            .reuse_ns_source_pid
            .expect("reuse_ns implies a source pid was captured at Configured") as i32;
        return Ok((-1, ns_pid));
    }

    let env = stepcage_runtime::env::build_helper_env(
        &job.env,
        job.env_get("PATH"),
        request,
        node,
        container.cache_data_path.as_deref(),
    );

    if !container.reuse_rootfs {
        let image = request.image.as_deref().ok_or(Error::NoImage)?;
        import_and_create(enroot_binary, node, job, &container.name, image, &env)?;

        if container.cache_mode {
            if let Some(dir) = &container.cache_data_path {
                stepcage_cache::layout::touch(dir);
                // Held for the whole step: the lock is taken on a cache hit
                // at `Configured` (see `configure::configure`); on a miss it
                // must be taken here, right after the rootfs is in place,
                // or a concurrent GC pass could evict it mid-step.
                let lock_fd = stepcage_cache::layout::lock_shared(dir)?;
                container.cache_lock_fd = Some(lock_fd);
            }
        }
    }

    let pid = start_container(enroot_binary, node, job, request, &container.name, &env)?;
    let pid_raw: i32 = pid.as_raw();
    Ok((pid_raw, pid_raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uri_prefixes_bare_references() {
        assert_eq!(resolve_uri("library/alpine"), "docker://library/alpine");
        assert_eq!(resolve_uri("docker://library/alpine"), "docker://library/alpine");
        assert_eq!(resolve_uri("dockerd://d/alpine"), "dockerd://d/alpine");
    }

    #[test]
    fn squashfs_scratch_path_is_uid_job_step_scoped() {
        let p = squashfs_scratch_path(std::path::Path::new("/run/pyxis"), 1000, 42, 3);
        assert_eq!(p, std::path::PathBuf::from("/run/pyxis/1000/42.3.squashfs"));
    }
}
