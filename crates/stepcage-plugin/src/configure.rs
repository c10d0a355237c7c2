//! `Init -> Configured`: every task, in `user_init`, decides the
//! container's identity (cache-derived, named, or unnamed), its reuse
//! flags, and validates the requested name mode against the registry.

use stepcage_model::{Container, ImportMethod, JobInfo, NameMode, NodeConfig, StepRequest};
use stepcage_model::container::{named_container_name, unnamed_container_name};
use stepcage_runtime::{env, registry};

use crate::error::{Error, Result};

/// Builds the `Container` this step will use, performing the one piece of
/// I/O this transition needs: a registry lookup for named containers (to
/// validate the requested mode) and/or a cache resolution (to compute the
/// deterministic key and possibly short-circuit import entirely).
pub fn configure(
    enroot_binary: &str,
    node: &NodeConfig,
    job: &JobInfo,
    request: &StepRequest,
) -> Result<(Container, Vec<(String, String)>)> {
    let mut cache_rootfs_dir = None;
    let cache_mode = request.cache.or(false);

    if cache_mode {
        let data_root = node
            .container_cache_data_path
            .as_ref()
            .ok_or_else(|| Error::Config("container cache requested but container_cache_data_path is not configured".into()))?;
        let image = request.image.as_deref().ok_or(Error::NoImage)?;
        let entry = stepcage_cache::resolve(
            data_root,
            image,
            job.uid,
            job.gid,
            node.container_cache_gc_high,
            node.container_cache_gc_low,
        )?;
        cache_rootfs_dir = Some(entry.rootfs_dir.clone());

        let mut container = Container::new(entry.container_name);
        container.cache_mode = true;
        container.cache_data_root = Some(data_root.clone());
        container.cache_data_path = Some(entry.rootfs_dir.clone());
        container.reuse_rootfs = entry.is_hit;
        container.temporary_rootfs = false;
        container.import_method = Some(ImportMethod::EnrootImport);

        let helper_env = env::build_helper_env(
            &job.env,
            job.env_get("PATH"),
            request,
            node,
            cache_rootfs_dir.as_deref(),
        );

        if entry.is_hit {
            let lock_fd = stepcage_cache::layout::lock_shared(&entry.rootfs_dir)?;
            container.cache_lock_fd = Some(lock_fd);
            stepcage_cache::layout::touch(&entry.rootfs_dir);
        }

        return Ok((container, helper_env));
    }

    let helper_env = env::build_helper_env(&job.env, job.env_get("PATH"), request, node, None);

    if let Some(req_name) = &request.container_name {
        let name = named_container_name(node.container_scope, job.jobid, &req_name.name);
        let status = registry::lookup(enroot_binary, job.uid, job.gid, &helper_env, &name)?;

        let mut container = Container::new(name.clone());
        match (req_name.mode, &status) {
            (NameMode::Create, Some(_)) => {
                return Err(Error::NameCreateExists { name });
            }
            (NameMode::Exec, None) | (NameMode::Exec, Some(None)) => {
                return Err(Error::NameExecNotRunning { name });
            }
            (NameMode::NoExec, Some(Some(_))) => {
                container.reuse_rootfs = true;
                container.reuse_ns = false;
            }
            (_, Some(Some(pid))) => {
                container.reuse_rootfs = true;
                container.reuse_ns = true;
                container.reuse_ns_source_pid = Some(*pid);
            }
            (_, Some(None)) => {
                container.reuse_rootfs = true;
                container.reuse_ns = false;
            }
            (_, None) => {
                container.reuse_rootfs = false;
                container.reuse_ns = false;
            }
        }
        container.temporary_rootfs = false;
        return Ok((container, helper_env));
    }

    let name = unnamed_container_name(node.container_scope, job.jobid, job.stepid);
    let mut container = Container::new(name);
    container.reuse_rootfs = false;
    container.reuse_ns = false;
    container.temporary_rootfs = true;
    Ok((container, helper_env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcage_model::ContainerScope;

    fn node() -> NodeConfig {
        NodeConfig::default()
    }

    fn job() -> JobInfo {
        JobInfo {
            uid: 1000,
            gid: 1000,
            jobid: 42,
            stepid: 0,
            local_task_count: 1,
            total_task_count: 1,
            env: vec![("PATH".into(), "/usr/bin:/bin".into())],
            cwd: Some("/home/u".into()),
            allow_superuser: false,
            argv: Vec::new(),
        }
    }

    #[test]
    fn unnamed_container_is_always_fresh() {
        let request = StepRequest {
            image: Some("docker://alpine".into()),
            ..Default::default()
        };
        let (container, _) = configure("/bin/true", &node(), &job(), &request).unwrap();
        assert_eq!(container.name, "pyxis_42_42.0");
        assert!(!container.reuse_rootfs);
        assert!(container.temporary_rootfs);
    }

    #[test]
    fn named_create_mode_succeeds_against_empty_registry() {
        let mut node = node();
        node.container_scope = ContainerScope::Job;
        let request = StepRequest {
            image: Some("docker://alpine".into()),
            container_name: Some(stepcage_model::ContainerNameRequest::parse("my:create").unwrap()),
            ..Default::default()
        };
        // We can't easily fake `list -f` output without a real binary, so
        // this exercises the "not found" branch instead (auto mode would
        // behave the same as create mode when nothing is found).
        let result = configure("/bin/true", &node, &job(), &request);
        // /bin/true produces empty `list -f` output => lookup returns None
        // => create mode succeeds (nothing to conflict with).
        assert!(result.is_ok());
    }
}
