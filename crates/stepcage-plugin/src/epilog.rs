//! Job epilog sweep: removes every container this job left behind under
//! job scope. Runs once per job, on the node that ran it, outside any
//! step's lifecycle.

use stepcage_model::container::job_scoped_container_jobid;
use stepcage_model::{ContainerScope, NodeConfig};
use stepcage_runtime::registry;

use crate::error::Result;

/// A fresh, minimal environment for the sweep: just enough `PATH` to run
/// the helper, with `HOME` deliberately unset so the helper doesn't pick
/// up a stray config from whatever ran the epilog.
fn sweep_env() -> Vec<(String, String)> {
    vec![("PATH".to_owned(), "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_owned())]
}

fn containers_for_job(binary: &str, uid: u32, gid: u32, jobid: u32, env: &[(String, String)]) -> Result<Vec<String>> {
    let entries = registry::list(binary, uid, gid, env)?;
    Ok(entries
        .into_iter()
        .filter(|e| job_scoped_container_jobid(&e.name) == Some(jobid))
        .map(|e| e.name)
        .collect())
}

/// Removes every container matching `pyxis_<jobid>_` for the uid/gid
/// pair, retrying once on any leftover and logging whatever still
/// remains after the retry (nothing left to do beyond that — a
/// container a plain `remove -f` won't budge needs operator attention).
pub fn sweep(enroot_binary: &str, node: &NodeConfig, uid: u32, gid: u32, jobid: u32) -> Result<()> {
    if node.container_scope != ContainerScope::Job {
        return Ok(());
    }

    let env = sweep_env();
    let mut leftover = containers_for_job(enroot_binary, uid, gid, jobid, &env)?;

    for attempt in 0..2 {
        if leftover.is_empty() {
            return Ok(());
        }
        for name in &leftover {
            if let Err(e) = client_remove(enroot_binary, uid, gid, name, &env) {
                log::warn!("epilog sweep: failed to remove {name}: {e}");
            }
        }
        leftover = containers_for_job(enroot_binary, uid, gid, jobid, &env)?;
        if attempt == 0 && !leftover.is_empty() {
            log::warn!("epilog sweep: {} container(s) still present after first pass for job {jobid}, retrying", leftover.len());
        }
    }

    if !leftover.is_empty() {
        log::error!(
            "epilog sweep: job {jobid} left {} container(s) behind after retry: {}",
            leftover.len(),
            leftover.join(", ")
        );
    }

    Ok(())
}

fn client_remove(binary: &str, uid: u32, gid: u32, name: &str, env: &[(String, String)]) -> Result<()> {
    stepcage_runtime::client::run_wait(binary, uid, gid, &["remove", "-f", name], env).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_entirely_under_global_scope() {
        let mut node = NodeConfig::default();
        node.container_scope = ContainerScope::Global;
        let result = sweep("/bin/true", &node, unsafe { libc::getuid() }, unsafe { libc::getgid() }, 42);
        assert!(result.is_ok());
    }

    #[test]
    fn runs_clean_with_no_containers_under_job_scope() {
        let node = NodeConfig::default();
        let result = sweep("/bin/true", &node, unsafe { libc::getuid() }, unsafe { libc::getgid() }, 42);
        assert!(result.is_ok());
    }
}
