//! The per-process, per-step context: everything a task process needs to
//! carry across its four callback invocations. Created once at `post_opt`,
//! mutated in place through `user_init`/`task_init`/`task_exit`, and
//! dropped (after tearing down the shared region) at `stepd_exit`.
//!
//! Ownership is per-step; nothing here is meant to outlive one step's
//! lifetime in one process.

use stepcage_model::{Container, JobInfo, NodeConfig, StepRequest};
use stepcage_shared::SharedRegion;

pub struct StepContext {
    pub node: NodeConfig,
    pub job: JobInfo,
    pub request: StepRequest,
    pub region: SharedRegion,
    pub container: Container,
    pub enroot_binary: String,
    /// The sanitised environment the helper/importer children run with,
    /// built once in `user_init` from `request`/`node`/`job`.
    pub helper_env: Vec<(String, String)>,
    /// Set once this task has attached into the container's namespaces.
    pub attached: bool,
}

impl StepContext {
    pub fn new(
        node: NodeConfig,
        job: JobInfo,
        request: StepRequest,
        region: SharedRegion,
        container: Container,
        enroot_binary: String,
    ) -> Self {
        StepContext {
            node,
            job,
            request,
            region,
            container,
            enroot_binary,
            helper_env: Vec::new(),
            attached: false,
        }
    }
}
