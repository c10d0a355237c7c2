//! Per-step container lifecycle orchestrator: the callback entry points a
//! step manager plugin wires up, plus the node-daemon init hook and the
//! job epilog sweeper that run outside any single step's lifetime.
//!
//! State machine: `Init -> Configured -> Imported -> Created -> Started ->
//! Attached(n) -> Exited(n) -> Torn`. `Configured` through `Started`
//! happen once per step, performed by whichever task observes itself
//! first under the shared region's mutex; every other transition happens
//! once per task.

pub mod attach;
pub mod context;
pub mod creation;
pub mod configure;
pub mod environ_import;
pub mod epilog;
pub mod error;
pub mod logging;
pub mod node_init;
pub mod remap;
pub mod scratch;
pub mod seccomp;
pub mod task_exit;

use nix::unistd::Pid;

use stepcage_model::{JobInfo, NodeConfig, StepRequest};
use stepcage_shared::SharedRegion;

pub use context::StepContext;
pub use error::{Error, Result};

/// Runs once per step, with elevated privilege, right after option
/// parsing and before `user_init`. Installs the logger (idempotent: safe
/// even if more than one step shares this process) and creates this
/// job's per-uid scratch directory under the runtime root.
///
/// The runtime root itself (`/<runtime_path>/`) is a separate, one-time
/// node-daemon init step — see [`node_init::ensure_runtime_dir`] — run
/// by whatever starts the node daemon, not by this callback.
pub fn post_opt(node: &NodeConfig, job: &JobInfo) -> Result<()> {
    logging::init(node);
    scratch::ensure_uid_scratch_dir(&node.runtime_path, job.uid, job.gid)?;
    Ok(())
}

/// Builds the per-step context: validates the request, resolves the
/// container's identity (`Init -> Configured`), and maps the shared
/// region every task of this step will coordinate through. Must run
/// exactly once per step, before any task process is forked.
pub fn user_init(
    enroot_binary: String,
    node: NodeConfig,
    job: JobInfo,
    request: StepRequest,
) -> Result<StepContext> {
    request.validate()?;
    let (container, helper_env) = configure::configure(&enroot_binary, &node, &job, &request)?;
    let region = SharedRegion::create(job.local_task_count)?;
    let mut ctx = StepContext::new(node, job, request, region, container, enroot_binary);
    ctx.helper_env = helper_env;
    Ok(ctx)
}

/// Runs in every task process after `fork`, before the task's own code.
/// The first task to observe `init_tasks == 1` performs
/// `Configured -> Imported -> Created -> Started` while holding the
/// region's mutex and publishes `helper_pid`/`ns_pid`; every task then
/// captures the namespace/cwd fds, imports the container's own
/// environment, and applies the PyTorch remap — all before joining those
/// namespaces (`-> Attached(n)`), since the helper's `/proc/<pid>/environ`
/// stops being reachable once this task leaves the parent user namespace.
/// The task that observes `started_tasks` reach `local_task_count` resumes
/// the stopped helper.
pub fn task_init(ctx: &mut StepContext) -> Result<()> {
    let enroot_binary = ctx.enroot_binary.clone();

    // `with_lock`'s closure has to return `stepcage_shared`'s own error
    // type, so a `creation` failure is stashed here and re-raised after
    // the lock is released rather than threaded through `?` inside it.
    let mut create_result: Result<()> = Ok(());
    ctx.region.with_lock(|region| {
        if region.bump_init_tasks() == 0 {
            match creation::create_and_start(&enroot_binary, &ctx.node, &ctx.job, &ctx.request, &mut ctx.container) {
                Ok((helper_pid, ns_pid)) => region.set_pids(helper_pid, ns_pid),
                Err(e) => create_result = Err(e),
            }
        }
        Ok(())
    })?;
    create_result?;

    let helper_pid = ctx.region.helper_pid();
    let ns_pid = ctx.region.ns_pid();

    attach::capture_fds(&mut ctx.container, helper_pid, ns_pid)?;

    // Environ import and the pytorch remap both run while this task is
    // still in the parent user namespace: the helper lives there too, and
    // once we `setns(CLONE_NEWUSER)` below an unprivileged task can no
    // longer reach its `/proc/<pid>/environ` (ptrace_may_access fails
    // across the namespace boundary).
    let environ_source = if helper_pid > 0 { helper_pid } else { ns_pid };
    environ_import::import(environ_source, &ctx.request.env_vars)?;
    remap::apply(&ctx.job.env);

    attach::attach(&ctx.container, ctx.request.workdir.as_deref(), ctx.job.privileged())?;
    ctx.attached = true;

    if ctx.region.observe_started() && helper_pid > 0 {
        stepcage_runtime::client::resume_and_reap(Pid::from_raw(helper_pid))?;
    }

    Ok(())
}

/// Runs in every task process once the task's own code has exited.
/// Releases the fds this task captured; the task that observes
/// `completed_tasks` reach `local_task_count` runs the full
/// `Exited(n) -> Torn` teardown and unmaps the shared region.
pub fn task_exit(ctx: &mut StepContext) -> Result<()> {
    attach::close_fds(&mut ctx.container);

    if ctx.region.observe_completed() {
        task_exit::tear_down(
            &ctx.enroot_binary,
            &ctx.node,
            &ctx.job,
            &ctx.container,
            ctx.request.save_path.as_deref(),
            ctx.region.started_tasks(),
            ctx.region.local_task_count,
            &ctx.helper_env,
        )?;
        ctx.region.destroy()?;
    }

    Ok(())
}

/// Runs once in the step daemon process itself, after every task has
/// been reaped. A safety net: the step daemon's own mapping of the
/// shared region is distinct from any task's (each process has its own
/// page table entries over the same physical pages), so it must release
/// its copy independently of whatever the terminator task already did.
pub fn stepd_exit(ctx: StepContext) {
    if let Err(e) = ctx.region.destroy() {
        log::warn!("stepd_exit: failed to unmap shared region: {e}");
    }
}

/// SPANK job epilog hook: sweeps up any job-scoped container this job
/// left behind on this node. Independent of any step's `StepContext`.
pub fn job_epilog(enroot_binary: &str, node: &NodeConfig, uid: u32, gid: u32, jobid: u32) -> Result<()> {
    epilog::sweep(enroot_binary, node, uid, gid, jobid)
}
