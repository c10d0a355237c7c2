//! The two public entry points onto the runtime helper: fire-and-wait, and
//! capture-stdout-for-later-reading. Everything else in this crate is
//! built on top of these.

use nix::unistd::Pid;

use crate::env;
use crate::error::{Error, Result};
use crate::helper::{self, ChildStatus, LineStream};

/// Runs the `enroot` binary as `uid:gid` with the given arguments, using
/// `env` as the child's full environment (already built by
/// [`crate::env::build_helper_env`]). Blocks until it exits.
pub fn run_wait(binary: &str, uid: u32, gid: u32, args: &[&str], env: &[(String, String)]) -> Result<()> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(binary);
    argv.extend_from_slice(args);

    let env = env.to_vec();
    let child = helper::spawn_child(uid, gid, &argv, move || self::env::apply_env(&env))?;

    match helper::wait_child(child.pid, false)? {
        ChildStatus::Exited(0) => Ok(()),
        ChildStatus::Exited(code) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Exited {
                program: binary.to_owned(),
                code,
            })
        }
        ChildStatus::Signalled(sig) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Signalled {
                program: binary.to_owned(),
                signal: sig,
            })
        }
        ChildStatus::Stopped => unreachable!("run_wait never requests WUNTRACED"),
    }
}

/// Same contract as [`run_wait`], but captures stdout to a line-oriented
/// reader instead of discarding it, for commands whose output matters
/// (`list -f`, the importer's `get`).
pub fn run_capture(
    binary: &str,
    uid: u32,
    gid: u32,
    args: &[&str],
    env: &[(String, String)],
) -> Result<LineStream> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(binary);
    argv.extend_from_slice(args);

    let env = env.to_vec();
    let child = helper::spawn_child(uid, gid, &argv, move || self::env::apply_env(&env))?;

    match helper::wait_child(child.pid, false)? {
        ChildStatus::Exited(0) => helper::LineStream::from_fd(child.log_fd),
        ChildStatus::Exited(code) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Exited {
                program: binary.to_owned(),
                code,
            })
        }
        ChildStatus::Signalled(sig) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Signalled {
                program: binary.to_owned(),
                signal: sig,
            })
        }
        ChildStatus::Stopped => unreachable!("run_capture never requests WUNTRACED"),
    }
}

/// Starts the container-start handshake: spawns `enroot start ...` and
/// waits for it to either exit (a failure) or stop itself with `SIGSTOP`
/// (success — the helper has finished its `pivot_root` and is waiting for
/// `SIGCONT`). The caller is responsible for eventually resuming and
/// reaping the returned pid.
pub fn run_start(binary: &str, uid: u32, gid: u32, args: &[&str], env: &[(String, String)]) -> Result<Pid> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(binary);
    argv.extend_from_slice(args);

    let env = env.to_vec();
    let child = helper::spawn_child(uid, gid, &argv, move || self::env::apply_env(&env))?;

    match helper::wait_child(child.pid, true)? {
        ChildStatus::Stopped => Ok(child.pid),
        ChildStatus::Exited(0) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::ExitedTooSoon {
                program: binary.to_owned(),
            })
        }
        ChildStatus::Exited(code) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Exited {
                program: binary.to_owned(),
                code,
            })
        }
        ChildStatus::Signalled(sig) => {
            helper::print_log(child.log_fd, binary, log::Level::Error);
            Err(Error::Signalled {
                program: binary.to_owned(),
                signal: sig,
            })
        }
    }
}

pub fn resume_and_reap(pid: Pid) -> Result<()> {
    helper::resume(pid)?;
    helper::reap_best_effort(pid);
    Ok(())
}
