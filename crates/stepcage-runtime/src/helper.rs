//! Fork/exec plumbing shared by the `enroot` helper and the optional
//! external importer: drop privileges in the child, rescue the log
//! descriptor out of the standard range, exec, and report back a typed
//! outcome to the parent.
//!
//! Every function here assumes it is called from a single-threaded
//! process between `fork` and `exec` — the same assumption the task
//! processes this plugin runs in already make.

use std::ffi::CString;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::os::unix::io::{FromRawFd, RawFd};

use nix::fcntl::{self, FcntlArg, OFlag};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::signal::{self, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, execvp, fork, ForkResult, Gid, Pid, Uid};

use crate::error::{Error, Result};

/// A still-unreaped child and, for diagnostics, the memfd its stderr was
/// routed to.
pub struct SpawnedChild {
    pub pid: Pid,
    pub log_fd: RawFd,
}

/// How the child ended up when we last checked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Exited(i32),
    Signalled(i32),
    Stopped,
}

/// Creates an anonymous, close-on-exec in-memory file used to capture a
/// helper child's stderr (and, for `run_wait`, its stdout too).
pub fn create_log_memfd(name: &str) -> Result<RawFd> {
    let cname = CString::new(name).expect("log name must not contain NUL");
    Ok(memfd_create(&cname, MemFdCreateFlag::MFD_CLOEXEC)?)
}

/// Duplicates `fd` to a fresh descriptor guaranteed to be `>= 3` and
/// close-on-exec, then closes the original — the "rescue" step so that a
/// caller-supplied fd living at 0, 1 or 2 doesn't get clobbered by our own
/// stdio setup before we dup it back into place.
fn rescue_fd(fd: RawFd) -> Result<RawFd> {
    let rescued = fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(3))?;
    if rescued != fd {
        let _ = unistd::close(fd);
    }
    Ok(rescued)
}

/// Sets up fd 0/1/2 in the child: stdin from `/dev/null`, stdout to
/// `stdout_fd`, stderr to `stderr_fd`. Both normally point at the same log
/// memfd; the external importer's `get` subcommand instead routes stdout
/// through a real pipe so its single-line answer can be read separately
/// from its log.
fn setup_stdio(stdout_fd: RawFd, stderr_fd: RawFd) -> Result<()> {
    let stdout_fd = rescue_fd(stdout_fd)?;
    let stderr_fd = if stderr_fd == stdout_fd {
        stdout_fd
    } else {
        rescue_fd(stderr_fd)?
    };

    let devnull = fcntl::open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
    unistd::dup2(devnull, 0)?;
    if devnull > 2 {
        let _ = unistd::close(devnull);
    }

    unistd::dup2(stdout_fd, 1)?;
    unistd::dup2(stderr_fd, 2)?;

    if stdout_fd > 2 {
        let _ = unistd::close(stdout_fd);
    }
    if stderr_fd > 2 && stderr_fd != stdout_fd {
        let _ = unistd::close(stderr_fd);
    }
    Ok(())
}

/// Best-effort reset of the child's OOM killer score; a container's tasks
/// should not inherit a scheduler-assigned negative/positive adjustment
/// meant for the step manager itself.
fn reset_oom_score_adj() {
    let _ = std::fs::write("/proc/self/oom_score_adj", b"0");
}

/// Forks, sets up stdio/uid/gid/env in the child per the helper runner's
/// contract, execs `argv[0]` with the remaining arguments, and returns the
/// still-running (or already-exited) child to the parent. `prepare_env` runs
/// in the child after the uid/gid drop and before exec.
///
/// # Safety-by-convention
/// `prepare_env` must only touch process environment and must not allocate
/// in a way that could deadlock on a lock held by another (nonexistent,
/// by our single-threaded assumption) thread at fork time.
pub fn spawn_child<F>(uid: u32, gid: u32, argv: &[&str], prepare_env: F) -> Result<SpawnedChild>
where
    F: FnOnce(),
{
    let log_fd = create_log_memfd("enroot-log")?;
    spawn_with_fds(uid, gid, argv, log_fd, log_fd, prepare_env).map(|pid| SpawnedChild { pid, log_fd })
}

/// Lower-level primitive used when stdout and stderr must go to different
/// descriptors (the external importer's `get` subcommand).
pub fn spawn_with_fds<F>(
    uid: u32,
    gid: u32,
    argv: &[&str],
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    prepare_env: F,
) -> Result<Pid>
where
    F: FnOnce(),
{
    let program = argv
        .first()
        .copied()
        .expect("argv must have at least a program name");

    // SAFETY: single-threaded caller, as documented on the module.
    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Parent { child, .. } => Ok(child),
        ForkResult::Child => {
            // From here on we must not return to the caller's stack on any
            // error path: always terminate via `_exit`.
            if setup_stdio(stdout_fd, stderr_fd).is_err() {
                unistd::_exit(127);
            }

            reset_oom_score_adj();

            if unistd::setregid(Gid::from_raw(gid), Gid::from_raw(gid)).is_err() {
                unistd::_exit(126);
            }
            if unistd::setreuid(Uid::from_raw(uid), Uid::from_raw(uid)).is_err() {
                unistd::_exit(126);
            }

            prepare_env();

            let cprogram = match CString::new(program) {
                Ok(c) => c,
                Err(_) => unistd::_exit(127),
            };
            let cargs: std::result::Result<Vec<CString>, _> =
                argv.iter().map(|a| CString::new(*a)).collect();
            let cargs = match cargs {
                Ok(c) => c,
                Err(_) => unistd::_exit(127),
            };

            let _ = execvp(&cprogram, &cargs);
            // execvp only returns on failure.
            unistd::_exit(127);
        }
    }
}

/// Waits for `pid`, retrying on `EINTR`. When `untraced` is set, a
/// `SIGSTOP`ped child is reported as [`ChildStatus::Stopped`] instead of
/// being waited past.
pub fn wait_child(pid: Pid, untraced: bool) -> Result<ChildStatus> {
    let flags = if untraced {
        Some(WaitPidFlag::WUNTRACED)
    } else {
        None
    };
    loop {
        match waitpid(pid, flags) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildStatus::Signalled(sig as i32)),
            Ok(WaitStatus::Stopped(_, _)) => return Ok(ChildStatus::Stopped),
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(Error::Nix(e)),
        }
    }
}

/// Resumes a stopped helper child so it can exit on its own.
pub fn resume(pid: Pid) -> Result<()> {
    signal::kill(pid, Signal::SIGCONT)?;
    Ok(())
}

/// Best-effort reap of a helper whose exit we no longer care about the
/// detail of, used during teardown to avoid leaving a zombie.
pub fn reap_best_effort(pid: Pid) {
    let _ = waitpid(pid, None);
}

/// Dumps a log memfd to the scheduler's log line by line, rewinding first
/// so repeat calls see the same content. Matches the propagation policy of
/// never showing the helper's raw stderr directly except on an error path.
pub fn print_log(fd: RawFd, header: &str, level: log::Level) {
    // SAFETY: `fd` is a memfd we created and still own; duplicate it so the
    // caller keeps the original open for any further use.
    let dup_fd = match fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(3)) {
        Ok(fd) => fd,
        Err(_) => return,
    };
    let mut file = unsafe { File::from_raw_fd(dup_fd) };
    if file.seek(SeekFrom::Start(0)).is_err() {
        return;
    }
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_err() {
        return;
    }
    for line in contents.lines() {
        log::log!(level, "{header}: {line}");
    }
}

/// Rewinds and exposes a memfd's contents as a line-oriented reader, for
/// `run_capture`'s stdout stream.
pub struct LineStream {
    reader: BufReader<File>,
}

impl LineStream {
    pub fn from_fd(fd: RawFd) -> Result<Self> {
        let dup_fd = fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(3))?;
        let mut file = unsafe { File::from_raw_fd(dup_fd) };
        file.seek(SeekFrom::Start(0))?;
        Ok(LineStream {
            reader: BufReader::new(file),
        })
    }

    pub fn lines(&mut self) -> impl Iterator<Item = std::io::Result<String>> + '_ {
        (&mut self.reader).lines()
    }
}
