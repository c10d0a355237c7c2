//! The optional external importer: a thin `get <uri>` / `release`
//! subprocess protocol, used instead of the helper's own import when the
//! node is configured with an `importer_path`.

use std::io::{BufRead, BufReader};
use std::os::unix::io::FromRawFd;

use nix::unistd;

use crate::env;
use crate::error::{Error, Result};
use crate::helper;

/// Runs `<importer_path> get <uri>` and returns the absolute squashfs path
/// it printed on stdout. A pipe carries stdout separately from the memfd
/// log so a single line can be read without waiting for the child's exit
/// status first.
pub fn get(
    importer_path: &str,
    uid: u32,
    gid: u32,
    env_entries: &[(String, String)],
    uri: &str,
) -> Result<String> {
    let (pipe_read, pipe_write) = unistd::pipe()?;
    let log_fd = helper::create_log_memfd("importer-log")?;

    let argv = [importer_path, "get", uri];
    let env_entries = env_entries.to_vec();
    let pid = helper::spawn_with_fds(uid, gid, &argv, pipe_write, log_fd, move || {
        self::env::apply_env(&env_entries)
    });
    let _ = unistd::close(pipe_write);

    let pid = match pid {
        Ok(pid) => pid,
        Err(e) => {
            let _ = unistd::close(pipe_read);
            let _ = unistd::close(log_fd);
            return Err(e);
        }
    };

    let mut reader = BufReader::new(unsafe { std::fs::File::from_raw_fd(pipe_read) });
    let mut line = String::new();
    let _ = reader.read_line(&mut line);
    let line = line.trim_end_matches('\n').to_owned();

    let status = helper::wait_child(pid, false);
    let status = match status {
        Ok(s) => s,
        Err(e) => {
            let _ = unistd::close(log_fd);
            return Err(e);
        }
    };

    match status {
        helper::ChildStatus::Exited(0) => {}
        helper::ChildStatus::Exited(code) => {
            helper::print_log(log_fd, "importer", log::Level::Error);
            let _ = unistd::close(log_fd);
            return Err(Error::Exited {
                program: importer_path.to_owned(),
                code,
            });
        }
        helper::ChildStatus::Signalled(sig) => {
            helper::print_log(log_fd, "importer", log::Level::Error);
            let _ = unistd::close(log_fd);
            return Err(Error::Signalled {
                program: importer_path.to_owned(),
                signal: sig,
            });
        }
        helper::ChildStatus::Stopped => unreachable!("importer get never requests WUNTRACED"),
    }

    if line.is_empty() {
        helper::print_log(log_fd, "importer", log::Level::Error);
        let _ = unistd::close(log_fd);
        return Err(Error::ImporterEmptyOutput {
            uri: uri.to_owned(),
        });
    }

    let _ = unistd::close(log_fd);
    Ok(line)
}

/// Runs `<importer_path> release`, best-effort cleanup at teardown.
pub fn release(importer_path: &str, uid: u32, gid: u32, env_entries: &[(String, String)]) -> Result<()> {
    crate::client::run_wait(importer_path, uid, gid, &["release"], env_entries)
}
