//! Parses the helper's `list -f` output into named containers and whether
//! each currently has a live process.

use crate::client;
use crate::error::{Error, Result};

/// One row of `enroot list -f`: a container name, and whether a live
/// process backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub pid: Option<u32>,
}

fn parse_row(row: &str) -> Result<ListEntry> {
    let mut fields = row.split_whitespace();
    let name = fields
        .next()
        .ok_or_else(|| Error::MalformedListing(row.to_owned()))?
        .to_owned();
    let pid = match fields.next() {
        None | Some("none") => None,
        Some(digits) => Some(
            digits
                .parse::<u32>()
                .map_err(|_| Error::MalformedListing(row.to_owned()))?,
        ),
    };
    Ok(ListEntry { name, pid })
}

/// Runs `enroot list -f` and parses every row after the header. Any
/// malformed row fails the whole call.
pub fn list(
    binary: &str,
    uid: u32,
    gid: u32,
    env: &[(String, String)],
) -> Result<Vec<ListEntry>> {
    let mut stream = client::run_capture(binary, uid, gid, &["list", "-f"], env)?;
    let mut lines = stream.lines();
    lines.next(); // header
    let mut out = Vec::new();
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        out.push(parse_row(&line)?);
    }
    Ok(out)
}

/// `None` when `name` is not present at all; `Some(None)` when the rootfs
/// exists but no container is running; `Some(Some(pid))` when running.
pub fn lookup(
    binary: &str,
    uid: u32,
    gid: u32,
    env: &[(String, String)],
    name: &str,
) -> Result<Option<Option<u32>>> {
    let entries = list(binary, uid, gid, env)?;
    Ok(entries
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| e.pid))
}
