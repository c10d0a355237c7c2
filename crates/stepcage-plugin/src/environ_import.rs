//! Imports the container's own environment (as captured by the helper
//! child right before it stopped itself) into the task's process, so a
//! task sees whatever `ENTRYPOINT`/`ENV` the image itself set up.

use std::collections::BTreeSet;
use std::fs;

use once_cell::sync::Lazy;

use crate::error::Result;

/// Locale variables stripped from the job's own environment before the
/// container's environ is imported, unless the user explicitly asked to
/// preserve them via `--container-env`.
static LOCALE_DENY_LIST: Lazy<BTreeSet<&'static str>> =
    Lazy::new(|| ["LANG", "LANGUAGE", "LC_ALL"].into_iter().collect());

/// Parses a `/proc/<pid>/environ` buffer: NUL-separated `KEY=VALUE`
/// entries, with a trailing NUL appended if the kernel didn't already
/// terminate the buffer that way.
fn parse_environ(mut buf: Vec<u8>) -> Vec<(String, String)> {
    if buf.last() != Some(&0) {
        buf.push(0);
    }
    buf.split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            let s = String::from_utf8_lossy(chunk);
            s.split_once('=').map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect()
}

/// Removes the locale deny-list from the task's own environment, unless
/// the user asked to preserve a given variable via `--container-env`.
fn strip_unpreserved_locale(preserved_vars: &BTreeSet<String>) {
    for locale_var in LOCALE_DENY_LIST.iter() {
        if !preserved_vars.contains(*locale_var) {
            std::env::remove_var(locale_var);
        }
    }
}

/// Applies every entry from a container environ onto the current process:
/// a key named in `preserved_vars` is set only if not already present (the
/// host's own value wins), every other key is set unconditionally (the
/// container's value wins).
fn apply_entries(entries: Vec<(String, String)>, preserved_vars: &BTreeSet<String>) {
    for (k, v) in entries {
        if preserved_vars.contains(&k) {
            if std::env::var_os(&k).is_none() {
                std::env::set_var(k, v);
            }
        } else {
            std::env::set_var(k, v);
        }
    }
}

/// Reads `helper_pid`'s environment and applies it to the current process,
/// after first stripping the locale deny-list (see [`strip_unpreserved_locale`]
/// and [`apply_entries`]).
pub fn import(helper_pid: i32, preserved_vars: &BTreeSet<String>) -> Result<()> {
    strip_unpreserved_locale(preserved_vars);

    let path = format!("/proc/{helper_pid}/environ");
    let raw = fs::read(path)?;
    apply_entries(parse_environ(raw), preserved_vars);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nul_separated_entries_without_trailing_nul() {
        let buf = b"FOO=bar\0BAZ=qux".to_vec();
        let parsed = parse_environ(buf);
        assert_eq!(parsed, vec![("FOO".to_owned(), "bar".to_owned()), ("BAZ".to_owned(), "qux".to_owned())]);
    }

    #[test]
    fn parses_nul_separated_entries_with_trailing_nul() {
        let buf = b"FOO=bar\0\0".to_vec();
        let parsed = parse_environ(buf);
        assert_eq!(parsed, vec![("FOO".to_owned(), "bar".to_owned())]);
    }

    #[test]
    fn skips_entries_with_no_equals_sign() {
        let buf = b"FOO=bar\0GARBAGE\0".to_vec();
        let parsed = parse_environ(buf);
        assert_eq!(parsed, vec![("FOO".to_owned(), "bar".to_owned())]);
    }

    #[test]
    fn strip_removes_unpreserved_locale_vars() {
        std::env::set_var("LANG", "job_locale");
        let preserved = BTreeSet::new();
        strip_unpreserved_locale(&preserved);
        assert!(std::env::var_os("LANG").is_none());
    }

    #[test]
    fn strip_keeps_preserved_locale_var() {
        std::env::set_var("LC_ALL", "job_locale");
        let mut preserved = BTreeSet::new();
        preserved.insert("LC_ALL".to_owned());
        strip_unpreserved_locale(&preserved);
        assert_eq!(std::env::var("LC_ALL").unwrap(), "job_locale");
    }

    #[test]
    fn apply_entries_overwrites_unpreserved_keys() {
        std::env::set_var("STEPCAGE_TEST_OVERWRITE", "host_value");
        apply_entries(
            vec![("STEPCAGE_TEST_OVERWRITE".to_owned(), "container_value".to_owned())],
            &BTreeSet::new(),
        );
        assert_eq!(std::env::var("STEPCAGE_TEST_OVERWRITE").unwrap(), "container_value");
    }

    #[test]
    fn apply_entries_keeps_existing_preserved_key() {
        std::env::set_var("STEPCAGE_TEST_PRESERVED", "host_value");
        let mut preserved = BTreeSet::new();
        preserved.insert("STEPCAGE_TEST_PRESERVED".to_owned());
        apply_entries(
            vec![("STEPCAGE_TEST_PRESERVED".to_owned(), "container_value".to_owned())],
            &preserved,
        );
        assert_eq!(std::env::var("STEPCAGE_TEST_PRESERVED").unwrap(), "host_value");
    }

    #[test]
    fn apply_entries_sets_preserved_key_when_unset() {
        std::env::remove_var("STEPCAGE_TEST_PRESERVED_UNSET");
        let mut preserved = BTreeSet::new();
        preserved.insert("STEPCAGE_TEST_PRESERVED_UNSET".to_owned());
        apply_entries(
            vec![("STEPCAGE_TEST_PRESERVED_UNSET".to_owned(), "container_value".to_owned())],
            &preserved,
        );
        assert_eq!(std::env::var("STEPCAGE_TEST_PRESERVED_UNSET").unwrap(), "container_value");
    }

    #[test]
    fn import_reads_own_environ_without_erroring() {
        let preserved = BTreeSet::new();
        let pid = unsafe { libc::getpid() };
        import(pid, &preserved).unwrap();
    }
}
