//! Assembles a [`StepRequest`] out of repeated option-callback invocations,
//! the shape a step manager's option registration hands flags to a plugin
//! in: one flag, one value, possibly called more than once for the same
//! flag across the lifetime of a single step's option parsing.
//!
//! Mirrors the option table a container-step plugin registers:
//! `container-image`, `container-mounts`, `container-workdir`,
//! `container-name`, `container-save`, `container-mount-home` /
//! `no-container-mount-home`, `container-remap-root` /
//! `no-container-remap-root`, `container-entrypoint` /
//! `no-container-entrypoint`, `container-entrypoint-log`,
//! `container-writable` / `container-readonly`, `container-env`,
//! `container-cache` (no negated form; only registered on node
//! configurations that support it).

use crate::error::{Error, Result};
use crate::step_request::{dedup_mounts, ContainerNameRequest, MountEntry, StepRequest};
use crate::ternary::Ternary;

/// Accumulates option values across repeated callback invocations and
/// produces a [`StepRequest`] once option parsing is done.
///
/// Flags that take a single value (`--container-image`, `--container-save`,
/// ...) may legally be given the identical value more than once — some step
/// managers invoke an option's callback once per occurrence of the flag on
/// the command line even when it only appears once logically. A *different*
/// value on a second call is a user error, not a silent overwrite.
#[derive(Debug, Default)]
pub struct StepRequestBuilder {
    image: Option<String>,
    mounts: Vec<MountEntry>,
    workdir: Option<String>,
    container_name_raw: Option<String>,
    container_name: Option<ContainerNameRequest>,
    save_path: Option<String>,
    mount_home: Ternary,
    remap_root: Ternary,
    entrypoint: Ternary,
    entrypoint_log: bool,
    writable: Ternary,
    cache: Ternary,
    env_vars: std::collections::BTreeSet<String>,
}

fn single_value(
    flag: &'static str,
    current: &mut Option<String>,
    value: &str,
) -> Result<()> {
    if value.is_empty() {
        return Err(Error::ParseError(format!("--{flag}: argument required")));
    }
    match current {
        Some(existing) if existing == value => Ok(()),
        Some(_) => Err(Error::ParseError(format!(
            "--{flag} specified multiple times"
        ))),
        None => {
            *current = Some(value.to_owned());
            Ok(())
        }
    }
}

fn toggle(flag_true: &'static str, flag_false: &'static str, current: &mut Ternary, value: bool) -> Result<()> {
    let incoming = Ternary::from(value);
    match *current {
        Ternary::Unset => {
            *current = incoming;
            Ok(())
        }
        existing if existing == incoming => Ok(()),
        _ => Err(Error::ParseError(format!(
            "both --{flag_true} and --{flag_false} were specified"
        ))),
    }
}

impl StepRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&mut self, value: &str) -> Result<()> {
        single_value("container-image", &mut self.image, value)
    }

    /// `value` is a full `--container-mounts` argument: one or more
    /// comma-separated `SRC:DST[:FLAGS]` entries.
    pub fn mounts(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::ParseError(
                "--container-mounts: argument required".into(),
            ));
        }
        for raw in value.split(',') {
            self.mounts.push(MountEntry::parse(raw)?);
        }
        Ok(())
    }

    pub fn workdir(&mut self, value: &str) -> Result<()> {
        single_value("container-workdir", &mut self.workdir, value)
    }

    /// `value` is the full `NAME[:MODE]` argument.
    pub fn container_name(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::ParseError(
                "--container-name: argument required".into(),
            ));
        }
        if let Some(existing) = &self.container_name_raw {
            if existing == value {
                return Ok(());
            }
            return Err(Error::ParseError(
                "--container-name specified multiple times".into(),
            ));
        }
        let parsed = ContainerNameRequest::parse(value)?;
        self.container_name_raw = Some(value.to_owned());
        self.container_name = Some(parsed);
        Ok(())
    }

    pub fn container_save(&mut self, value: &str) -> Result<()> {
        if value.ends_with('/') {
            return Err(Error::ParseError(
                "--container-save: target is a directory".into(),
            ));
        }
        single_value("container-save", &mut self.save_path, value)
    }

    pub fn mount_home(&mut self, value: bool) -> Result<()> {
        toggle("container-mount-home", "no-container-mount-home", &mut self.mount_home, value)
    }

    pub fn remap_root(&mut self, value: bool) -> Result<()> {
        toggle("container-remap-root", "no-container-remap-root", &mut self.remap_root, value)
    }

    pub fn entrypoint(&mut self, value: bool) -> Result<()> {
        toggle("container-entrypoint", "no-container-entrypoint", &mut self.entrypoint, value)
    }

    pub fn entrypoint_log(&mut self, value: bool) {
        self.entrypoint_log = value;
    }

    pub fn writable(&mut self, value: bool) -> Result<()> {
        toggle("container-writable", "container-readonly", &mut self.writable, value)
    }

    /// `--container-cache`: no negated form, registered only on node
    /// configurations that support it.
    pub fn container_cache(&mut self, value: bool) {
        self.cache = Ternary::from(value);
    }

    /// `value` is a full `--container-env` argument: one or more
    /// comma-separated variable names.
    pub fn env(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::ParseError(
                "--container-env: argument required".into(),
            ));
        }
        for name in value.split(',') {
            if name.is_empty() {
                return Err(Error::ParseError(format!(
                    "--container-env: invalid format: {value:?}"
                )));
            }
            self.env_vars.insert(name.to_owned());
        }
        Ok(())
    }

    /// Whether any option implying container use was given. Without
    /// `--container-image` or `--container-name`, the other flags have
    /// nothing to attach to and this step is not a container step at all.
    pub fn is_enabled(&self) -> bool {
        self.image.is_some() || self.container_name.is_some()
    }

    /// Flags that are set but have no effect because [`Self::is_enabled`]
    /// is `false`, worded the way the step manager should log them.
    pub fn ignored_flag_warnings(&self) -> Vec<String> {
        if self.is_enabled() {
            return Vec::new();
        }
        let mut warnings = Vec::new();
        if !self.mounts.is_empty() {
            warnings.push("ignoring --container-mounts because neither --container-image nor --container-name is set".into());
        }
        if self.workdir.is_some() {
            warnings.push("ignoring --container-workdir because neither --container-image nor --container-name is set".into());
        }
        if !self.mount_home.is_unset() {
            warnings.push("ignoring --[no-]container-mount-home because neither --container-image nor --container-name is set".into());
        }
        if !self.remap_root.is_unset() {
            warnings.push("ignoring --[no-]container-remap-root because neither --container-image nor --container-name is set".into());
        }
        if !self.entrypoint.is_unset() {
            warnings.push("ignoring --[no-]container-entrypoint because neither --container-image nor --container-name is set".into());
        }
        warnings
    }

    /// Assembles and validates the final request. Callers should check
    /// [`Self::is_enabled`] first; building with neither an image nor a
    /// name set is not itself an error, it just yields an inert request.
    pub fn finish(self) -> Result<StepRequest> {
        let request = StepRequest {
            image: self.image,
            mounts: dedup_mounts(self.mounts),
            workdir: self.workdir,
            container_name: self.container_name,
            save_path: self.save_path,
            mount_home: self.mount_home,
            remap_root: self.remap_root,
            entrypoint: self.entrypoint,
            writable: self.writable,
            cache: self.cache,
            entrypoint_log: self.entrypoint_log,
            env_vars: self.env_vars,
        };
        request.validate()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_identical_single_value_is_idempotent() {
        let mut b = StepRequestBuilder::new();
        b.image("docker://alpine").unwrap();
        b.image("docker://alpine").unwrap();
        assert_eq!(b.finish().unwrap().image, Some("docker://alpine".into()));
    }

    #[test]
    fn repeated_different_single_value_errors() {
        let mut b = StepRequestBuilder::new();
        b.image("docker://alpine").unwrap();
        assert!(b.image("docker://ubuntu").is_err());
    }

    #[test]
    fn empty_value_is_argument_required() {
        let mut b = StepRequestBuilder::new();
        assert!(b.image("").is_err());
        assert!(b.workdir("").is_err());
        assert!(b.container_name("").is_err());
        assert!(b.container_save("").is_err());
        assert!(b.mounts("").is_err());
        assert!(b.env("").is_err());
    }

    #[test]
    fn mounts_splits_on_comma_and_dedups() {
        let mut b = StepRequestBuilder::new();
        b.mounts("/a:/a,/b:/b,/a:/a").unwrap();
        let req = b.finish().unwrap();
        assert_eq!(req.mounts.len(), 2);
    }

    #[test]
    fn env_rejects_empty_name_in_list() {
        let mut b = StepRequestBuilder::new();
        assert!(b.env("FOO,,BAR").is_err());
    }

    #[test]
    fn env_accumulates_unique_names() {
        let mut b = StepRequestBuilder::new();
        b.env("FOO,BAR").unwrap();
        b.env("BAR,BAZ").unwrap();
        let req = b.finish().unwrap();
        assert_eq!(req.env_vars.len(), 3);
    }

    #[test]
    fn toggle_conflict_between_positive_and_negative_flag() {
        let mut b = StepRequestBuilder::new();
        b.mount_home(true).unwrap();
        assert!(b.mount_home(false).is_err());
    }

    #[test]
    fn toggle_repeated_same_value_is_fine() {
        let mut b = StepRequestBuilder::new();
        b.writable(true).unwrap();
        b.writable(true).unwrap();
        assert_eq!(b.finish().unwrap().writable, Ternary::True);
    }

    #[test]
    fn container_save_rejects_directory_target() {
        let mut b = StepRequestBuilder::new();
        assert!(b.container_save("/tmp/out/").is_err());
    }

    #[test]
    fn container_name_parses_mode_and_rejects_bad_mode() {
        let mut b = StepRequestBuilder::new();
        b.container_name("my:exec").unwrap();
        assert_eq!(b.finish().unwrap().container_name.unwrap().name, "my");

        let mut b = StepRequestBuilder::new();
        assert!(b.container_name("my:bogus").is_err());
    }

    #[test]
    fn not_enabled_without_image_or_name_reports_ignored_flags() {
        let mut b = StepRequestBuilder::new();
        b.mounts("/a:/a").unwrap();
        b.workdir("/work").unwrap();
        assert!(!b.is_enabled());
        let warnings = b.ignored_flag_warnings();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn container_cache_requires_image_on_finish() {
        let mut b = StepRequestBuilder::new();
        b.container_cache(true);
        assert!(b.finish().is_err());

        let mut b = StepRequestBuilder::new();
        b.container_cache(true);
        b.image("docker://alpine").unwrap();
        assert_eq!(b.finish().unwrap().cache, Ternary::True);
    }

    #[test]
    fn enabled_with_image_reports_no_ignored_flags() {
        let mut b = StepRequestBuilder::new();
        b.image("docker://alpine").unwrap();
        b.mounts("/a:/a").unwrap();
        assert!(b.is_enabled());
        assert!(b.ignored_flag_warnings().is_empty());
    }
}
