use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ternary::Ternary;

/// A single `--container-mounts` entry, already split into its three parts
/// and with the user's `+`-separated flag groups turned into the `,`
/// separator the helper's config script expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub src: String,
    pub dst: String,
    pub flags: Vec<String>,
}

impl MountEntry {
    /// Parses one colon-separated `src:dst[:flags]` entry. `flags`, if
    /// present, uses `+` as its inner separator (translated to `,` here).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ':');
        let src = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ParseError(format!("empty mount source in {raw:?}")))?;
        let dst = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ParseError(format!("missing mount destination in {raw:?}")))?;
        let flags = parts
            .next()
            .map(|f| f.split('+').map(str::to_owned).collect())
            .unwrap_or_default();

        if !(src.starts_with("./") || src.starts_with('/') || src == "tmpfs" || src == "umount") {
            return Err(Error::ParseError(format!(
                "mount source must be a path, \"tmpfs\" or \"umount\", got {src:?}"
            )));
        }
        if dst.is_empty() {
            return Err(Error::ParseError(format!(
                "mount destination must not be empty in {raw:?}"
            )));
        }

        Ok(MountEntry {
            src: src.to_owned(),
            dst: dst.to_owned(),
            flags,
        })
    }

    /// The exact string used for de-duplication: before defaults are
    /// applied, two entries are "the same" iff this string matches.
    pub fn dedup_key(&self) -> String {
        format!("{} {} {}", self.src, self.dst, self.flags.join(","))
    }

    /// The default flag set implied by the source keyword, per the helper
    /// configuration emitter's rules, with any user-supplied flags appended.
    pub fn config_line(&self) -> String {
        let defaults: &str = if self.src == "umount" {
            "x-detach"
        } else if self.src == "tmpfs" {
            "x-create=dir"
        } else {
            "x-create=auto,rbind"
        };

        if self.src == "umount" {
            // x-detach takes no further flags.
            return format!("{} {} {}", self.src, self.dst, defaults);
        }

        if self.flags.is_empty() {
            format!("{} {} {}", self.src, self.dst, defaults)
        } else {
            format!(
                "{} {} {},{}",
                self.src,
                self.dst,
                defaults,
                self.flags.join(",")
            )
        }
    }
}

/// De-duplicates by exact raw string while preserving first-seen order.
pub fn dedup_mounts(entries: Vec<MountEntry>) -> Vec<MountEntry> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        if seen.insert(e.dedup_key()) {
            out.push(e);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameMode {
    Auto,
    Create,
    Exec,
    NoExec,
}

impl Default for NameMode {
    fn default() -> Self {
        NameMode::Auto
    }
}

impl NameMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "auto" => Ok(NameMode::Auto),
            "create" => Ok(NameMode::Create),
            "exec" => Ok(NameMode::Exec),
            "no_exec" => Ok(NameMode::NoExec),
            other => Err(Error::ParseError(format!(
                "unknown container name mode {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerNameRequest {
    pub name: String,
    pub mode: NameMode,
}

impl ContainerNameRequest {
    /// Parses `--container-name=<name[:mode]>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, mode) = match raw.split_once(':') {
            Some((n, m)) => (n, NameMode::parse(m)?),
            None => (raw, NameMode::Auto),
        };
        if name.is_empty() {
            return Err(Error::ParseError("container name must not be empty".into()));
        }
        Ok(ContainerNameRequest {
            name: name.to_owned(),
            mode,
        })
    }
}

/// What the user asked for when they invoked the step; everything here is
/// derived from already-parsed CLI flags and is otherwise inert data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRequest {
    pub image: Option<String>,
    pub mounts: Vec<MountEntry>,
    pub workdir: Option<String>,
    pub container_name: Option<ContainerNameRequest>,
    pub save_path: Option<String>,
    pub mount_home: Ternary,
    pub remap_root: Ternary,
    pub entrypoint: Ternary,
    pub writable: Ternary,
    pub cache: Ternary,
    pub entrypoint_log: bool,
    pub env_vars: BTreeSet<String>,
}

impl StepRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(save) = &self.save_path {
            if save.ends_with('/') {
                return Err(Error::ParseError(format!(
                    "--container-save target must not be a directory path: {save:?}"
                )));
            }
        }
        if self.cache.or(false) {
            if self.save_path.is_some() {
                return Err(Error::ConfigError(
                    "--container-cache is incompatible with --container-save".into(),
                ));
            }
            if self.writable.or(false) {
                return Err(Error::ConfigError(
                    "--container-cache is incompatible with --container-writable".into(),
                ));
            }
            if let Some(req) = &self.container_name {
                if req.mode != NameMode::Auto {
                    return Err(Error::ConfigError(
                        "--container-cache is incompatible with an explicit --container-name mode"
                            .into(),
                    ));
                }
            }
            if self.image.is_none() {
                return Err(Error::ConfigError(
                    "--container-cache requires --container-image".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_entry_defaults_by_source_kind() {
        let m = MountEntry::parse("/data:/data").unwrap();
        assert_eq!(m.config_line(), "/data /data x-create=auto,rbind");

        let m = MountEntry::parse("tmpfs:/scratch").unwrap();
        assert_eq!(m.config_line(), "tmpfs /scratch x-create=dir");

        let m = MountEntry::parse("umount:/proc").unwrap();
        assert_eq!(m.config_line(), "umount /proc x-detach");
    }

    #[test]
    fn mount_entry_user_flags_translate_plus_to_comma() {
        let m = MountEntry::parse("/a:/b:ro+nosuid").unwrap();
        assert_eq!(m.flags, vec!["ro", "nosuid"]);
        assert_eq!(m.config_line(), "/a /b x-create=auto,rbind,ro,nosuid");
    }

    #[test]
    fn mount_entry_rejects_bad_source() {
        assert!(MountEntry::parse("relative/path:/dst").is_err());
    }

    #[test]
    fn dedup_preserves_order_and_drops_exact_duplicates() {
        let entries = vec![
            MountEntry::parse("/a:/a").unwrap(),
            MountEntry::parse("/b:/b").unwrap(),
            MountEntry::parse("/a:/a").unwrap(),
        ];
        let deduped = dedup_mounts(entries);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].src, "/a");
        assert_eq!(deduped[1].src, "/b");
    }

    #[test]
    fn container_name_request_parses_mode_suffix() {
        let r = ContainerNameRequest::parse("my:exec").unwrap();
        assert_eq!(r.name, "my");
        assert_eq!(r.mode, NameMode::Exec);

        let r = ContainerNameRequest::parse("my").unwrap();
        assert_eq!(r.mode, NameMode::Auto);
    }

    #[test]
    fn cache_mode_validation_rejects_incompatible_combinations() {
        let mut req = StepRequest {
            image: Some("docker://alpine".into()),
            cache: Ternary::True,
            save_path: Some("/tmp/out.sqsh".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());

        req.save_path = None;
        req.writable = Ternary::True;
        assert!(req.validate().is_err());

        req.writable = Ternary::Unset;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn save_path_rejects_directory_target() {
        let req = StepRequest {
            save_path: Some("/tmp/out/".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
