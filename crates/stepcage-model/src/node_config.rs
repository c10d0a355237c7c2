use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerScope {
    Job,
    Global,
}

impl Default for ContainerScope {
    fn default() -> Self {
        ContainerScope::Job
    }
}

/// The node's plugin configuration, as read from `key=value` lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub runtime_path: PathBuf,
    pub execute_entrypoint: bool,
    pub container_scope: ContainerScope,
    pub sbatch_support: bool,
    pub use_enroot_load: bool,
    pub importer_path: Option<PathBuf>,
    pub container_cache_data_path: Option<PathBuf>,
    pub container_cache_gc_high: u8,
    pub container_cache_gc_low: u8,
    pub log_level: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            runtime_path: PathBuf::from("/run/pyxis"),
            execute_entrypoint: false,
            container_scope: ContainerScope::Job,
            sbatch_support: false,
            use_enroot_load: false,
            importer_path: None,
            container_cache_data_path: None,
            container_cache_gc_high: 90,
            container_cache_gc_low: 70,
            log_level: None,
        }
    }
}

impl NodeConfig {
    /// Parses the plugin's `key=value`, one-per-line configuration format.
    /// Unknown keys are rejected; blank lines and `#`-comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = NodeConfig::default();

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::ConfigError(format!("line {}: expected key=value, got {line:?}", lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "runtime_path" => {
                    if !value.starts_with('/') {
                        return Err(Error::NotAbsolute {
                            field: "runtime_path",
                            value: value.to_owned(),
                        });
                    }
                    config.runtime_path = PathBuf::from(value);
                }
                "execute_entrypoint" => config.execute_entrypoint = parse_bool(key, value)?,
                "container_scope" => {
                    config.container_scope = match value {
                        "job" => ContainerScope::Job,
                        "global" => ContainerScope::Global,
                        other => {
                            return Err(Error::ConfigError(format!(
                                "container_scope must be job or global, got {other:?}"
                            )))
                        }
                    }
                }
                "sbatch_support" => config.sbatch_support = parse_bool(key, value)?,
                "use_enroot_load" => config.use_enroot_load = parse_bool(key, value)?,
                "importer_path" => config.importer_path = Some(PathBuf::from(value)),
                "container_cache_data_path" => {
                    config.container_cache_data_path = Some(PathBuf::from(value))
                }
                "container_cache_gc_high" => {
                    config.container_cache_gc_high = parse_percent(key, value)?
                }
                "container_cache_gc_low" => {
                    config.container_cache_gc_low = parse_percent(key, value)?
                }
                "log_level" => config.log_level = Some(value.to_owned()),
                other => {
                    return Err(Error::ConfigError(format!("unknown configuration key {other:?}")))
                }
            }
        }

        if config.container_cache_gc_low >= config.container_cache_gc_high {
            return Err(Error::ConfigError(format!(
                "container_cache_gc_low ({}) must be less than container_cache_gc_high ({})",
                config.container_cache_gc_low, config.container_cache_gc_high
            )));
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::ConfigError(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_percent(key: &str, value: &str) -> Result<u8> {
    let n: u8 = value
        .parse()
        .map_err(|_| Error::ConfigError(format!("{key} must be an integer, got {value:?}")))?;
    if n > 100 {
        return Err(Error::ConfigError(format!(
            "{key} must be in 0..=100, got {n}"
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = NodeConfig::default();
        assert_eq!(c.runtime_path, PathBuf::from("/run/pyxis"));
        assert!(!c.execute_entrypoint);
        assert_eq!(c.container_scope, ContainerScope::Job);
    }

    #[test]
    fn parses_full_config() {
        let text = "\
            runtime_path=/run/pyxis\n\
            execute_entrypoint=true\n\
            container_scope=global\n\
            sbatch_support=yes\n\
            use_enroot_load=0\n\
            importer_path=/opt/pyxis/importer\n\
            container_cache_data_path=/var/cache/pyxis\n\
            container_cache_gc_high=90\n\
            container_cache_gc_low=70\n\
            # a comment\n\
            \n\
            log_level=debug\n";
        let c = NodeConfig::parse(text).unwrap();
        assert!(c.execute_entrypoint);
        assert_eq!(c.container_scope, ContainerScope::Global);
        assert!(c.sbatch_support);
        assert!(!c.use_enroot_load);
        assert_eq!(c.importer_path, Some(PathBuf::from("/opt/pyxis/importer")));
        assert_eq!(c.container_cache_gc_high, 90);
        assert_eq!(c.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(NodeConfig::parse("bogus_key=1").is_err());
    }

    #[test]
    fn rejects_relative_runtime_path() {
        assert!(NodeConfig::parse("runtime_path=relative/path").is_err());
    }

    #[test]
    fn rejects_inverted_gc_watermarks() {
        assert!(NodeConfig::parse("container_cache_gc_high=50\ncontainer_cache_gc_low=60").is_err());
    }
}
