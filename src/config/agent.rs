// SPDX-License-Identifier: Apache-2.0

//! Agent configuration file.
//!
//! Loaded from TOML and merged with `COURIER_GENERAL__*` environment
//! variables, so `COURIER_GENERAL__FLUSH_INTERVAL=5s` overrides
//! `general.flush_interval`. Codec options are kept untyped here and handed
//! to the codec registry, which owns their validation.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::options::{OptionMap, deser_duration};
use crate::codecs::{CodecFactory, CodecRegistry, PLAIN_CODEC_NAME};
use crate::error::{Error, Result};
use crate::registrar::RegistrarConfig;

const ENV_PREFIX: &str = "COURIER_";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub general: GeneralConfig,
    pub files: Vec<FilesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Directory holding the registrar snapshot
    pub persist_dir: PathBuf,
    pub persist_file: String,
    #[serde(deserialize_with = "deser_duration")]
    pub flush_interval: Duration,
    /// Persist early once this many events were applied since the last write
    pub max_pending_changes: usize,
    pub intake_queue_size: usize,
    #[serde(deserialize_with = "deser_duration")]
    pub shutdown_timeout: Duration,
    #[serde(deserialize_with = "deser_duration")]
    pub max_persist_failure_duration: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("."),
            persist_file: ".courier".to_string(),
            flush_interval: Duration::from_secs(1),
            max_pending_changes: 256,
            intake_queue_size: 1024,
            shutdown_timeout: Duration::from_secs(5),
            max_persist_failure_duration: Duration::from_secs(60),
        }
    }
}

impl GeneralConfig {
    pub fn persist_path(&self) -> PathBuf {
        self.persist_dir.join(&self.persist_file)
    }

    pub fn registrar_config(&self) -> RegistrarConfig {
        RegistrarConfig {
            persist_path: self.persist_path(),
            flush_interval: self.flush_interval,
            max_pending_changes: self.max_pending_changes,
            intake_queue_size: self.intake_queue_size,
            shutdown_timeout: self.shutdown_timeout,
            max_persist_failure_duration: self.max_persist_failure_duration,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    pub paths: Vec<String>,
    pub codec: CodecConfig,
}

/// Codec selection plus the codec's own options, which are left untyped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            name: PLAIN_CODEC_NAME.to_string(),
            options: Map::new(),
        }
    }
}

/// A validated `[[files]]` entry with its codec factory built.
#[derive(Clone)]
pub struct FileGroup {
    pub paths: Vec<String>,
    pub codec: Arc<dyn CodecFactory>,
}

impl std::fmt::Debug for FileGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGroup")
            .field("paths", &self.paths)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl AgentConfig {
    /// Load from a TOML file, with environment overrides applied on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Self::extract(Figment::new().merge(Toml::file(path)).merge(env_provider()))
    }

    /// Parse TOML text without environment overrides.
    pub fn parse(toml: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Check every setting and build the codec factory for each file group.
    /// Any error here is fatal and must surface before tailing starts.
    pub fn build_file_groups(&self, registry: &CodecRegistry) -> Result<Vec<FileGroup>> {
        let general = &self.general;
        if general.persist_file.is_empty() {
            return Err(Error::Config(
                "Option /general/persist_file must not be empty".to_string(),
            ));
        }
        if general.intake_queue_size == 0 {
            return Err(Error::Config(
                "Option /general/intake_queue_size must be greater than 0".to_string(),
            ));
        }
        if general.flush_interval.is_zero() {
            return Err(Error::Config(
                "Option /general/flush_interval must be greater than 0".to_string(),
            ));
        }

        self.files
            .iter()
            .enumerate()
            .map(|(i, files)| {
                if files.paths.is_empty() {
                    return Err(Error::Config(format!(
                        "Option /files[{}]/paths must contain at least one path",
                        i
                    )));
                }
                let options = OptionMap::new(
                    format!("/files[{}]/codec/", i),
                    files.codec.options.clone(),
                );
                let codec = registry.build(&files.codec.name, options)?;
                Ok(FileGroup {
                    paths: files.paths.clone(),
                    codec,
                })
            })
            .collect()
    }
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
        .filter(|key| key.as_str().starts_with("general"))
        .split("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::parse("").unwrap();
        assert_eq!(config.general.persist_path(), PathBuf::from("./.courier"));
        assert_eq!(config.general.flush_interval, Duration::from_secs(1));
        assert_eq!(config.general.max_pending_changes, 256);
        assert!(config.files.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = AgentConfig::parse(
            r#"
            [general]
            persist_dir = "/var/lib/courier"
            flush_interval = "250ms"
            shutdown_timeout = 10

            [[files]]
            paths = ["/var/log/app.log"]

            [[files]]
            paths = ["/var/log/java/*.log"]
            [files.codec]
            name = "multiline"
            pattern = '^\s'
            previous_timeout = "3s"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.general.persist_path(),
            PathBuf::from("/var/lib/courier/.courier")
        );
        assert_eq!(config.general.flush_interval, Duration::from_millis(250));
        assert_eq!(config.general.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.files[0].codec.name, "plain");
        assert_eq!(config.files[1].codec.name, "multiline");
        assert_eq!(config.files[1].codec.options.len(), 2);

        let groups = config
            .build_file_groups(&CodecRegistry::with_defaults())
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].codec.name(), "multiline");
    }

    #[test]
    fn test_unknown_general_key_rejected() {
        let err = AgentConfig::parse("[general]\nflush_intervall = \"1s\"\n").unwrap_err();
        assert!(err.to_string().contains("flush_intervall"), "{}", err);
    }

    #[test]
    fn test_codec_errors_carry_group_index() {
        let config = AgentConfig::parse(
            r#"
            [[files]]
            paths = ["/a.log"]

            [[files]]
            paths = ["/b.log"]
            [files.codec]
            name = "multiline"
            patern = "^x"
            "#,
        )
        .unwrap();

        let err = config
            .build_file_groups(&CodecRegistry::with_defaults())
            .unwrap_err()
            .to_string();
        assert!(err.contains("Option /files[1]/codec/pattern is required"), "{}", err);
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let config =
            AgentConfig::parse("[[files]]\npaths = [\"/a.log\"]\n[files.codec]\nname = \"json\"\n")
                .unwrap();
        let err = config
            .build_file_groups(&CodecRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCodec(name) if name == "json"));
    }

    #[test]
    fn test_empty_paths_rejected() {
        let config = AgentConfig::parse("[[files]]\npaths = []\n").unwrap();
        let err = config
            .build_file_groups(&CodecRegistry::with_defaults())
            .unwrap_err()
            .to_string();
        assert!(err.contains("/files[0]/paths"), "{}", err);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[general]\nmax_pending_changes = 8").unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.general.max_pending_changes, 8);
        assert_eq!(config.general.registrar_config().max_pending_changes, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AgentConfig::load("/nonexistent/courier.toml").unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{}", err);
    }
}
