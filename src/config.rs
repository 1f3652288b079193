//! Pipeline configuration, loaded from YAML

use crate::ingest::{ErrorClass, ErrorPolicy};
use crate::resolve::ResolutionConfig;
use crate::topics::TopicConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a pipeline run can be tuned with. Every field has a default,
/// so an empty file (or no file) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Skip documents whose provenance is already in the store
    pub guard: bool,
    /// Documents ingested concurrently
    pub workers: usize,
    /// Failure classes absorbed at the failing sub-tree
    pub absorb: Vec<ErrorClass>,
    /// Extra schema files, added to the built-in schemas
    pub schema_dir: Option<PathBuf>,
    pub resolution: ResolutionConfig,
    pub topics: TopicConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            guard: true,
            workers: 4,
            absorb: vec![ErrorClass::Constraint, ErrorClass::Malformed],
            schema_dir: None,
            resolution: ResolutionConfig::default(),
            topics: TopicConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes as unit, not as an empty map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        let fraction = self.topics.highlight_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::Invalid(format!(
                "topics.highlight_fraction must be within 0..=1, got {}",
                fraction
            )));
        }
        if !(0.0..1.0).contains(&self.topics.damping) {
            return Err(ConfigError::Invalid(format!(
                "topics.damping must be within 0..1, got {}",
                self.topics.damping
            )));
        }
        Ok(())
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::absorbing(self.absorb.iter().copied())
    }
}

/// Default database path (`<data dir>/panelgraph/panelgraph.db`)
pub fn default_database_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("panelgraph").join("panelgraph.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_all_defaults() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.guard);
        assert_eq!(config.workers, 4);
        assert_eq!(config.error_policy(), ErrorPolicy::default());
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml = r#"
workers: 8
absorb: [store]
resolution:
  assayed_role: measured
topics:
  min_cooccurrence: 3
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.workers, 8);
        assert!(config.error_policy().absorbs(ErrorClass::Store));
        assert!(!config.error_policy().absorbs(ErrorClass::Malformed));
        assert_eq!(config.resolution.assayed_role, "measured");
        assert_eq!(config.resolution.intervention_role, "intervention");
        assert_eq!(config.topics.min_cooccurrence, 3);
        assert_eq!(config.topics.label_terms, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.topics.highlight_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panelgraph.yaml");
        std::fs::write(&path, "guard: false\ndatabase: /tmp/x.db\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert!(!config.guard);
        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
    }
}
