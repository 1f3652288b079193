//! Named schema lookup, with built-in schemas for the supported sources

use super::{SchemaError, SchemaModel};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const SOURCEDATA_YAML: &str = include_str!("../../schemas/sourcedata.yaml");
const CROSSREF_YAML: &str = include_str!("../../schemas/crossref.yaml");

/// Schemas by name.
///
/// Built-ins:
/// - `sourcedata`: annotated article markup -> article / figure / panel / tag
/// - `crossref`: bibliographic JSON record -> article / author / reference / journal
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, SchemaModel>,
}

impl SchemaRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in schemas
    pub fn with_builtins() -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        registry.register("sourcedata", SchemaModel::from_yaml(SOURCEDATA_YAML)?);
        registry.register("crossref", SchemaModel::from_yaml(CROSSREF_YAML)?);
        Ok(registry)
    }

    /// Add or replace a schema
    pub fn register(&mut self, name: impl Into<String>, schema: SchemaModel) {
        self.schemas.insert(name.into(), schema);
    }

    /// Load every `.yaml` / `.yml` file in `dir`, named by file stem.
    ///
    /// A file whose stem matches an existing schema replaces it.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, SchemaError> {
        let mut loaded = 0;
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let schema = SchemaModel::from_yaml(&std::fs::read_to_string(&path)?)?;
            debug!(schema = name, path = %path.display(), "loaded schema");
            self.register(name, schema);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Result<&SchemaModel, SchemaError> {
        self.schemas
            .get(name)
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))
    }

    /// Schema names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
