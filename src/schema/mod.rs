//! Declarative schema models describing how documents map to graph nodes

mod locator;
mod model;
mod registry;

pub use locator::{local_name, AttrFilter, Axis, Locator, NameTest, Step};
pub use model::{
    collapse_whitespace, ChildRelation, PropertyExtractor, Read, SchemaModel, Transform,
};
pub use registry::SchemaRegistry;

use thiserror::Error;

/// Errors raised while loading or validating schemas
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("invalid directive: {0}")]
    InvalidDirective(String),

    #[error("invalid schema for '{label}': {reason}")]
    Invalid { label: String, reason: String },

    #[error("unknown schema: {0}")]
    Unknown(String),
}
