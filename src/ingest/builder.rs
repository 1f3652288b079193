//! Builds in-memory extraction trees by walking a document with a schema

use crate::document::Element;
use crate::graph::{Properties, PropertyValue};
use crate::schema::SchemaModel;
use thiserror::Error;

/// Why a node could not be extracted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("{label}: required property '{property}' is empty")]
    MissingRequired { label: String, property: String },

    #[error("{label}: merge key '{property}' is empty")]
    MissingMergeKey { label: String, property: String },

    #[error("no element matches '{locator}' for root '{label}'")]
    RootNotFound { label: String, locator: String },
}

/// A staged node. Owns its children exclusively until materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionNode {
    pub label: String,
    pub properties: Properties,
    /// Child relations in schema declaration order
    pub relations: Vec<RelationChildren>,
    /// Zero-based index within the parent relation (0 for the root)
    pub position: usize,
    /// Key properties when this node is canonical (merged, not created)
    pub merge_on: Vec<String>,
}

/// Children found under one named relation, in document order
#[derive(Debug, Clone, PartialEq)]
pub struct RelationChildren {
    pub relationship: String,
    pub children: Vec<ChildSlot>,
}

/// One located child: built, or the reason it could not be
#[derive(Debug, Clone, PartialEq)]
pub enum ChildSlot {
    Built(ExtractionNode),
    Failed {
        position: usize,
        error: ExtractionError,
    },
}

impl ExtractionNode {
    pub fn is_canonical(&self) -> bool {
        !self.merge_on.is_empty()
    }

    /// Key properties for a canonical node.
    pub fn merge_key(&self) -> Result<Properties, ExtractionError> {
        let mut key = Properties::new();
        for name in &self.merge_on {
            match self.properties.get(name) {
                Some(value) if !value.is_empty() => {
                    key.insert(name.clone(), value.clone());
                }
                _ => {
                    return Err(ExtractionError::MissingMergeKey {
                        label: self.label.clone(),
                        property: name.clone(),
                    })
                }
            }
        }
        Ok(key)
    }

    /// Built children under `relationship`, in position order
    pub fn built<'a>(
        &'a self,
        relationship: &'a str,
    ) -> impl Iterator<Item = &'a ExtractionNode> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.relationship == relationship)
            .flat_map(|r| r.children.iter())
            .filter_map(|slot| match slot {
                ChildSlot::Built(node) => Some(node),
                ChildSlot::Failed { .. } => None,
            })
    }

    /// Number of built nodes in this tree, including self
    pub fn node_count(&self) -> usize {
        1 + self
            .relations
            .iter()
            .flat_map(|r| r.children.iter())
            .map(|slot| match slot {
                ChildSlot::Built(node) => node.node_count(),
                ChildSlot::Failed { .. } => 0,
            })
            .sum::<usize>()
    }

    /// Number of failed slots anywhere in this tree
    pub fn failure_count(&self) -> usize {
        self.relations
            .iter()
            .flat_map(|r| r.children.iter())
            .map(|slot| match slot {
                ChildSlot::Built(node) => node.failure_count(),
                ChildSlot::Failed { .. } => 1,
            })
            .sum()
    }
}

/// Walks a document with a schema model.
///
/// Stateless; the same builder serves every source format because all
/// format-specific behaviour sits behind [`Element`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBuilder;

impl TreeBuilder {
    /// Build the tree for `root`. The schema's own locator selects the root
    /// element; a root that cannot be extracted fails the whole document.
    pub fn build<E: Element>(
        root: &E,
        schema: &SchemaModel,
    ) -> Result<ExtractionNode, ExtractionError> {
        let element = root.locate(&schema.locator).into_iter().next().ok_or_else(|| {
            ExtractionError::RootNotFound {
                label: schema.label.clone(),
                locator: schema.locator.to_string(),
            }
        })?;
        Self::build_node(element, schema, 0)
    }

    fn build_node<E: Element>(
        element: &E,
        schema: &SchemaModel,
        position: usize,
    ) -> Result<ExtractionNode, ExtractionError> {
        let mut properties = Properties::new();
        for extractor in &schema.properties {
            let value = element.read(extractor);
            if value.is_empty() {
                if extractor.required {
                    return Err(ExtractionError::MissingRequired {
                        label: schema.label.clone(),
                        property: extractor.name.clone(),
                    });
                }
                continue;
            }
            properties.insert(extractor.name.clone(), value);
        }

        let relations = schema
            .children
            .iter()
            .map(|relation| RelationChildren {
                relationship: relation.relationship.clone(),
                children: element
                    .locate(&relation.schema.locator)
                    .into_iter()
                    .enumerate()
                    .map(|(i, child)| match Self::build_node(child, &relation.schema, i) {
                        Ok(node) => ChildSlot::Built(node),
                        Err(error) => ChildSlot::Failed { position: i, error },
                    })
                    .collect(),
            })
            .collect();

        Ok(ExtractionNode {
            label: schema.label.clone(),
            properties,
            relations,
            position,
            merge_on: schema.merge_on.clone(),
        })
    }
}

/// Position as stored on structural relationships
pub(crate) fn position_value(position: usize) -> PropertyValue {
    PropertyValue::Int(position as i64)
}
