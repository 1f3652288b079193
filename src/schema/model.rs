//! Declarative description of one node type and how to extract it

use super::locator::Locator;
use super::SchemaError;
use crate::graph::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Immutable description of one node type.
///
/// Pure data: a locator relative to the parent element, the extractors
/// producing the node's properties, and the ordered child relations. The
/// same tree builder serves every source format by swapping this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Node label in the graph
    pub label: String,
    /// Where matching elements live, relative to the parent element
    #[serde(default)]
    pub locator: Locator,
    #[serde(default)]
    pub properties: Vec<PropertyExtractor>,
    /// Child relations in declaration order
    #[serde(default)]
    pub children: Vec<ChildRelation>,
    /// Key properties for canonical nodes; non-empty means merge, not create
    #[serde(default)]
    pub merge_on: Vec<String>,
    /// Properties no two nodes of this label may share
    #[serde(default)]
    pub unique: Vec<String>,
}

/// A named, typed relationship to a nested node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRelation {
    pub relationship: String,
    pub schema: SchemaModel,
}

/// Produces one property value from an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyExtractor {
    pub name: String,
    #[serde(default)]
    pub locator: Locator,
    #[serde(default)]
    pub read: Read,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    /// An empty result makes the element malformed
    #[serde(default)]
    pub required: bool,
}

impl PropertyExtractor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: Locator::self_locator(),
            read: Read::Text,
            transforms: Vec::new(),
            required: false,
        }
    }

    pub fn at(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    pub fn reading(mut self, read: Read) -> Self {
        self.read = read;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Run the transform pipeline over a raw read result.
    pub fn finish(&self, raw: PropertyValue) -> PropertyValue {
        self.transforms.iter().fold(raw, |value, t| t.apply(value))
    }
}

// ---------------------------------------------------------------------------
// Read / Transform directives
// ---------------------------------------------------------------------------

/// What to read from the located elements.
///
/// Written as `name` or `name:arg` in schema files, e.g. `attribute:id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Read {
    /// Text content of the first located element
    #[default]
    Text,
    /// Attribute (or JSON field) of the first located element carrying it
    Attribute(String),
    /// Text content of every located element
    TextList,
    /// Attribute of every located element carrying it
    AttributeList(String),
    /// Number of located elements
    Count,
    /// A fixed value, independent of the document
    Literal(String),
    /// Whether anything was located
    Exists,
}

/// Post-processing step applied to a read value, in declaration order.
///
/// String transforms apply element-wise to lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transform {
    Trim,
    CollapseWhitespace,
    Lowercase,
    /// List -> string
    Join(String),
    /// String -> list of non-empty trimmed parts
    Split(String),
    /// Replace an empty value
    Default(String),
    /// Parse a string as an integer; unparseable values are left as-is
    ToInt,
}

impl Transform {
    pub fn apply(&self, value: PropertyValue) -> PropertyValue {
        match self {
            Transform::Trim => map_strings(value, |s| s.trim().to_string()),
            Transform::CollapseWhitespace => map_strings(value, |s| collapse_whitespace(&s)),
            Transform::Lowercase => map_strings(value, |s| s.to_lowercase()),
            Transform::Join(sep) => match value {
                PropertyValue::Array(items) => PropertyValue::String(
                    items
                        .iter()
                        .map(PropertyValue::as_text)
                        .collect::<Vec<_>>()
                        .join(sep),
                ),
                other => other,
            },
            Transform::Split(sep) => match value {
                PropertyValue::String(s) => PropertyValue::Array(
                    s.split(sep.as_str())
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(PropertyValue::from)
                        .collect(),
                ),
                other => other,
            },
            Transform::Default(fallback) => {
                if value.is_empty() {
                    PropertyValue::String(fallback.clone())
                } else {
                    value
                }
            }
            Transform::ToInt => match value {
                PropertyValue::String(s) => match s.trim().parse::<i64>() {
                    Ok(i) => PropertyValue::Int(i),
                    Err(_) => PropertyValue::String(s),
                },
                other => other,
            },
        }
    }
}

fn map_strings(value: PropertyValue, f: impl Fn(String) -> String + Copy) -> PropertyValue {
    match value {
        PropertyValue::String(s) => PropertyValue::String(f(s)),
        PropertyValue::Array(items) => {
            PropertyValue::Array(items.into_iter().map(|v| map_strings(v, f)).collect())
        }
        other => other,
    }
}

/// Trim and fold every whitespace run into a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_directive(raw: &str) -> (&str, Option<&str>) {
    // Only the name is trimmed; separators such as " " must survive
    match raw.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg)),
        None => (raw.trim(), None),
    }
}

impl TryFrom<String> for Read {
    type Error = SchemaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (name, arg) = split_directive(&raw);
        let need_arg = |arg: Option<&str>| {
            arg.map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SchemaError::InvalidDirective(format!("'{}' needs an argument", raw)))
        };
        match name {
            "text" => Ok(Read::Text),
            "attribute" => Ok(Read::Attribute(need_arg(arg)?)),
            "text_list" => Ok(Read::TextList),
            "attribute_list" => Ok(Read::AttributeList(need_arg(arg)?)),
            "count" => Ok(Read::Count),
            "literal" => Ok(Read::Literal(arg.unwrap_or("").to_string())),
            "exists" => Ok(Read::Exists),
            _ => Err(SchemaError::InvalidDirective(format!("unknown read: {}", raw))),
        }
    }
}

impl fmt::Display for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Read::Text => write!(f, "text"),
            Read::Attribute(a) => write!(f, "attribute:{}", a),
            Read::TextList => write!(f, "text_list"),
            Read::AttributeList(a) => write!(f, "attribute_list:{}", a),
            Read::Count => write!(f, "count"),
            Read::Literal(v) => write!(f, "literal:{}", v),
            Read::Exists => write!(f, "exists"),
        }
    }
}

impl From<Read> for String {
    fn from(read: Read) -> Self {
        read.to_string()
    }
}

impl TryFrom<String> for Transform {
    type Error = SchemaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (name, arg) = split_directive(&raw);
        let need_arg = |arg: Option<&str>| {
            arg.filter(|a| !a.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SchemaError::InvalidDirective(format!("'{}' needs an argument", raw)))
        };
        match name {
            "trim" => Ok(Transform::Trim),
            "collapse_whitespace" => Ok(Transform::CollapseWhitespace),
            "lowercase" => Ok(Transform::Lowercase),
            "join" => Ok(Transform::Join(arg.unwrap_or(",").to_string())),
            "split" => Ok(Transform::Split(need_arg(arg)?)),
            "default" => Ok(Transform::Default(arg.unwrap_or("").to_string())),
            "to_int" => Ok(Transform::ToInt),
            _ => Err(SchemaError::InvalidDirective(format!("unknown transform: {}", raw))),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Trim => write!(f, "trim"),
            Transform::CollapseWhitespace => write!(f, "collapse_whitespace"),
            Transform::Lowercase => write!(f, "lowercase"),
            Transform::Join(sep) => write!(f, "join:{}", sep),
            Transform::Split(sep) => write!(f, "split:{}", sep),
            Transform::Default(v) => write!(f, "default:{}", v),
            Transform::ToInt => write!(f, "to_int"),
        }
    }
}

impl From<Transform> for String {
    fn from(transform: Transform) -> Self {
        transform.to_string()
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl SchemaModel {
    /// Parse and validate a schema from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let model: SchemaModel = serde_yaml::from_str(yaml)?;
        model.validate()?;
        Ok(model)
    }

    /// Check structural rules recursively: labels and property names are
    /// non-empty, property names are unique per node, `merge_on` and `unique`
    /// only name declared properties, and relationship names are non-empty.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::Invalid {
            label: self.label.clone(),
            reason,
        };

        if self.label.trim().is_empty() {
            return Err(invalid("empty label".into()));
        }

        let mut names = HashSet::new();
        for extractor in &self.properties {
            if extractor.name.trim().is_empty() {
                return Err(invalid("property with empty name".into()));
            }
            if extractor.name == crate::graph::SOURCE_PROPERTY {
                return Err(invalid(format!(
                    "'{}' is reserved for provenance",
                    extractor.name
                )));
            }
            if !names.insert(extractor.name.as_str()) {
                return Err(invalid(format!("duplicate property '{}'", extractor.name)));
            }
        }

        for key in &self.merge_on {
            if !names.contains(key.as_str()) {
                return Err(invalid(format!("merge_on names undeclared property '{}'", key)));
            }
        }
        for key in &self.unique {
            if !names.contains(key.as_str()) {
                return Err(invalid(format!("unique names undeclared property '{}'", key)));
            }
        }

        for child in &self.children {
            if child.relationship.trim().is_empty() {
                return Err(invalid(format!(
                    "relation to '{}' has no name",
                    child.schema.label
                )));
            }
            child.schema.validate()?;
        }

        Ok(())
    }

    /// All labels declared in this tree, depth-first
    pub fn labels(&self) -> Vec<&str> {
        let mut out = vec![self.label.as_str()];
        for child in &self.children {
            out.extend(child.schema.labels());
        }
        out
    }

    /// Every `(label, property)` uniqueness constraint in this tree
    pub fn unique_constraints(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .unique
            .iter()
            .map(|p| (self.label.as_str(), p.as_str()))
            .collect();
        for child in &self.children {
            out.extend(child.schema.unique_constraints());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directives_from_yaml() {
        let model = SchemaModel::from_yaml(
            r#"
label: figure
locator: "//fig"
properties:
  - name: fig_id
    read: "attribute:id"
    required: true
  - name: caption
    locator: caption
    transforms: [collapse_whitespace, "default:none"]
  - name: panels
    locator: sd-panel
    read: count
children:
  - relationship: has_panel
    schema:
      label: panel
      locator: sd-panel
"#,
        )
        .unwrap();

        assert_eq!(model.label, "figure");
        assert_eq!(model.properties[0].read, Read::Attribute("id".into()));
        assert!(model.properties[0].required);
        assert_eq!(
            model.properties[1].transforms,
            vec![Transform::CollapseWhitespace, Transform::Default("none".into())]
        );
        assert_eq!(model.properties[2].read, Read::Count);
        assert_eq!(model.children[0].schema.label, "panel");
        assert_eq!(model.labels(), vec!["figure", "panel"]);
    }

    #[test]
    fn rejects_unknown_directive() {
        let err = SchemaModel::from_yaml(
            r#"
label: x
properties:
  - name: a
    read: "sniff"
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_merge_on_undeclared_property() {
        let err = SchemaModel::from_yaml(
            r#"
label: journal
properties:
  - name: name
merge_on: [issn]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }

    #[test]
    fn collects_unique_constraints_across_the_tree() {
        let model = SchemaModel::from_yaml(
            r#"
label: ontology
properties:
  - name: name
children:
  - relationship: defines
    schema:
      label: class
      properties:
        - name: key
        - name: title
      unique: [key]
"#,
        )
        .unwrap();
        assert_eq!(model.unique_constraints(), vec![("class", "key")]);

        let err = SchemaModel::from_yaml("label: x\nproperties:\n  - name: a\nunique: [b]\n");
        assert!(matches!(err, Err(SchemaError::Invalid { .. })));
    }

    #[test]
    fn rejects_reserved_source_property() {
        let err = SchemaModel::from_yaml("label: x\nproperties:\n  - name: source\n");
        assert!(err.is_err());
    }

    #[test]
    fn join_keeps_whitespace_separator() {
        let t = Transform::try_from("join: ".to_string()).unwrap();
        assert_eq!(t, Transform::Join(" ".into()));
        let joined = t.apply(PropertyValue::from(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(joined, PropertyValue::from("a b"));
    }

    #[test]
    fn transforms_apply_elementwise_and_in_order() {
        let extractor = PropertyExtractor::new("ids")
            .with_transform(Transform::Split("///".into()))
            .with_transform(Transform::Lowercase);
        let value = extractor.finish(PropertyValue::from(" G1 /// g2 ///"));
        assert_eq!(value, PropertyValue::from(vec!["g1".to_string(), "g2".to_string()]));
    }

    #[test]
    fn default_and_to_int() {
        assert_eq!(
            Transform::Default("n/a".into()).apply(PropertyValue::from("")),
            PropertyValue::from("n/a")
        );
        assert_eq!(Transform::ToInt.apply(PropertyValue::from(" 42 ")), PropertyValue::Int(42));
        assert_eq!(Transform::ToInt.apply(PropertyValue::from("x")), PropertyValue::from("x"));
    }

    #[test]
    fn collapse_whitespace_folds_runs() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
    }
}
