//! Relative path expressions selecting sub-elements of a document element
//!
//! Grammar (a small XPath subset):
//!
//! - `a/b/c`: child steps, separated by `/`
//! - `.`: the element itself; an empty path means the same
//! - `*`: any child
//! - `name[@attr='value']`: child named `name` whose attribute equals `value`
//! - `name[@attr]`: child named `name` that carries `attr`
//! - `//name`: any descendant named `name` (also valid mid-path: `body//fig`)
//!
//! Namespace prefixes (`jats:fig`) are ignored when matching names.

use super::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a step moves from its context element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
}

/// What a step's name test accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    /// `.`
    SelfElement,
    /// `*`
    Any,
    Named(String),
}

/// Attribute predicate on a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrFilter {
    pub attribute: String,
    /// `None` tests presence only
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub axis: Axis,
    pub name: NameTest,
    pub filter: Option<AttrFilter>,
}

impl Step {
    /// Whether a child reached under `name` satisfies this step's name test.
    pub fn accepts_name(&self, name: &str) -> bool {
        match &self.name {
            NameTest::Any => true,
            NameTest::Named(expected) => local_name(name) == expected,
            NameTest::SelfElement => false,
        }
    }
}

/// A parsed locator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    raw: String,
    steps: Vec<Step>,
}

impl Locator {
    /// The locator selecting the context element itself
    pub fn self_locator() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let text = raw.trim();
        let invalid = |reason: &str| SchemaError::InvalidLocator {
            locator: raw.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() || text == "." {
            return Ok(Self {
                raw: text.to_string(),
                steps: Vec::new(),
            });
        }

        let (mut axis, body) = match text.strip_prefix("//") {
            Some(rest) => (Axis::Descendant, rest),
            None if text.starts_with('/') => return Err(invalid("absolute paths are not supported")),
            None => (Axis::Child, text),
        };

        let segments = split_segments(body).ok_or_else(|| invalid("unbalanced brackets"))?;
        let mut steps = Vec::new();
        let last = segments.len().saturating_sub(1);

        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                // `a//b`: an empty segment turns the next step into a descendant search
                if i == last || axis == Axis::Descendant {
                    return Err(invalid("empty path segment"));
                }
                axis = Axis::Descendant;
                continue;
            }
            let mut step = parse_step(segment).map_err(|reason| invalid(&reason))?;
            if step.name == NameTest::SelfElement && axis == Axis::Descendant {
                return Err(invalid("'.' cannot follow '//'"));
            }
            step.axis = axis;
            steps.push(step);
            axis = Axis::Child;
        }

        Ok(Self {
            raw: text.to_string(),
            steps,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// True if the locator selects the context element itself
    pub fn is_self(&self) -> bool {
        self.steps.iter().all(|s| s.name == NameTest::SelfElement && s.filter.is_none())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

impl TryFrom<String> for Locator {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Locator::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.raw
    }
}

/// Strip a namespace prefix: `jats:fig` -> `fig`.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Split on `/` outside of `[...]` and quotes. Returns None when unbalanced.
fn split_segments(body: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in body.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1)?,
            (None, '/') if depth == 0 => {
                segments.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    segments.push(&body[start..]);
    Some(segments)
}

fn parse_step(segment: &str) -> Result<Step, String> {
    let (name_part, filter) = match segment.find('[') {
        Some(open) => {
            let predicate = segment[open..]
                .strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .ok_or_else(|| format!("malformed predicate in '{}'", segment))?;
            (&segment[..open], Some(parse_filter(predicate)?))
        }
        None => (segment, None),
    };

    let name = match name_part.trim() {
        "." => NameTest::SelfElement,
        "*" => NameTest::Any,
        "" => return Err(format!("missing element name in '{}'", segment)),
        other => {
            let local = local_name(other);
            if !local
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(format!("invalid element name '{}'", other));
            }
            NameTest::Named(local.to_string())
        }
    };

    Ok(Step {
        axis: Axis::Child,
        name,
        filter,
    })
}

fn parse_filter(predicate: &str) -> Result<AttrFilter, String> {
    let predicate = predicate.trim();
    let body = predicate
        .strip_prefix('@')
        .ok_or_else(|| format!("predicate must start with '@': [{}]", predicate))?;

    match body.split_once('=') {
        None => Ok(AttrFilter {
            attribute: local_name(body.trim()).to_string(),
            value: None,
        }),
        Some((attr, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or_else(|| format!("predicate value must be quoted: [{}]", predicate))?;
            Ok(AttrFilter {
                attribute: local_name(attr.trim()).to_string(),
                value: Some(unquoted.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_dot_select_self() {
        assert!(Locator::parse("").unwrap().is_self());
        assert!(Locator::parse(".").unwrap().is_self());
        assert!(!Locator::parse("fig").unwrap().is_self());
    }

    #[test]
    fn parses_child_path_with_filter() {
        let loc = Locator::parse("body/sec[@sec-type='results']/fig").unwrap();
        let steps = loc.steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].name, NameTest::Named("sec".into()));
        assert_eq!(
            steps[1].filter,
            Some(AttrFilter {
                attribute: "sec-type".into(),
                value: Some("results".into()),
            })
        );
        assert!(steps.iter().all(|s| s.axis == Axis::Child));
    }

    #[test]
    fn parses_descendant_axes() {
        let loc = Locator::parse("//fig").unwrap();
        assert_eq!(loc.steps()[0].axis, Axis::Descendant);

        let loc = Locator::parse("body//sd-tag").unwrap();
        assert_eq!(loc.steps()[0].axis, Axis::Child);
        assert_eq!(loc.steps()[1].axis, Axis::Descendant);
    }

    #[test]
    fn slash_inside_quoted_value_does_not_split() {
        let loc = Locator::parse("x[@href='a/b']").unwrap();
        assert_eq!(loc.steps().len(), 1);
    }

    #[test]
    fn namespace_prefix_is_ignored() {
        let loc = Locator::parse("jats:fig").unwrap();
        assert_eq!(loc.steps()[0].name, NameTest::Named("fig".into()));
        assert!(loc.steps()[0].accepts_name("xlink:fig"));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(Locator::parse("/abs").is_err());
        assert!(Locator::parse("a/").is_err());
        assert!(Locator::parse("a[@b='c'").is_err());
        assert!(Locator::parse("a[b]").is_err());
        assert!(Locator::parse("a///b").is_err());
    }

    #[test]
    fn deserializes_from_string() {
        let loc: Locator = serde_yaml::from_str("\"//fig\"").unwrap();
        assert_eq!(loc.to_string(), "//fig");
    }
}
