//! Uniform navigation interface over parsed documents

use crate::graph::PropertyValue;
use crate::schema::{Axis, Locator, NameTest, PropertyExtractor, Read, Step};
use std::collections::HashSet;

/// A node of a parsed document, seen through the schema's eyes.
///
/// Implementors supply three primitives (named children, text, attributes);
/// `locate` and `read` are derived from them and shared by every format.
/// Both are total: missing structure yields empty results, never errors.
pub trait Element: Sized {
    /// Child elements in document order, each with the name it is reached by.
    fn children(&self) -> Vec<(&str, &Self)>;

    /// Text content of this element and its descendants.
    fn text(&self) -> String;

    /// Attribute value (or scalar field, for formats without attributes).
    fn attribute(&self, name: &str) -> Option<String>;

    /// Elements selected by `locator`, in document order, without duplicates.
    fn locate(&self, locator: &Locator) -> Vec<&Self> {
        let mut current: Vec<&Self> = vec![self];
        for step in locator.steps() {
            let mut next = Vec::new();
            let mut seen = HashSet::new();
            for element in current {
                for found in apply_step(element, step) {
                    if seen.insert(found as *const Self) {
                        next.push(found);
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Apply an extractor: locate, read, then run its transforms.
    fn read(&self, extractor: &PropertyExtractor) -> PropertyValue {
        let targets = self.locate(&extractor.locator);
        let raw = match &extractor.read {
            Read::Text => PropertyValue::String(
                targets.first().map(|t| t.text()).unwrap_or_default(),
            ),
            Read::Attribute(name) => PropertyValue::String(
                targets
                    .iter()
                    .find_map(|t| t.attribute(name))
                    .unwrap_or_default(),
            ),
            Read::TextList => PropertyValue::Array(
                targets
                    .iter()
                    .map(|t| t.text())
                    .filter(|s| !s.trim().is_empty())
                    .map(PropertyValue::String)
                    .collect(),
            ),
            Read::AttributeList(name) => PropertyValue::Array(
                targets
                    .iter()
                    .filter_map(|t| t.attribute(name))
                    .map(PropertyValue::String)
                    .collect(),
            ),
            Read::Count => PropertyValue::Int(targets.len() as i64),
            Read::Literal(value) => PropertyValue::String(value.clone()),
            Read::Exists => PropertyValue::Bool(!targets.is_empty()),
        };
        extractor.finish(raw)
    }
}

fn apply_step<'e, E: Element>(element: &'e E, step: &Step) -> Vec<&'e E> {
    let mut out = Vec::new();
    match (&step.name, step.axis) {
        (NameTest::SelfElement, _) => {
            if passes_filter(element, step) {
                out.push(element);
            }
        }
        (_, Axis::Child) => {
            for (name, child) in element.children() {
                if step.accepts_name(name) && passes_filter(child, step) {
                    out.push(child);
                }
            }
        }
        (_, Axis::Descendant) => collect_descendants(element, step, &mut out),
    }
    out
}

/// Pre-order walk, so matches come out in document order.
fn collect_descendants<'e, E: Element>(element: &'e E, step: &Step, out: &mut Vec<&'e E>) {
    for (name, child) in element.children() {
        if step.accepts_name(name) && passes_filter(child, step) {
            out.push(child);
        }
        collect_descendants(child, step, out);
    }
}

fn passes_filter<E: Element>(element: &E, step: &Step) -> bool {
    match &step.filter {
        None => true,
        Some(filter) => match (element.attribute(&filter.attribute), &filter.value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == *expected,
        },
    }
}
