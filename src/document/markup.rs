//! Owned XML element tree built with quick-xml

use super::element::Element;
use super::DocumentError;
use crate::schema::local_name;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Element or character data inside an element
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with namespace prefixes stripped from names
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub content: Vec<XmlNode>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    ///
    /// Whitespace is kept as-is so mixed content (`a <i>b</i> c`) reads back
    /// with its spacing; schemas normalise it with transforms.
    pub fn parse(xml: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        // Open elements; the root is the first to close at depth zero
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => stack.push(start_element(e)?),
                Event::Empty(ref e) => {
                    let element = start_element(e)?;
                    close(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DocumentError::Malformed("unexpected closing tag".into()))?;
                    close(&mut stack, &mut root, element)?;
                }
                Event::Text(ref e) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.content.push(XmlNode::Text(e.unescape()?.into_owned()));
                    }
                }
                Event::CData(e) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                        parent.content.push(XmlNode::Text(text));
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(DocumentError::Malformed(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or(DocumentError::Empty)
    }

    /// Child elements, skipping text
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.content.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    fn push_text(&self, out: &mut String) {
        for node in &self.content {
            match node {
                XmlNode::Text(t) => out.push_str(t),
                XmlNode::Element(e) => e.push_text(out),
            }
        }
    }
}

fn start_element(e: &BytesStart<'_>) -> Result<XmlElement, DocumentError> {
    let name = std::str::from_utf8(e.local_name().as_ref())
        .map_err(|err| DocumentError::Malformed(err.to_string()))?
        .to_string();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocumentError::Malformed(err.to_string()))?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|err| DocumentError::Malformed(err.to_string()))?
            .to_string();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }

    Ok(XmlElement {
        name,
        attributes,
        content: Vec::new(),
    })
}

fn close(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => parent.content.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(DocumentError::Malformed(format!(
                "second root element <{}>",
                element.name
            )))
        }
    }
    Ok(())
}

impl Element for XmlElement {
    fn children(&self) -> Vec<(&str, &Self)> {
        self.elements().map(|e| (e.name.as_str(), e)).collect()
    }

    fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn attribute(&self, name: &str) -> Option<String> {
        let wanted = local_name(name);
        self.attributes
            .iter()
            .find(|(key, _)| key == wanted)
            .map(|(_, value)| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use crate::schema::{Locator, PropertyExtractor, Read, Transform};

    const FIGURE: &str = r#"<?xml version="1.0"?>
<article xmlns:xlink="http://www.w3.org/1999/xlink" doi="10.1/x">
  <title>Knockdown <i>of</i> geneX</title>
  <fig id="f1"><label>Figure 1</label></fig>
  <body>
    <fig id="f2"><sd-panel panel_id="p1">treated with <sd-tag role="intervention" type="gene">geneX</sd-tag></sd-panel></fig>
  </body>
  <fig id="f3" xlink:href="img/f3.png"/>
</article>"#;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[test]
    fn parses_nested_structure() {
        let root = XmlElement::parse(FIGURE).unwrap();
        assert_eq!(root.name, "article");
        assert_eq!(root.attribute("doi").as_deref(), Some("10.1/x"));
        assert_eq!(root.elements().count(), 4);
    }

    #[test]
    fn mixed_content_keeps_spacing() {
        let root = XmlElement::parse(FIGURE).unwrap();
        let title = PropertyExtractor::new("title")
            .at(loc("title"))
            .with_transform(Transform::CollapseWhitespace);
        assert_eq!(root.read(&title), PropertyValue::from("Knockdown of geneX"));
    }

    #[test]
    fn descendant_search_is_in_document_order() {
        let root = XmlElement::parse(FIGURE).unwrap();
        let ids: Vec<_> = root
            .locate(&loc("//fig"))
            .iter()
            .filter_map(|f| f.attribute("id"))
            .collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);

        // Child axis only sees direct children
        assert_eq!(root.locate(&loc("fig")).len(), 2);
    }

    #[test]
    fn attribute_filter_and_prefix_stripping() {
        let root = XmlElement::parse(FIGURE).unwrap();
        let found = root.locate(&loc("fig[@id='f3']"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attribute("xlink:href").as_deref(), Some("img/f3.png"));

        let tag = root.locate(&loc("//sd-tag[@role='intervention']"));
        assert_eq!(tag[0].text(), "geneX");
    }

    #[test]
    fn reads_are_total_on_missing_structure() {
        let root = XmlElement::parse(FIGURE).unwrap();
        let missing = PropertyExtractor::new("x").at(loc("nothing/here"));
        assert_eq!(root.read(&missing), PropertyValue::from(""));

        let count = PropertyExtractor::new("n").at(loc("//fig")).reading(Read::Count);
        assert_eq!(root.read(&count), PropertyValue::Int(3));

        let exists = PropertyExtractor::new("e").at(loc("abstract")).reading(Read::Exists);
        assert_eq!(root.read(&exists), PropertyValue::Bool(false));

        let ids = PropertyExtractor::new("ids")
            .at(loc("//fig"))
            .reading(Read::AttributeList("id".into()));
        assert_eq!(
            root.read(&ids),
            PropertyValue::from(vec!["f1".to_string(), "f2".to_string(), "f3".to_string()])
        );
    }

    #[test]
    fn rejects_unbalanced_markup() {
        assert!(XmlElement::parse("<a><b></a>").is_err());
        assert!(XmlElement::parse("<a>").is_err());
        assert!(matches!(XmlElement::parse("  "), Err(DocumentError::Empty)));
    }
}
