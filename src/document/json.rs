//! JSON records as document elements
//!
//! An object's children are its fields, named by key; array values are
//! flattened so that `author` selects every author in order. Object keys
//! keep their document order (serde_json `preserve_order`), so `*` and `//`
//! selections across different keys follow the record as written.

use super::element::Element;
use serde_json::Value;

impl Element for Value {
    fn children(&self) -> Vec<(&str, &Self)> {
        let mut out = Vec::new();
        match self {
            Value::Object(map) => {
                for (key, value) in map {
                    push_flattened(key.as_str(), value, &mut out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    push_flattened("item", item, &mut out);
                }
            }
            _ => {}
        }
        out
    }

    fn text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Object(_) => String::new(),
            Value::Array(items) => items
                .iter()
                .map(Element::text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Null | Value::Object(_) => None,
            Value::Array(items) => items.first().map(Element::text),
            scalar => Some(Element::text(scalar)),
        }
    }
}

fn push_flattened<'v>(key: &'v str, value: &'v Value, out: &mut Vec<(&'v str, &'v Value)>) {
    match value {
        Value::Array(items) => {
            for item in items {
                push_flattened(key, item, out);
            }
        }
        other => out.push((key, other)),
    }
}

#[cfg(test)]
mod tests {
    use crate::document::Element;
    use crate::graph::PropertyValue;
    use crate::schema::{Locator, PropertyExtractor, Read, Transform};
    use serde_json::json;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    fn record() -> serde_json::Value {
        json!({
            "message": {
                "DOI": "10.1/ABC",
                "title": ["Deep", "Title"],
                "author": [
                    {"given": "Ada", "family": "Lovelace", "sequence": "first"},
                    {"given": "Alan", "family": "Turing", "sequence": "additional"}
                ],
                "issued": {"date-parts": [[2021, 5, 3]]},
                "reference": []
            }
        })
    }

    #[test]
    fn arrays_flatten_in_order() {
        let rec = record();
        let authors = rec.locate(&loc("message/author"));
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].attribute("family").as_deref(), Some("Lovelace"));
        assert_eq!(authors[1].attribute("family").as_deref(), Some("Turing"));
    }

    #[test]
    fn wildcard_follows_key_order_of_the_record() {
        let rec: serde_json::Value =
            serde_json::from_str(r#"{"zeta": "1", "alpha": "2", "mid": ["3", "4"]}"#).unwrap();
        let texts: Vec<String> = rec.locate(&loc("*")).iter().map(|v| v.text()).collect();
        assert_eq!(texts, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn filters_on_fields() {
        let rec = record();
        let first = rec.locate(&loc("message/author[@sequence='first']"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attribute("given").as_deref(), Some("Ada"));
    }

    #[test]
    fn reads_scalars_lists_and_nested_arrays() {
        let rec = record();
        let doi = PropertyExtractor::new("doi")
            .at(loc("message/DOI"))
            .with_transform(Transform::Lowercase);
        assert_eq!(rec.read(&doi), PropertyValue::from("10.1/abc"));

        let title = PropertyExtractor::new("title")
            .at(loc("message/title"))
            .reading(Read::TextList)
            .with_transform(Transform::Join(" ".into()));
        assert_eq!(rec.read(&title), PropertyValue::from("Deep Title"));

        let year = PropertyExtractor::new("year")
            .at(loc("message/issued/date-parts"))
            .with_transform(Transform::ToInt);
        assert_eq!(rec.read(&year), PropertyValue::Int(2021));

        let refs = PropertyExtractor::new("refs")
            .at(loc("message/reference"))
            .reading(Read::Count);
        assert_eq!(rec.read(&refs), PropertyValue::Int(0));
    }

    #[test]
    fn missing_fields_read_as_empty() {
        let rec = record();
        let missing = PropertyExtractor::new("x").at(loc("message/abstract"));
        assert_eq!(rec.read(&missing), PropertyValue::from(""));
        assert_eq!(rec.attribute("nope"), None);
    }
}
