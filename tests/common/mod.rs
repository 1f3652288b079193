//! Shared helpers for panelgraph integration tests
//!
//! Builds small annotated-article documents in memory and wires them into
//! an in-memory store.

#![allow(dead_code)]

use panelgraph::document::{Format, MemorySource};
use panelgraph::{
    Document, IngestPipeline, OpenStore, RunSummary, SchemaModel, SchemaRegistry, SharedStore,
    SourceDocument, SqliteStore,
};
use std::sync::Arc;

/// One raw mention inside a panel
pub struct Tag<'a> {
    pub role: &'a str,
    pub entity_type: &'a str,
    pub ext_id: &'a str,
    pub text: &'a str,
}

pub fn tag<'a>(role: &'a str, entity_type: &'a str, ext_id: &'a str, text: &'a str) -> Tag<'a> {
    Tag {
        role,
        entity_type,
        ext_id,
        text,
    }
}

pub fn tag_xml(t: &Tag) -> String {
    let ext = if t.ext_id.is_empty() {
        String::new()
    } else {
        format!(r#" external_id="{}""#, t.ext_id)
    };
    format!(
        r#"<sd-tag role="{}" type="{}" category="entity"{}>{}</sd-tag>"#,
        t.role, t.entity_type, ext, t.text
    )
}

pub fn panel_xml(panel_id: &str, caption: &str, tags: &[Tag]) -> String {
    let body: String = tags.iter().map(tag_xml).collect::<Vec<_>>().join(" ");
    format!(
        r#"<sd-panel panel_id="{}">{} {}</sd-panel>"#,
        panel_id, caption, body
    )
}

/// A figure; `None` as id produces a figure missing its required id.
pub fn figure_xml(fig_id: Option<&str>, label: &str, panels: &[String]) -> String {
    let id = fig_id.map(|id| format!(r#" id="{}""#, id)).unwrap_or_default();
    format!(
        "<fig{}><label>{}</label><caption>{}</caption>{}</fig>",
        id,
        label,
        label,
        panels.concat()
    )
}

pub fn article_xml(doi: &str, figures: &[String]) -> String {
    format!(
        r#"<?xml version="1.0"?><article doi="{}"><title>Test article</title>{}</article>"#,
        doi,
        figures.concat()
    )
}

pub fn markup(provenance: &str, xml: &str) -> SourceDocument {
    let root = Document::parse(Format::Markup, xml).expect("test markup parses");
    SourceDocument::new(provenance, root)
}

pub fn json(provenance: &str, text: &str) -> SourceDocument {
    let root = Document::parse(Format::Json, text).expect("test json parses");
    SourceDocument::new(provenance, root)
}

pub fn schema(name: &str) -> SchemaModel {
    SchemaRegistry::with_builtins()
        .unwrap()
        .get(name)
        .unwrap()
        .clone()
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn pipeline(store: &Arc<SqliteStore>, schema_name: &str) -> IngestPipeline {
    let shared: SharedStore = store.clone();
    IngestPipeline::new(shared, schema(schema_name)).with_workers(2)
}

/// Ingest documents through the concurrent pipeline.
pub async fn ingest(pipeline: &IngestPipeline, documents: Vec<SourceDocument>) -> RunSummary {
    let mut source = MemorySource::new(documents);
    pipeline.run(&mut source).await.unwrap()
}

/// A single-panel article, as produced by the upstream annotation service.
pub fn single_panel_article(doi: &str, tags: &[Tag]) -> String {
    article_xml(
        doi,
        &[figure_xml(
            Some("f1"),
            "Figure 1",
            &[panel_xml("p1", "Knockdown assay.", tags)],
        )],
    )
}
