//! Condensation, entity resolution and hypothesis inference over ingested articles

mod common;

use common::*;
use panelgraph::resolve::{labels, rels};
use panelgraph::storage::NodeFilter;
use panelgraph::{list_hypotheses, GraphStore, Resolver};

#[tokio::test]
async fn majority_casing_becomes_the_condtag_text() {
    let store = memory_store();
    let xml = single_panel_article(
        "10.1/a",
        &[
            tag("intervention", "gene", "G1", "geneA"),
            tag("intervention", "gene", "G1", "geneA"),
            tag("intervention", "gene", "G1", "GENEA"),
            tag("intervention", "gene", "G1", "geneA"),
        ],
    );
    ingest(&pipeline(&store, "sourcedata"), vec![markup("doc-a", &xml)]).await;

    let report = Resolver::new(store.as_ref()).run().unwrap();
    assert_eq!(report.condtags, 1);
    assert!(report.condensation_violations.is_empty());

    let condtags = store
        .find_nodes(&NodeFilter::new().with_label(labels::CONDTAG))
        .unwrap();
    assert_eq!(condtags[0].text("text"), Some("geneA"));
    assert_eq!(store.edge_count(Some(rels::CONDENSED_INTO)).unwrap(), 4);
}

#[tokio::test]
async fn entities_are_stable_across_runs_and_documents() {
    let store = memory_store();
    let pipeline = pipeline(&store, "sourcedata");

    let first = single_panel_article("10.1/a", &[tag("intervention", "gene", "G1", "geneA")]);
    ingest(&pipeline, vec![markup("doc-a", &first)]).await;
    Resolver::new(store.as_ref()).run().unwrap();
    let before = store
        .find_nodes(&NodeFilter::new().with_label(labels::ENTITY))
        .unwrap();

    let second = single_panel_article("10.1/b", &[tag("assayed", "gene", "G1", "Gene-A")]);
    ingest(&pipeline, vec![markup("doc-b", &second)]).await;
    let report = Resolver::new(store.as_ref()).run().unwrap();
    let after = store
        .find_nodes(&NodeFilter::new().with_label(labels::ENTITY))
        .unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 1);
    assert_eq!(before[0].id, after[0].id);
    assert_eq!(after[0].text("name"), Some("geneA"));
    assert_eq!(report.condtags, 2);
    assert!(report.resolution_violations.is_empty());

    // Both condtags point at the one entity
    let linked = store.edges_to(&after[0].id, Some(rels::IDENTIFIED_BY)).unwrap();
    assert_eq!(linked.len(), 2);
}

#[tokio::test]
async fn two_panels_with_the_same_pair_share_one_hypothesis() {
    let store = memory_store();
    let tags = [
        tag("intervention", "gene", "G1", "geneA"),
        tag("assayed", "protein", "P1", "proteinB"),
    ];
    let xml = article_xml(
        "10.1/a",
        &[
            figure_xml(Some("f1"), "Figure 1", &[panel_xml("p1", "Blot.", &tags)]),
            figure_xml(Some("f2"), "Figure 2", &[panel_xml("p2", "Imaging.", &tags)]),
        ],
    );
    ingest(&pipeline(&store, "sourcedata"), vec![markup("doc-a", &xml)]).await;

    let report = Resolver::new(store.as_ref()).run().unwrap();
    assert_eq!(report.hypotheses, 1);

    let hypotheses = list_hypotheses(store.as_ref(), false).unwrap();
    assert_eq!(hypotheses.len(), 1);
    assert_eq!(hypotheses[0].panel_count, 2);
    assert_eq!(hypotheses[0].figure_count, 2);
    assert_eq!(hypotheses[0].article_count, 1);

    // A second run observes nothing new
    Resolver::new(store.as_ref()).run().unwrap();
    let again = list_hypotheses(store.as_ref(), false).unwrap();
    assert_eq!(again[0].panel_count, 2);
    assert_eq!(store.edge_count(Some(rels::HYPOTHESIS)).unwrap(), 1);
}

#[tokio::test]
async fn shared_text_marks_a_self_test() {
    let store = memory_store();
    let xml = single_panel_article(
        "10.1/a",
        &[
            tag("intervention", "gene", "G7", "TP53"),
            tag("assayed", "protein", "P7", "tp53"),
            tag("assayed", "protein", "P8", "MDM2"),
        ],
    );
    ingest(&pipeline(&store, "sourcedata"), vec![markup("doc-a", &xml)]).await;
    Resolver::new(store.as_ref()).run().unwrap();

    let visible = list_hypotheses(store.as_ref(), false).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].assayed_name, "MDM2");

    let all = list_hypotheses(store.as_ref(), true).unwrap();
    assert_eq!(all.len(), 2);
    let self_test = all.iter().find(|h| h.self_test).unwrap();
    assert_eq!(self_test.intervention_name, "TP53");
    assert_eq!(self_test.assayed_name, "tp53");
}

#[tokio::test]
async fn unidentified_mentions_resolve_by_text() {
    let store = memory_store();
    let xml = single_panel_article(
        "10.1/a",
        &[
            tag("assayed", "cell", "", "HeLa cells"),
            tag("assayed", "cell", "", "hela cells"),
            tag("intervention", "molecule", "", "nocodazole"),
            tag("intervention", "molecule", "", "  "),
        ],
    );
    ingest(&pipeline(&store, "sourcedata"), vec![markup("doc-a", &xml)]).await;

    let report = Resolver::new(store.as_ref()).run().unwrap();
    assert_eq!(report.condtags, 2);
    assert_eq!(report.entities, 2);
    assert_eq!(report.dropped.empty_text, 1);
    assert_eq!(report.hypotheses, 1);

    let cells = store
        .find_nodes(&NodeFilter::new().with_label(labels::ENTITY).with_property("key", "entity:cell:hela cells"))
        .unwrap();
    assert_eq!(cells.len(), 1);
}

#[tokio::test]
async fn related_by_term_links_quasi_synonyms() {
    let store = memory_store();
    let xml = single_panel_article(
        "10.1/a",
        &[
            tag("assayed", "protein", "P1", "cyclin B"),
            tag("assayed", "gene", "G1", "Cyclin B"),
        ],
    );
    ingest(&pipeline(&store, "sourcedata"), vec![markup("doc-a", &xml)]).await;
    Resolver::new(store.as_ref()).run().unwrap();

    let entities = store
        .find_nodes(&NodeFilter::new().with_label(labels::ENTITY))
        .unwrap();
    assert_eq!(entities.len(), 2);
    assert_eq!(store.node_count(Some(labels::TERM)).unwrap(), 1);

    let related = panelgraph::resolve::related_by_term(store.as_ref(), &entities[0].id).unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].entity, entities[1].id);
    assert_eq!(related[0].shared_terms, vec!["cyclin b".to_string()]);
}
