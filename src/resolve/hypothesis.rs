//! Hypothesis inference: intervention Entity -> assayed Entity edges

use super::entity::{keys, shares_term};
use super::rels;
use crate::graph::{Edge, EdgeId, NodeId, Properties, PropertyValue};
use crate::storage::{with_transaction, EdgeFilter, GraphStore, StorageResult};
use std::collections::BTreeSet;

/// Annotation names on hypothesis edges
pub mod annotations {
    pub const PANELS: &str = "panels";
    pub const FIGURES: &str = "figures";
    pub const ARTICLES: &str = "articles";
    pub const PANEL_COUNT: &str = "panel_count";
    pub const FIGURE_COUNT: &str = "figure_count";
    pub const ARTICLE_COUNT: &str = "article_count";
    pub const SELF_TEST: &str = "self_test";
}

/// Where a pairing was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub panel: String,
    pub figures: Vec<String>,
    pub article: Option<String>,
}

/// A stored hypothesis edge with its endpoints' names
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub edge: EdgeId,
    pub intervention: NodeId,
    pub assayed: NodeId,
    pub intervention_name: String,
    pub assayed_name: String,
    pub panel_count: i64,
    pub figure_count: i64,
    pub article_count: i64,
    pub self_test: bool,
}

/// Merge the hypothesis edge for one (intervention, assayed) pair and fold
/// the observation into its annotation sets. Re-recording an observation
/// already present leaves every counter unchanged.
///
/// Returns true when the edge was created by this call.
pub fn record_observation(
    store: &dyn GraphStore,
    intervention: &NodeId,
    assayed: &NodeId,
    observation: &Observation,
) -> StorageResult<bool> {
    let self_test = intervention == assayed || shares_term(store, intervention, assayed)?;

    with_transaction(store, |tx| {
        let merged = tx.merge_relationship(intervention, assayed, rels::HYPOTHESIS, &Properties::new())?;
        let existing = tx
            .find_edges(
                &EdgeFilter::new()
                    .with_relationship(rels::HYPOTHESIS)
                    .with_source(intervention.clone())
                    .with_target(assayed.clone()),
            )?
            .into_iter()
            .find(|e| e.id == merged.id);

        let (mut panels, mut figures, mut articles, was_self_test) = match &existing {
            Some(edge) => (
                string_set(edge, annotations::PANELS),
                string_set(edge, annotations::FIGURES),
                string_set(edge, annotations::ARTICLES),
                edge.flag(annotations::SELF_TEST),
            ),
            None => Default::default(),
        };

        panels.insert(observation.panel.clone());
        figures.extend(observation.figures.iter().cloned());
        articles.extend(observation.article.iter().cloned());

        let mut set = Properties::new();
        set.insert(annotations::PANEL_COUNT.into(), (panels.len() as i64).into());
        set.insert(annotations::FIGURE_COUNT.into(), (figures.len() as i64).into());
        set.insert(annotations::ARTICLE_COUNT.into(), (articles.len() as i64).into());
        set.insert(annotations::PANELS.into(), to_array(&panels));
        set.insert(annotations::FIGURES.into(), to_array(&figures));
        set.insert(annotations::ARTICLES.into(), to_array(&articles));
        set.insert(annotations::SELF_TEST.into(), (was_self_test || self_test).into());
        tx.update_relationship(&merged.id, &set)?;

        Ok(merged.created)
    })
}

fn string_set(edge: &Edge, key: &str) -> BTreeSet<String> {
    edge.properties
        .get(key)
        .map(PropertyValue::string_items)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

fn to_array(set: &BTreeSet<String>) -> PropertyValue {
    PropertyValue::from(set.iter().cloned().collect::<Vec<String>>())
}

/// Stored hypotheses, most observed first. Self-tests are left out unless
/// `include_self_tests` is set.
pub fn list_hypotheses(
    store: &dyn GraphStore,
    include_self_tests: bool,
) -> StorageResult<Vec<Hypothesis>> {
    let mut out = Vec::new();
    for edge in store.find_edges(&EdgeFilter::new().with_relationship(rels::HYPOTHESIS))? {
        let self_test = edge.flag(annotations::SELF_TEST);
        if self_test && !include_self_tests {
            continue;
        }
        out.push(Hypothesis {
            intervention_name: entity_name(store, &edge.source)?,
            assayed_name: entity_name(store, &edge.target)?,
            panel_count: edge.counter(annotations::PANEL_COUNT),
            figure_count: edge.counter(annotations::FIGURE_COUNT),
            article_count: edge.counter(annotations::ARTICLE_COUNT),
            self_test,
            edge: edge.id,
            intervention: edge.source,
            assayed: edge.target,
        });
    }
    out.sort_by(|a, b| {
        b.panel_count
            .cmp(&a.panel_count)
            .then_with(|| a.intervention_name.cmp(&b.intervention_name))
            .then_with(|| a.assayed_name.cmp(&b.assayed_name))
    });
    Ok(out)
}

fn entity_name(store: &dyn GraphStore, id: &NodeId) -> StorageResult<String> {
    Ok(store
        .load_node(id)?
        .and_then(|n| n.text(keys::NAME).map(str::to_string))
        .unwrap_or_default())
}
