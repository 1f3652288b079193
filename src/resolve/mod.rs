//! Resolution: panel mentions -> CondTags -> Entities/Terms -> hypotheses
//!
//! A run first condenses and resolves every panel, then infers hypotheses
//! from the stored resolution, so the outcome does not depend on the order
//! panels are visited in. Every write is a merge; re-running over the same
//! graph leaves it unchanged.

pub mod condense;
pub mod entity;
pub mod hypothesis;
pub mod mention;

pub use condense::{condense, CondKey, CondTag, Condensation, DropCounts, Violation};
pub use entity::{related_by_term, verify_resolution, RelatedEntity};
pub use hypothesis::{list_hypotheses, Hypothesis, Observation};
pub use mention::RawMention;

use crate::graph::{Node, NodeId};
use crate::storage::{GraphStore, NodeFilter, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Node labels written by resolution
pub mod labels {
    pub const CONDTAG: &str = "CondTag";
    pub const ENTITY: &str = "Entity";
    pub const TERM: &str = "Term";
}

/// Relationship types written by resolution
pub mod rels {
    pub const CONDENSED_INTO: &str = "condensed_into";
    pub const HAS_CONDTAG: &str = "has_condtag";
    pub const IDENTIFIED_BY: &str = "identified_by";
    pub const HAS_TERM: &str = "has_term";
    pub const HYPOTHESIS: &str = "hypothesis";
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Names of the ingested structure resolution reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub panel_label: String,
    /// panel -> mention
    pub tag_relationship: String,
    /// figure -> panel
    pub figure_relationship: String,
    pub intervention_role: String,
    pub assayed_role: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            panel_label: "panel".into(),
            tag_relationship: "has_tag".into(),
            figure_relationship: "has_panel".into(),
            intervention_role: "intervention".into(),
            assayed_role: "assayed".into(),
        }
    }
}

/// Summary of one resolution run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionReport {
    pub panels: usize,
    /// Totals in the store after the run
    pub condtags: usize,
    pub entities: usize,
    pub terms: usize,
    pub hypotheses: usize,
    pub entities_created: usize,
    pub terms_created: usize,
    pub hypotheses_created: usize,
    pub condensation_violations: Vec<Violation>,
    pub resolution_violations: Vec<Violation>,
    pub dropped: DropCounts,
}

impl ResolutionReport {
    pub fn violation_count(&self) -> usize {
        self.condensation_violations.len() + self.resolution_violations.len()
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "panels: {}, condtags: {}, entities: {} ({} new), terms: {} ({} new)",
            self.panels,
            self.condtags,
            self.entities,
            self.entities_created,
            self.terms,
            self.terms_created
        )?;
        writeln!(
            f,
            "hypotheses: {} ({} new)",
            self.hypotheses, self.hypotheses_created
        )?;
        write!(
            f,
            "dropped mentions: {} empty text, {} unclassifiable; violations: {} condensation, {} resolution",
            self.dropped.empty_text,
            self.dropped.unclassifiable,
            self.condensation_violations.len(),
            self.resolution_violations.len()
        )?;
        for v in self
            .condensation_violations
            .iter()
            .chain(&self.resolution_violations)
        {
            write!(f, "\n  {}", v)?;
        }
        Ok(())
    }
}

/// Roles resolved within one panel
struct PanelRoles {
    panel: Node,
    interventions: BTreeSet<NodeId>,
    assayed: BTreeSet<NodeId>,
}

/// Runs condensation, entity resolution and hypothesis inference over a store
pub struct Resolver<'s> {
    store: &'s dyn GraphStore,
    config: ResolutionConfig,
}

impl<'s> Resolver<'s> {
    pub fn new(store: &'s dyn GraphStore) -> Self {
        Self {
            store,
            config: ResolutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn run(&self) -> Result<ResolutionReport, ResolveError> {
        self.store.ensure_unique(labels::ENTITY, entity::keys::ENTITY_KEY)?;
        self.store.ensure_unique(labels::TERM, mention::props::TEXT)?;

        let mut report = ResolutionReport::default();
        let panels = self
            .store
            .find_nodes(&NodeFilter::new().with_label(&self.config.panel_label))?;
        report.panels = panels.len();

        let mut resolved = Vec::with_capacity(panels.len());
        for panel in panels {
            resolved.push(self.resolve_panel(panel, &mut report)?);
        }

        for roles in &resolved {
            self.infer_hypotheses(roles, &mut report)?;
        }

        report.resolution_violations = verify_resolution(self.store)?;
        report.condtags = self.store.node_count(Some(labels::CONDTAG))?;
        report.entities = self.store.node_count(Some(labels::ENTITY))?;
        report.terms = self.store.node_count(Some(labels::TERM))?;
        report.hypotheses = self.store.edge_count(Some(rels::HYPOTHESIS))?;

        for v in report
            .condensation_violations
            .iter()
            .chain(&report.resolution_violations)
        {
            warn!(violation = %v, "resolution consistency violation");
        }
        info!(
            panels = report.panels,
            condtags = report.condtags,
            entities = report.entities,
            hypotheses = report.hypotheses,
            violations = report.violation_count(),
            "resolution run finished"
        );
        Ok(report)
    }

    fn resolve_panel(
        &self,
        panel: Node,
        report: &mut ResolutionReport,
    ) -> Result<PanelRoles, ResolveError> {
        let mut mentions = Vec::new();
        for edge in self
            .store
            .edges_from(&panel.id, Some(self.config.tag_relationship.as_str()))?
        {
            if let Some(tag) = self.store.load_node(&edge.target)? {
                mentions.push(RawMention::from_node(&tag));
            }
        }

        let condensation = condense(&mentions);
        report.dropped.add(condensation.dropped);
        report
            .condensation_violations
            .extend(condensation.violations.iter().cloned());
        debug!(
            panel = %panel.id,
            mentions = mentions.len(),
            condtags = condensation.condtags.len(),
            "condensed panel"
        );

        let mut roles = PanelRoles {
            panel,
            interventions: BTreeSet::new(),
            assayed: BTreeSet::new(),
        };
        for condtag in &condensation.condtags {
            let id = entity::store_condtag(self.store, &roles.panel, condtag)?;
            let resolved = entity::resolve_condtag(self.store, &id, condtag)?;
            if resolved.entity_created {
                report.entities_created += 1;
            }
            report.terms_created += resolved.terms_created;

            if resolved.role == self.config.intervention_role {
                roles.interventions.insert(resolved.entity);
            } else if resolved.role == self.config.assayed_role {
                roles.assayed.insert(resolved.entity);
            }
        }
        Ok(roles)
    }

    fn infer_hypotheses(
        &self,
        roles: &PanelRoles,
        report: &mut ResolutionReport,
    ) -> Result<(), ResolveError> {
        if roles.interventions.is_empty() || roles.assayed.is_empty() {
            return Ok(());
        }

        let figures = self
            .store
            .edges_to(&roles.panel.id, Some(self.config.figure_relationship.as_str()))?
            .into_iter()
            .map(|e| e.source.to_string())
            .collect();
        let observation = Observation {
            panel: roles.panel.id.to_string(),
            figures,
            article: roles.panel.source().map(str::to_string),
        };

        for intervention in &roles.interventions {
            for assayed in &roles.assayed {
                if hypothesis::record_observation(self.store, intervention, assayed, &observation)? {
                    report.hypotheses_created += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Properties;
    use crate::storage::{OpenStore, SqliteStore};

    fn tag(store: &SqliteStore, panel: &NodeId, role: &str, ty: &str, ext: &str, text: &str) {
        let mut p = Properties::new();
        p.insert("role".into(), role.into());
        p.insert("type".into(), ty.into());
        p.insert("category".into(), "entity".into());
        if !ext.is_empty() {
            p.insert("ext_ids".into(), ext.into());
        }
        p.insert("text".into(), text.into());
        p.insert("source".into(), "doc".into());
        let id = store.create_node("tag", &p).unwrap();
        store
            .create_relationship(panel, &id, "has_tag", &Properties::new())
            .unwrap();
    }

    fn panel(store: &SqliteStore, source: &str) -> NodeId {
        let mut p = Properties::new();
        p.insert("source".into(), source.into());
        store.create_node("panel", &p).unwrap()
    }

    #[test]
    fn rerun_changes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc");
        tag(&store, &p, "intervention", "gene", "G1", "geneA");
        tag(&store, &p, "assayed", "protein", "P1", "proteinB");

        let first = Resolver::new(&store).run().unwrap();
        let nodes = store.node_count(None).unwrap();
        let edges = store.edge_count(None).unwrap();
        let second = Resolver::new(&store).run().unwrap();

        assert_eq!(first.hypotheses_created, 1);
        assert_eq!(second.hypotheses_created, 0);
        assert_eq!(second.entities_created, 0);
        assert_eq!(store.node_count(None).unwrap(), nodes);
        assert_eq!(store.edge_count(None).unwrap(), edges);
        assert_eq!(list_hypotheses(&store, false).unwrap()[0].panel_count, 1);
    }

    #[test]
    fn panel_without_both_roles_has_no_hypothesis() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc");
        tag(&store, &p, "assayed", "protein", "P1", "proteinB");
        tag(&store, &p, "", "protein", "", "");

        let report = Resolver::new(&store).run().unwrap();
        assert_eq!(report.hypotheses, 0);
        assert_eq!(report.condtags, 1);
        assert_eq!(report.dropped.empty_text, 1);
    }

    #[test]
    fn custom_role_names() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc");
        tag(&store, &p, "cause", "gene", "G1", "geneA");
        tag(&store, &p, "effect", "protein", "P1", "proteinB");

        let config = ResolutionConfig {
            intervention_role: "cause".into(),
            assayed_role: "effect".into(),
            ..Default::default()
        };
        let report = Resolver::new(&store).with_config(config).run().unwrap();
        assert_eq!(report.hypotheses, 1);
    }
}
