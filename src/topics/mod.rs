//! Topic derivation over resolved Entities
//!
//! A batch pass that runs reset -> build -> partition -> rank -> name and
//! writes its result back as Entity annotations, `Topic` nodes and
//! `in_topic` relationships. Every run replaces the previous run's output.

pub mod centrality;
pub mod community;
pub mod cooccurrence;
pub mod naming;

pub use cooccurrence::{CooccurrenceGraph, QualifyingPanel};

use crate::graph::{NodeId, Properties, PropertyValue};
use crate::resolve::entity::keys;
use crate::resolve::{labels, ResolutionConfig};
use crate::storage::{with_transaction, GraphStore, NodeFilter, StorageError};
use naming::Tokenizer;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TOPIC_LABEL: &str = "Topic";
pub const IN_TOPIC: &str = "in_topic";

/// Entity annotations owned by topic derivation
pub mod annotations {
    pub const COMMUNITY: &str = "community";
    pub const CENTRALITY: &str = "centrality";
    pub const HIGHLIGHT: &str = "highlight";
    pub const COMMUNITY_HIGHLIGHT: &str = "community_highlight";

    pub const ALL: &[&str] = &[COMMUNITY, CENTRALITY, HIGHLIGHT, COMMUNITY_HIGHLIGHT];
}

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("{stage} failed: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StorageError,
    },

    #[error("invalid token pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    #[error("community has no associated text")]
    NoText,

    #[error("community text has no distinctive terms")]
    NoDistinctiveTerms,
}

/// Steps of a topic derivation run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reset,
    Build,
    Partition,
    Rank,
    Name,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reset => "reset",
            Stage::Build => "build",
            Stage::Partition => "partition",
            Stage::Rank => "rank",
            Stage::Name => "name",
        };
        f.write_str(name)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, TopicError>;
}

impl<T> AtStage<T> for Result<T, StorageError> {
    fn at(self, stage: Stage) -> Result<T, TopicError> {
        self.map_err(|source| TopicError::Storage { stage, source })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Entity types taking part; empty means every type
    pub salient_types: Vec<String>,
    /// Minimum number of shared panels for a co-occurrence edge
    pub min_cooccurrence: u32,
    /// Share of ranked Entities kept as highlights
    pub highlight_fraction: f64,
    /// Number of terms in a community label
    pub label_terms: usize,
    /// Panel property holding caption text
    pub text_property: String,
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            salient_types: ["gene", "protein", "geneprod", "molecule", "subcellular", "cell", "tissue", "organism"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_cooccurrence: 1,
            highlight_fraction: 0.1,
            label_terms: 3,
            text_property: "caption".into(),
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// A written community
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSummary {
    pub topic: NodeId,
    pub community: usize,
    pub size: usize,
    /// Empty when naming failed
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicReport {
    pub qualifying_panels: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub component_size: usize,
    pub highlights: usize,
    pub topics: Vec<TopicSummary>,
    /// Communities left unnamed
    pub unnamed: usize,
}

impl fmt::Display for TopicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "co-occurrence: {} panels, {} entities, {} edges; largest component {}",
            self.qualifying_panels, self.graph_nodes, self.graph_edges, self.component_size
        )?;
        write!(
            f,
            "topics: {} ({} unnamed), highlights: {}",
            self.topics.len(),
            self.unnamed,
            self.highlights
        )?;
        for t in &self.topics {
            write!(f, "\n  [{}] {} entities: {}", t.community, t.size, t.terms.join(", "))?;
        }
        Ok(())
    }
}

/// Ranking of one component and its communities
struct Ranking {
    members: Vec<NodeIndex>,
    community: Vec<usize>,
    centrality: Vec<f64>,
    highlight: Vec<bool>,
    community_highlight: Vec<bool>,
}

pub struct TopicDeriver<'s> {
    store: &'s dyn GraphStore,
    config: TopicConfig,
    resolution: ResolutionConfig,
}

impl<'s> TopicDeriver<'s> {
    pub fn new(store: &'s dyn GraphStore) -> Self {
        Self {
            store,
            config: TopicConfig::default(),
            resolution: ResolutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TopicConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn run(&self) -> Result<TopicReport, TopicError> {
        let tokenizer = Tokenizer::new()?;
        let mut report = TopicReport::default();

        self.reset().at(Stage::Reset)?;

        let graph = CooccurrenceGraph::build(
            self.store,
            &self.resolution,
            &self.config.salient_types,
            self.config.min_cooccurrence,
        )
        .at(Stage::Build)?;
        report.qualifying_panels = graph.panels.len();
        report.graph_nodes = graph.graph.node_count();
        report.graph_edges = graph.graph.edge_count();
        debug!(stage = %Stage::Build, nodes = report.graph_nodes, edges = report.graph_edges, "co-occurrence graph built");

        let members = graph.largest_component();
        report.component_size = members.len();
        if members.is_empty() {
            info!("no co-occurring entities, nothing to derive");
            return Ok(report);
        }

        let ranking = self.partition_and_rank(&graph, members);
        report.highlights = ranking.highlight.iter().filter(|h| **h).count();
        self.write_annotations(&graph, &ranking).at(Stage::Rank)?;

        let communities = ranking.community.iter().max().map_or(0, |m| m + 1);
        for c in 0..communities {
            let summary = self.name_and_write(&graph, &ranking, c, &tokenizer)?;
            if summary.terms.is_empty() {
                report.unnamed += 1;
            }
            report.topics.push(summary);
        }

        info!(
            component = report.component_size,
            topics = report.topics.len(),
            unnamed = report.unnamed,
            highlights = report.highlights,
            "topic derivation finished"
        );
        Ok(report)
    }

    fn reset(&self) -> Result<(), StorageError> {
        self.store.remove_node_properties(labels::ENTITY, annotations::ALL)?;
        let removed = self
            .store
            .delete_nodes(&NodeFilter::new().with_label(TOPIC_LABEL))?;
        debug!(stage = %Stage::Reset, removed, "cleared previous topics");
        Ok(())
    }

    fn partition_and_rank(&self, graph: &CooccurrenceGraph, members: Vec<NodeIndex>) -> Ranking {
        let component = graph.subgraph(&members);
        let community = community::louvain(&component);
        debug!(
            stage = %Stage::Partition,
            communities = community.iter().max().map_or(0, |m| m + 1),
            "component partitioned"
        );

        let all: Vec<NodeIndex> = component.node_indices().collect();
        let tiebreak = |i: NodeIndex| component[i].clone();
        let global = centrality::pagerank(
            &component,
            &all,
            self.config.damping,
            self.config.max_iterations,
            self.config.tolerance,
        );

        let mut highlight = vec![false; all.len()];
        for idx in centrality::top_fraction(&global, self.config.highlight_fraction, tiebreak) {
            highlight[idx.index()] = true;
        }

        let mut by_community: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
        for idx in &all {
            by_community.entry(community[idx.index()]).or_default().push(*idx);
        }
        let mut community_highlight = vec![false; all.len()];
        for nodes in by_community.values() {
            let local = centrality::pagerank(
                &component,
                nodes,
                self.config.damping,
                self.config.max_iterations,
                self.config.tolerance,
            );
            for idx in centrality::top_fraction(&local, self.config.highlight_fraction, tiebreak) {
                community_highlight[idx.index()] = true;
            }
        }

        Ranking {
            centrality: all.iter().map(|i| global.score(*i)).collect(),
            members,
            community,
            highlight,
            community_highlight,
        }
    }

    fn write_annotations(&self, graph: &CooccurrenceGraph, ranking: &Ranking) -> Result<(), StorageError> {
        with_transaction(self.store, |tx| {
            for (i, idx) in ranking.members.iter().enumerate() {
                let mut set = Properties::new();
                set.insert(annotations::COMMUNITY.into(), (ranking.community[i] as i64).into());
                set.insert(annotations::CENTRALITY.into(), ranking.centrality[i].into());
                set.insert(annotations::HIGHLIGHT.into(), ranking.highlight[i].into());
                set.insert(
                    annotations::COMMUNITY_HIGHLIGHT.into(),
                    ranking.community_highlight[i].into(),
                );
                tx.update_node(&graph.graph[*idx], &set)?;
            }
            Ok(())
        })
    }

    /// Name one community and write its Topic. Naming failures leave the
    /// Topic unnamed; only storage failures abort the run.
    fn name_and_write(
        &self,
        graph: &CooccurrenceGraph,
        ranking: &Ranking,
        community: usize,
        tokenizer: &Tokenizer,
    ) -> Result<TopicSummary, TopicError> {
        let entities: Vec<&NodeId> = ranking
            .members
            .iter()
            .enumerate()
            .filter(|(i, _)| ranking.community[*i] == community)
            .map(|(_, idx)| &graph.graph[*idx])
            .collect();

        let terms = match self.community_terms(graph, ranking, &entities, tokenizer) {
            Ok(terms) => terms,
            Err(e) => {
                warn!(community, error = %e, "could not name community");
                Vec::new()
            }
        };

        let mut props = Properties::new();
        props.insert(annotations::COMMUNITY.into(), (community as i64).into());
        props.insert("size".into(), (entities.len() as i64).into());
        props.insert("terms".into(), PropertyValue::from(terms.clone()));
        if !terms.is_empty() {
            props.insert("label".into(), terms.join(" ").into());
        }

        let topic = with_transaction(self.store, |tx| {
            let topic = tx.create_node(TOPIC_LABEL, &props)?;
            for entity in &entities {
                tx.create_relationship(entity, &topic, IN_TOPIC, &Properties::new())?;
            }
            Ok(topic)
        })
        .at(Stage::Name)?;

        debug!(stage = %Stage::Name, community, terms = ?terms, "topic written");
        Ok(TopicSummary {
            topic,
            community,
            size: entities.len(),
            terms,
        })
    }

    fn community_terms(
        &self,
        graph: &CooccurrenceGraph,
        ranking: &Ranking,
        entities: &[&NodeId],
        tokenizer: &Tokenizer,
    ) -> Result<Vec<String>, TopicError> {
        let component: HashSet<&NodeId> =
            ranking.members.iter().map(|idx| &graph.graph[*idx]).collect();
        let in_community: HashSet<&NodeId> = entities.iter().copied().collect();

        let mut corpus = Vec::new();
        let mut texts = Vec::new();
        for p in &graph.panels {
            if !p.entities.iter().any(|e| component.contains(e)) {
                continue;
            }
            let text = p.panel.text(&self.config.text_property).unwrap_or_default();
            corpus.push(text);
            if p.entities.iter().any(|e| in_community.contains(e)) {
                texts.push(text);
            }
        }

        let mut excluded = HashSet::new();
        for id in &component {
            let entity = self.store.load_node(id).at(Stage::Name)?;
            if let Some(name) = entity.as_ref().and_then(|e| e.text(keys::NAME)) {
                excluded.extend(tokenizer.tokens(name));
            }
        }

        naming::distinctive_terms(tokenizer, &texts, &corpus, &excluded, self.config.label_terms)
    }
}
