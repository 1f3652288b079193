//! Document-level orchestration: guard, build, materialize, across a worker pool

use super::builder::TreeBuilder;
use super::guard::{provenance_from_path, DuplicateGuard, GuardDecision};
use super::materialize::{ErrorPolicy, MaterializeReport, Materializer};
use super::IngestError;
use crate::document::{Document, DocumentSource, SourceDocument};
use crate::schema::SchemaModel;
use crate::storage::SharedStore;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// What happened to one document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Ingested(MaterializeReport),
    /// Already present in the store (or earlier in this run)
    Skipped,
    /// The root node failed with an absorbed error class; nothing persisted
    RootAbsorbed(MaterializeReport),
}

/// A document that failed to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub provenance: String,
    pub error: String,
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub relationships_created: usize,
    /// Node-local failures absorbed by the error policy
    pub absorbed_errors: usize,
    pub failures: Vec<DocumentFailure>,
}

impl RunSummary {
    fn record(&mut self, provenance: String, outcome: Result<DocumentOutcome, IngestError>) {
        match outcome {
            Ok(DocumentOutcome::Ingested(report)) => {
                self.ingested += 1;
                self.add_report(&report);
            }
            Ok(DocumentOutcome::Skipped) => self.skipped += 1,
            Ok(DocumentOutcome::RootAbsorbed(report)) => {
                self.add_report(&report);
                self.fail(provenance, "root node could not be materialized".into());
            }
            Err(e) => self.fail(provenance, e.to_string()),
        }
    }

    fn add_report(&mut self, report: &MaterializeReport) {
        self.nodes_created += report.nodes_created;
        self.nodes_merged += report.nodes_merged;
        self.relationships_created += report.relationships_created;
        self.absorbed_errors += report.absorbed.len();
    }

    fn fail(&mut self, provenance: String, error: String) {
        warn!(provenance = %provenance, error = %error, "document failed");
        self.failed += 1;
        self.failures.push(DocumentFailure { provenance, error });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "documents: {} ingested, {} skipped, {} failed",
            self.ingested, self.skipped, self.failed
        )?;
        write!(
            f,
            "graph: {} nodes created, {} merged, {} relationships, {} absorbed errors",
            self.nodes_created, self.nodes_merged, self.relationships_created, self.absorbed_errors
        )?;
        for failure in &self.failures {
            write!(f, "\n  failed {}: {}", failure.provenance, failure.error)?;
        }
        Ok(())
    }
}

/// Ingests documents with one schema into a shared store.
///
/// Documents are independent units: each runs guard -> build -> materialize
/// on a blocking worker, at most `workers` at a time. Within a document,
/// writes are sequential and in document order.
#[derive(Clone)]
pub struct IngestPipeline {
    store: SharedStore,
    schema: Arc<SchemaModel>,
    guard: DuplicateGuard,
    policy: ErrorPolicy,
    workers: usize,
}

impl IngestPipeline {
    pub fn new(store: SharedStore, schema: SchemaModel) -> Self {
        Self {
            store,
            schema: Arc::new(schema),
            guard: DuplicateGuard::default(),
            policy: ErrorPolicy::default(),
            workers: 4,
        }
    }

    pub fn with_guard(mut self, enabled: bool) -> Self {
        self.guard = DuplicateGuard::new(enabled);
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Ingest one document on the current thread.
    #[instrument(skip_all, fields(provenance = %document.provenance))]
    pub fn ingest_document(&self, document: &SourceDocument) -> Result<DocumentOutcome, IngestError> {
        let provenance = document.provenance.trim();
        if provenance.is_empty() {
            return Err(IngestError::EmptyProvenance);
        }

        let store = self.store.as_ref();
        if self.guard.check(store, provenance)? == GuardDecision::Skip {
            info!("already ingested, skipping");
            return Ok(DocumentOutcome::Skipped);
        }

        let tree = match &document.root {
            Document::Markup(root) => TreeBuilder::build(root, &self.schema)?,
            Document::Json(root) => TreeBuilder::build(root, &self.schema)?,
        };

        let mut report = MaterializeReport::default();
        let root = Materializer::new(store, self.policy.clone())
            .materialize(&tree, provenance, &mut report)?;

        match root {
            Some(_) => {
                info!(
                    nodes = report.nodes_created,
                    absorbed = report.absorbed.len(),
                    "ingested document"
                );
                Ok(DocumentOutcome::Ingested(report))
            }
            None => Ok(DocumentOutcome::RootAbsorbed(report)),
        }
    }

    /// Drain `source`, ingesting documents concurrently.
    pub async fn run(&self, source: &mut dyn DocumentSource) -> Result<RunSummary, IngestError> {
        for (label, property) in self.schema.unique_constraints() {
            self.store.ensure_unique(label, property)?;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();
        // The store guard cannot see documents still in flight
        let mut in_run: HashSet<String> = HashSet::new();

        while let Some(next) = source.next_document().await {
            let document = match next {
                Ok(document) => document,
                Err(e) => {
                    let provenance = e
                        .path()
                        .map(provenance_from_path)
                        .unwrap_or_else(|| String::from("<unreadable>"));
                    summary.fail(provenance, e.to_string());
                    continue;
                }
            };

            if self.guard.is_enabled() && !in_run.insert(document.provenance.clone()) {
                info!(provenance = %document.provenance, "duplicate provenance in this run, skipping");
                summary.skipped += 1;
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| IngestError::PoolClosed)?;
            let worker = self.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let outcome = worker.ingest_document(&document);
                (document.provenance, outcome)
            });

            // Collect whatever has finished so results do not pile up
            while let Some(done) = tasks.try_join_next() {
                let (provenance, outcome) = done?;
                summary.record(provenance, outcome);
            }
        }

        while let Some(done) = tasks.join_next().await {
            let (provenance, outcome) = done?;
            summary.record(provenance, outcome);
        }

        info!(
            ingested = summary.ingested,
            skipped = summary.skipped,
            failed = summary.failed,
            "ingestion run finished"
        );
        Ok(summary)
    }
}
