//! panelgraph CLI: ingest documents, resolve tags, derive topics.
//!
//! Usage:
//!   panelgraph ingest <dir> --schema <name> [--no-guard] [--workers N]
//!   panelgraph resolve
//!   panelgraph topics
//!   panelgraph hypotheses [--all]
//!   panelgraph purge --source <id>
//!   panelgraph stats
//!   panelgraph schemas
//!
//! Every command accepts `--db <path>` and `--config <file>`.

use clap::{Parser, Subcommand};
use panelgraph::{
    list_hypotheses, purge_source, DirectorySource, GraphStore, IngestPipeline, OpenStore,
    PipelineConfig, Resolver, SchemaRegistry, SharedStore, SqliteStore, TopicDeriver,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "panelgraph",
    version,
    about = "Schema-driven publication graph ingestion and tag resolution"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every document in a directory
    Ingest {
        /// Directory of .xml / .json documents
        dir: PathBuf,
        /// Schema to extract with (see `schemas`)
        #[arg(long)]
        schema: String,
        /// Re-ingest documents already present in the store
        #[arg(long)]
        no_guard: bool,
        /// Documents ingested concurrently
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Condense tags, resolve entities and infer hypotheses
    Resolve,
    /// Derive topic communities and centrality highlights
    Topics,
    /// List inferred hypotheses
    Hypotheses {
        /// Include self-tests
        #[arg(long)]
        all: bool,
    },
    /// Delete every node ingested from one source document
    Purge {
        /// Provenance identifier (document file stem)
        #[arg(long)]
        source: String,
    },
    /// Print node and relationship counts
    Stats,
    /// List available schemas
    Schemas,
}

fn open_store(config: &PipelineConfig) -> Result<SqliteStore, String> {
    SqliteStore::open(&config.database).map_err(|e| format!("Failed to open database: {}", e))
}

fn load_registry(config: &PipelineConfig) -> Result<SchemaRegistry, String> {
    let mut registry = SchemaRegistry::with_builtins().map_err(|e| e.to_string())?;
    if let Some(dir) = &config.schema_dir {
        registry.load_dir(dir).map_err(|e| e.to_string())?;
    }
    Ok(registry)
}

async fn cmd_ingest(
    config: &PipelineConfig,
    dir: &Path,
    schema: &str,
) -> Result<ExitCode, String> {
    let registry = load_registry(config)?;
    let schema = registry.get(schema).map_err(|e| e.to_string())?.clone();
    let store: SharedStore = Arc::new(open_store(config)?);
    let mut source = DirectorySource::new(dir).map_err(|e| e.to_string())?;

    let pipeline = IngestPipeline::new(store, schema)
        .with_guard(config.guard)
        .with_policy(config.error_policy())
        .with_workers(config.workers);
    let summary = pipeline.run(&mut source).await.map_err(|e| e.to_string())?;

    println!("{}", summary);
    Ok(if summary.failed > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_resolve(config: &PipelineConfig) -> Result<ExitCode, String> {
    let store = open_store(config)?;
    let report = Resolver::new(&store)
        .with_config(config.resolution.clone())
        .run()
        .map_err(|e| e.to_string())?;
    println!("{}", report);
    Ok(if report.violation_count() > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_topics(config: &PipelineConfig) -> Result<ExitCode, String> {
    let store = open_store(config)?;
    let report = TopicDeriver::new(&store)
        .with_config(config.topics.clone())
        .with_resolution(config.resolution.clone())
        .run()
        .map_err(|e| e.to_string())?;
    println!("{}", report);
    Ok(ExitCode::SUCCESS)
}

fn cmd_hypotheses(config: &PipelineConfig, all: bool) -> Result<ExitCode, String> {
    let store = open_store(config)?;
    let hypotheses = list_hypotheses(&store, all).map_err(|e| e.to_string())?;
    if hypotheses.is_empty() {
        println!("No hypotheses.");
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:<24}  {:<24}  {:>6}  {:>7}  {:>8}",
        "INTERVENTION", "ASSAYED", "PANELS", "FIGURES", "ARTICLES"
    );
    println!("{}", "-".repeat(77));
    for h in hypotheses {
        let marker = if h.self_test { " (self-test)" } else { "" };
        println!(
            "{:<24}  {:<24}  {:>6}  {:>7}  {:>8}{}",
            h.intervention_name, h.assayed_name, h.panel_count, h.figure_count, h.article_count, marker
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_purge(config: &PipelineConfig, source: &str) -> Result<ExitCode, String> {
    let store = open_store(config)?;
    let report = purge_source(&store, source).map_err(|e| e.to_string())?;
    println!("Removed {} nodes from source '{}'", report.removed, source);
    for (id, heir) in &report.retained {
        println!("  kept shared node {} (now owned by '{}')", id, heir);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_stats(config: &PipelineConfig) -> Result<ExitCode, String> {
    let store = open_store(config)?;
    let count = |label: Option<&str>| store.node_count(label).map_err(|e| e.to_string());
    println!("database: {}", config.database.display());
    println!("nodes: {}", count(None)?);
    for label in ["article", "figure", "panel", "tag", "CondTag", "Entity", "Term", "Topic"] {
        println!("  {:<10} {}", label, count(Some(label))?);
    }
    let edges = |rel: Option<&str>| store.edge_count(rel).map_err(|e| e.to_string());
    println!("relationships: {}", edges(None)?);
    println!("  {:<10} {}", "hypothesis", edges(Some("hypothesis"))?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_schemas(config: &PipelineConfig) -> Result<ExitCode, String> {
    let registry = load_registry(config)?;
    for name in registry.names() {
        let schema = registry.get(name).map_err(|e| e.to_string())?;
        println!("{:<16} {}", name, schema.labels().join(" > "));
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match PipelineConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(db) = cli.db {
        config.database = db;
    }

    let result = match cli.command {
        Commands::Ingest {
            dir,
            schema,
            no_guard,
            workers,
        } => {
            if no_guard {
                config.guard = false;
            }
            if let Some(w) = workers {
                config.workers = w.max(1);
            }
            cmd_ingest(&config, &dir, &schema).await
        }
        Commands::Resolve => cmd_resolve(&config),
        Commands::Topics => cmd_topics(&config),
        Commands::Hypotheses { all } => cmd_hypotheses(&config, all),
        Commands::Purge { source } => cmd_purge(&config, &source),
        Commands::Stats => cmd_stats(&config),
        Commands::Schemas => cmd_schemas(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
