use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use docsearch_core::bootstrap::replay;
use docsearch_core::{Analyzer, DocId, DocumentStore, IndexSchema, LocalNormalizer, SearchIndex, SearchRequest, SledStore};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Operate on the search index offline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AnalyzerArg {
    Standard,
    Cjk,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from every record in the document store
    Rebuild {
        /// Document store directory
        #[arg(long, default_value = ".store")]
        store: PathBuf,
        /// Index directory to create
        #[arg(long, default_value = ".index")]
        index: PathBuf,
        #[arg(long, value_enum, default_value_t = AnalyzerArg::Standard)]
        analyzer: AnalyzerArg,
        /// Delete an existing index first
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print schema and corpus statistics
    Stats {
        #[arg(long, default_value = ".index")]
        index: PathBuf,
    },
    /// List stored documents that are missing from the index
    Check {
        #[arg(long, default_value = ".store")]
        store: PathBuf,
        #[arg(long, default_value = ".index")]
        index: PathBuf,
    },
    /// Run a query against the index
    Search {
        #[arg(long, default_value = ".index")]
        index: PathBuf,
        #[arg(long)]
        q: String,
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
}

#[derive(Serialize)]
struct CheckReport {
    stored: usize,
    missing: Vec<DocId>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Rebuild { store, index, analyzer, force } => rebuild(store, index, analyzer, force).await,
        Commands::Stats { index } => {
            let idx = SearchIndex::open(&index)?;
            let out = serde_json::json!({ "schema": idx.schema(), "stats": idx.stats()? });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Check { store, index } => check(store, index),
        Commands::Search { index, q, size } => {
            let idx = SearchIndex::open(&index)?;
            let results = idx.search(&SearchRequest { query: q, size, from: 0 })?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
    }
}

async fn rebuild(store: PathBuf, index: PathBuf, analyzer: AnalyzerArg, force: bool) -> Result<()> {
    if SearchIndex::exists(&index) {
        if !force {
            bail!("{} already exists; pass --force to replace it", index.display());
        }
        tracing::warn!(path = %index.display(), "removing existing index");
        fs::remove_dir_all(&index).with_context(|| format!("failed to remove {}", index.display()))?;
    }
    let analyzer = match analyzer {
        AnalyzerArg::Standard => Analyzer::Standard,
        AnalyzerArg::Cjk => Analyzer::Cjk,
    };
    let store = SledStore::open(&store)?;
    let (idx, report) = replay(&index, IndexSchema::with_analyzer(analyzer), &store, &LocalNormalizer).await?;
    idx.close()?;
    tracing::info!(documents = report.documents, output = %index.display(), "rebuild complete");
    Ok(())
}

fn check(store: PathBuf, index: PathBuf) -> Result<()> {
    let store = SledStore::open(&store)?;
    let idx = SearchIndex::open(&index)?;
    let mut report = CheckReport { stored: 0, missing: Vec::new() };
    for record in store.scan_all() {
        let (id, _) = record?;
        report.stored += 1;
        if !idx.contains(id)? {
            report.missing.push(id);
        }
    }
    if !report.missing.is_empty() {
        tracing::warn!(missing = report.missing.len(), "stored documents are not searchable");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
