use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use titledex_core::ingest::{ingest, snapshot_paths, IngestConfig, LogProgress};
use titledex_core::tokenizer::canonicalize;
use titledex_core::{Error, Index, SledStore};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "titledex")]
#[command(about = "Build and query a full-text index of media titles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Location {
    /// Directory holding the snapshot tables and, by default, the index
    #[arg(long, env = "TITLEDEX_WORKDIR", default_value_os_t = std::env::temp_dir().join("titledex"))]
    workdir: PathBuf,
    /// Index store directory [default: <workdir>/index.sled]
    #[arg(long, env = "TITLEDEX_DB")]
    db: Option<PathBuf>,
}

impl Location {
    fn db(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(|| self.workdir.join("index.sled"))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the basics and alias tables into the index
    Ingest {
        #[command(flatten)]
        location: Location,
        /// Basics table [default: <workdir>/title.basics.tsv]
        #[arg(long, env = "TITLEDEX_BASICS")]
        basics: Option<PathBuf>,
        /// Alias table [default: <workdir>/title.akas.tsv]
        #[arg(long, env = "TITLEDEX_AKAS")]
        akas: Option<PathBuf>,
        /// Canonicalization threads [default: available parallelism]
        #[arg(long)]
        workers: Option<usize>,
        /// Rows buffered between pipeline stages
        #[arg(long, default_value_t = 1024)]
        channel_capacity: usize,
        /// Regions whose titles are stemmed as English
        #[arg(long, value_delimiter = ',', default_value = "GB,US")]
        english_regions: Vec<String>,
        /// Log progress every N rows (0 disables)
        #[arg(long, default_value_t = 1_000_000)]
        progress_every: u64,
    },
    /// Find media whose titles contain every word of the query
    Query {
        #[command(flatten)]
        location: Location,
        /// Match words as written instead of stemming them as English
        #[arg(long, default_value_t = false)]
        no_stem: bool,
        /// Print at most this many ids
        #[arg(long)]
        limit: Option<usize>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Show the tokens a title is indexed under
    Canonicalize {
        #[arg(long, default_value_t = false)]
        no_stem: bool,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Print store statistics as JSON
    Stats {
        #[command(flatten)]
        location: Location,
    },
}

#[derive(Serialize)]
struct QueryOutput {
    query: String,
    stems: Vec<String>,
    total_hits: usize,
    results: Vec<String>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { location, basics, akas, workers, channel_capacity, english_regions, progress_every } => {
            let (default_basics, default_akas) = snapshot_paths(&location.workdir);
            let mut config = IngestConfig {
                channel_capacity,
                english_regions: english_regions.into_iter().collect(),
                ..IngestConfig::default()
            };
            if let Some(workers) = workers {
                config.workers = workers;
            }
            run_ingest(
                &location.db(),
                &basics.unwrap_or(default_basics),
                &akas.unwrap_or(default_akas),
                &config,
                progress_every,
            )
        }
        Commands::Query { location, no_stem, limit, text } => run_query(&location.db(), &text.join(" "), !no_stem, limit),
        Commands::Canonicalize { no_stem, text } => {
            for token in canonicalize(&text.join(" "), !no_stem) {
                println!("{token}");
            }
            Ok(())
        }
        Commands::Stats { location } => {
            let store = open_store(&location.db())?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
            Ok(())
        }
    }
}

fn open_store(db: &Path) -> Result<SledStore> {
    SledStore::open(db).with_context(|| format!("opening index store at {}", db.display()))
}

fn run_ingest(db: &Path, basics: &Path, akas: &Path, config: &IngestConfig, progress_every: u64) -> Result<()> {
    if let Some(parent) = db.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let index = Index::new(open_store(db)?);
    let progress = LogProgress { every: progress_every };
    let stats = ingest(&index, basics, akas, config, &progress).context("ingestion failed")?;

    tracing::info!(db = %db.display(), "ingestion complete");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_query(db: &Path, text: &str, use_stemming: bool, limit: Option<usize>) -> Result<()> {
    let index = Index::new(open_store(db)?);
    let query = match index.parse_query(text, use_stemming) {
        Ok(query) => query,
        Err(Error::EmptyQuery(_)) => {
            eprintln!("query {text:?} has no searchable words");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut results = index.search(&query)?;
    let total_hits = results.len();
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    let out = QueryOutput { query: query.text, stems: query.stems, total_hits, results };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
