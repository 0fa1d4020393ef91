//! genshin-data-sync command line
//!
//! `run` drives one sync run to completion (Ctrl-C cancels it), `extract`
//! parses a saved page offline, `list` prints stored records and `config`
//! shows the effective read-only configuration.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use genshin_data_sync::application::{ConfigView, Orchestrator};
use genshin_data_sync::domain::{EntityType, RawPage, RunStatus};
use genshin_data_sync::infrastructure::config::AppConfig;
use genshin_data_sync::infrastructure::{
    DatabaseConnection, EntityHints, HtmlExtractor, ReqwestTransport, SqliteEntityRepository, StructuralExtractor,
    TermNormalizer, init_logging,
};

#[derive(Debug, Parser)]
#[command(
    name = "genshin-data-sync",
    version,
    about = "Scrape game wiki entity pages and reconcile them into a local store"
)]
struct Cli {
    /// Configuration file (defaults to config/default.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline for one entity type and print the run report
    Run(RunArgs),
    /// Extract and normalize a saved HTML page without touching the network
    Extract(ExtractArgs),
    /// Print stored records of one entity type
    List(ListArgs),
    /// Print the read-only configuration view
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    entity_type: EntityType,
    /// Override the configured key list (comma separated)
    #[arg(long, value_delimiter = ',')]
    keys: Vec<String>,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    html_file: PathBuf,
    #[arg(long)]
    entity_type: EntityType,
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
struct ListArgs {
    entity_type: EntityType,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run(args) => run(&config, args).await,
        Commands::Extract(args) => extract(&config, &args).await,
        Commands::List(args) => list(&config, args.entity_type).await,
        Commands::Config => print_json(&ConfigView::from(&config.fetcher)),
    }
}

async fn open_repository(config: &AppConfig) -> Result<SqliteEntityRepository> {
    let db = DatabaseConnection::from_config(&config.storage)
        .await
        .with_context(|| format!("opening {}", config.storage.database_url))?;
    db.migrate().await?;
    Ok(SqliteEntityRepository::new(db.pool().clone()))
}

async fn run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let repository = Arc::new(open_repository(config).await?);
    let transport = Arc::new(ReqwestTransport::new(&config.fetcher)?);
    let orchestrator = Orchestrator::from_config(config, transport, repository)?;

    let cancel_handle = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight entities");
            cancel_handle.cancel();
        }
    });

    let keys = (!args.keys.is_empty()).then_some(args.keys);
    let report = orchestrator.run(args.entity_type, keys).await?;
    print_json(&report)?;

    if report.stats.status == RunStatus::Failed {
        anyhow::bail!(
            "run failed: {}",
            report.stats.error_summary.unwrap_or_else(|| "unknown fault".to_string())
        );
    }
    Ok(())
}

async fn extract(config: &AppConfig, args: &ExtractArgs) -> Result<()> {
    let body = tokio::fs::read_to_string(&args.html_file)
        .await
        .with_context(|| format!("reading {}", args.html_file.display()))?;
    let page = RawPage::from_markup(format!("file://{}", args.html_file.display()), body);

    let extractor = HtmlExtractor::new(&config.extractor)?;
    let normalizer = TermNormalizer::new(&config.normalizer.extra_aliases)?;
    let raw = extractor.extract(&page, &EntityHints::new(args.entity_type, args.key.as_str()))?;
    let normalized = normalizer.normalize(&raw)?;
    info!("extracted {} with {} warning(s)", args.key, normalized.warnings.len());

    print_json(&json!({
        "raw": raw,
        "candidate": normalized.record,
        "warnings": normalized.warnings,
    }))
}

async fn list(config: &AppConfig, entity_type: EntityType) -> Result<()> {
    let repository = open_repository(config).await?;
    print_json(&repository.list(entity_type).await?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
