use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Instrument};

use tagpack_scraper::apis::create_source;
use tagpack_scraper::config::{AppConfig, SourceConfig};
use tagpack_scraper::constants;
use tagpack_scraper::logging;
use tagpack_scraper::pipeline::{AcquireOptions, Pipeline, PipelineResult};
use tagpack_scraper::types::AcquireMode;

#[derive(Parser)]
#[command(name = "tagpack_scraper")]
#[command(about = "Scrapes cryptocurrency address reports and writes them as TagPacks")]
#[command(version = "0.1.0")]
struct Cli {
    /// Global settings file
    #[arg(long, default_value = constants::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered sources
    List,
    /// Download raw data
    Acquire {
        /// Sources to run (comma-separated), all when omitted
        #[arg(long)]
        sources: Option<String>,
        /// Fetch again even if the raw file exists
        #[arg(long)]
        force: bool,
        /// Continue from the existing raw data
        #[arg(long)]
        update: bool,
    },
    /// Turn existing raw data into TagPacks
    Generate {
        #[arg(long)]
        sources: Option<String>,
    },
    /// Acquire, then generate
    Run {
        #[arg(long)]
        sources: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        update: bool,
    },
}

#[derive(Clone, Copy)]
enum Step {
    Acquire,
    Generate,
    Run,
}

fn source_names(sources: Option<String>) -> Vec<String> {
    match sources {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => constants::get_supported_sources()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

fn options(force: bool, update: bool) -> AcquireOptions {
    AcquireOptions {
        force,
        mode: if update { AcquireMode::Update } else { AcquireMode::Fresh },
    }
}

fn print_result(result: &PipelineResult) {
    println!("\n📊 Results for {}:", result.source);
    println!("   Raw data: {} ({})", result.raw_file, if result.acquired { "fetched" } else { "reused" });
    println!("   Rows: {} ({} skipped)", result.rows_total, result.rows_skipped);
    println!("   Tags: {} ({} invalid, {} duplicates dropped)", result.tags_emitted, result.invalid_tags, result.duplicates);
    println!("   Lastmod: {}", result.lastmod);
    println!("   Output file: {}", result.output_file);
}

async fn run_source(
    pipeline: &Pipeline,
    app: &AppConfig,
    name: &str,
    step: Step,
    options: AcquireOptions,
) -> anyhow::Result<()> {
    let definition = create_source(name).with_context(|| format!("unknown source '{name}'"))?;
    let config_path = app.source_dir(name).join(constants::SOURCE_CONFIG_FILE);
    let config = SourceConfig::load(&config_path)?;

    match step {
        Step::Acquire => {
            let fetched = pipeline.acquire(&definition, &config, options).await?;
            println!("📥 {}: raw data {}", name, if fetched { "fetched" } else { "already present" });
        }
        Step::Generate => print_result(&Pipeline::generate(&definition, &config)?),
        Step::Run => print_result(&pipeline.run(&definition, &config, options).await?),
    }
    Ok(())
}

async fn run_sources(
    app: &AppConfig,
    sources: Option<String>,
    step: Step,
    options: AcquireOptions,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(app)?;
    let names = source_names(sources);
    let mut failed = Vec::new();

    for name in &names {
        let span = tracing::info_span!("source", source = %name);
        let outcome = run_source(&pipeline, app, name, step, options)
            .instrument(span.clone())
            .await;
        let _enter = span.enter();
        match outcome {
            Ok(()) => info!("Finished"),
            Err(e) => {
                error!("Source failed: {:#}", e);
                println!("❌ {}: {:#}", name, e);
                failed.push(name.clone());
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} of {} sources failed: {}", failed.len(), names.len(), failed.join(", "));
    }
    Ok(())
}

fn load_settings(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() {
        warn!("{} not found, using default settings", path.display());
    }
    AppConfig::load_or_default(path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let app = load_settings(&cli.config)?;

    match cli.command {
        Commands::List => {
            for name in constants::get_supported_sources() {
                let config_path = app.source_dir(name).join(constants::SOURCE_CONFIG_FILE);
                let marker = if config_path.exists() { "" } else { " (no config)" };
                println!("{name}{marker}");
            }
        }
        Commands::Acquire { sources, force, update } => {
            run_sources(&app, sources, Step::Acquire, options(force, update)).await?;
        }
        Commands::Generate { sources } => {
            run_sources(&app, sources, Step::Generate, AcquireOptions::default()).await?;
        }
        Commands::Run { sources, force, update } => {
            run_sources(&app, sources, Step::Run, options(force, update)).await?;
        }
    }
    Ok(())
}
