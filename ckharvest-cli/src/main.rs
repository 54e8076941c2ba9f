//! ckharvest CLI - collect repository metadata and build the CK metrics dataset

use anyhow::Context;
use ckharvest_core::{
    init_logging, log_operation_error, BatchReport, ErrorContext, HarvestConfig, HarvestError,
    HarvestResult, RepositoryDescriptor,
};
use ckharvest_pipeline::{
    merge_datasets, read_descriptors, write_descriptors, DatasetReport, PipelineOrchestrator,
};
use ckharvest_repo::{CollectionSummary, FieldStats, GitHubCollector, MetadataCollector};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ckharvest")]
#[command(about = "Build a dataset of CK code metrics for popular GitHub repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search GitHub and save repository descriptors
    Collect {
        /// Number of repositories to collect
        #[arg(short, long)]
        limit: Option<usize>,

        /// Descriptor CSV to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// GitHub token
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Analyze the repositories listed in a descriptor CSV
    Analyze {
        /// Descriptor CSV to read
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Dataset CSV to append to
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Maximum repositories to process
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip repositories already in the dataset
        #[arg(long)]
        resume: bool,

        /// Token sent with archive downloads
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Collect descriptors, then analyze them
    Run {
        /// Number of repositories to collect and analyze
        #[arg(short, long)]
        limit: Option<usize>,

        /// Dataset CSV to append to
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// GitHub token
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Skip repositories already in the dataset
        #[arg(long)]
        resume: bool,
    },

    /// Merge two datasets, dropping duplicate URLs
    Merge {
        first: PathBuf,
        second: PathBuf,

        /// Merged CSV to write
        #[arg(short, long, default_value = "merged_dataset.csv")]
        output: PathBuf,
    },

    /// Summarize a dataset as a markdown report
    Report {
        dataset: PathBuf,

        /// Markdown file to write; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting ckharvest v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Collect {
            limit,
            output,
            token,
        } => {
            handle_collect(&config, limit, output, token).await?;
        }
        Commands::Analyze {
            input,
            dataset,
            limit,
            resume,
            token,
        } => {
            let input = input.unwrap_or_else(|| PathBuf::from(&config.collector.descriptors_path));
            let repositories = read_descriptors(&input)
                .with_context(|| format!("Cannot load descriptors from {}", input.display()))?;
            handle_analyze(&mut config, &repositories, dataset, limit, resume, token).await?;
        }
        Commands::Run {
            limit,
            dataset,
            token,
            resume,
        } => {
            let repositories = handle_collect(&config, limit, None, token.clone()).await?;
            handle_analyze(&mut config, &repositories, dataset, limit, resume, token).await?;
        }
        Commands::Merge {
            first,
            second,
            output,
        } => {
            let report = merge_datasets(&first, &second, &output)?;
            println!("✅ Merged into {}", output.display());
            println!("   {}: {} rows", first.display(), report.first_rows);
            println!("   {}: {} rows", second.display(), report.second_rows);
            println!(
                "   {} unique rows, {} duplicates removed",
                report.unique_rows, report.duplicates_removed
            );
        }
        Commands::Report { dataset, output } => {
            let report = DatasetReport::from_dataset(&dataset)
                .with_context(|| format!("Cannot build a report from {}", dataset.display()))?;
            match output {
                Some(output) => {
                    std::fs::write(&output, report.to_string())
                        .with_context(|| format!("Cannot write report to {}", output.display()))?;
                    println!(
                        "✅ Report for {} repositories written to {}",
                        report.repositories,
                        output.display()
                    );
                }
                None => print!("{}", report),
            }
        }
        Commands::Config {
            init,
            show,
            validate,
        } => {
            handle_config(cli.config.as_deref(), &config, init, show, validate)?;
        }
    }

    Ok(())
}

/// First existing of: `--config`, the user config dir, `~/.ckharvest`, `./ckharvest.toml`
fn load_config(config_path: Option<&Path>) -> HarvestResult<HarvestConfig> {
    if let Some(path) = config_path {
        return HarvestConfig::from_file(path);
    }

    let default_paths = [
        dirs::config_dir().map(|d| d.join("ckharvest").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".ckharvest").join("config.toml")),
        Some(PathBuf::from("ckharvest.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            return HarvestConfig::from_file(path);
        }
    }

    Ok(HarvestConfig::default())
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ckharvest")
        .join("config.toml")
}

async fn handle_collect(
    config: &HarvestConfig,
    limit: Option<usize>,
    output: Option<PathBuf>,
    token: Option<String>,
) -> HarvestResult<Vec<RepositoryDescriptor>> {
    let token = token.filter(|t| !t.trim().is_empty()).ok_or_else(|| HarvestError::Setup {
        message: "No GitHub token provided".to_string(),
        context: ErrorContext::new("cli")
            .with_operation("collect")
            .with_suggestion("Pass --token or set GITHUB_TOKEN (a .env file works too)"),
    })?;

    let limit = limit.unwrap_or(config.collector.limit);
    let output = output.unwrap_or_else(|| PathBuf::from(&config.collector.descriptors_path));

    let collector = GitHubCollector::new(config.collector.clone(), &token)?;
    let descriptors = collector.collect(limit).await.map_err(|e| {
        log_operation_error!("collect_metadata", e, limit = limit);
        e
    })?;

    write_descriptors(&output, &descriptors)?;

    println!(
        "✅ Collected {} repositories into {}",
        descriptors.len(),
        output.display()
    );
    print_collection_summary(&CollectionSummary::from_descriptors(&descriptors));

    Ok(descriptors)
}

async fn handle_analyze(
    config: &mut HarvestConfig,
    repositories: &[RepositoryDescriptor],
    dataset: Option<PathBuf>,
    limit: Option<usize>,
    resume: bool,
    token: Option<String>,
) -> HarvestResult<()> {
    if let Some(dataset) = dataset {
        config.storage.dataset_path = dataset.to_string_lossy().to_string();
    }
    if limit.is_some() {
        config.pipeline.limit = limit;
    }
    config.pipeline.resume |= resume;
    config.validate()?;

    let orchestrator = PipelineOrchestrator::from_config(config, token)?;
    let report = orchestrator.run(repositories).await.map_err(|e| {
        log_operation_error!("analyze_repositories", e);
        e
    })?;

    print_batch_report(&report, orchestrator.dataset_path());
    if report.failed() > 0 {
        warn!(failed = report.failed(), "Some repositories could not be analyzed");
    }

    Ok(())
}

fn handle_config(
    config_path: Option<&Path>,
    config: &HarvestConfig,
    init: bool,
    show: bool,
    validate: bool,
) -> HarvestResult<()> {
    if init {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        HarvestConfig::default().save_to_file(&path)?;
        println!("✅ Configuration initialized at: {}", path.display());
    }

    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| HarvestError::Config {
            message: format!("Failed to render configuration: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("show_config"),
        })?;
        println!("📋 Current configuration:");
        println!("{}", rendered);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}

fn print_collection_summary(summary: &CollectionSummary) {
    if summary.total == 0 {
        return;
    }
    println!("\n📊 Collection summary ({} repositories):", summary.total);
    let rows: [(&str, &FieldStats); 3] = [
        ("age (days)", &summary.age_days),
        ("stars", &summary.stars),
        ("releases", &summary.releases),
    ];
    for (label, stats) in rows {
        println!(
            "  {:<11} median {:>10.1}  mean {:>10.1}  min {:>8.0}  max {:>8.0}",
            label, stats.median, stats.mean, stats.min, stats.max
        );
    }
}

fn print_batch_report(report: &BatchReport, dataset: &Path) {
    println!("\n📊 Analysis finished");
    println!("   Attempted:    {}", report.attempted);
    println!("   Rows written: {}", report.rows_written());
    if report.partial > 0 {
        println!("   Incomplete cleanup: {}", report.partial);
    }
    if report.skipped > 0 {
        println!("   Skipped (already in dataset): {}", report.skipped);
    }
    println!("   Failed:       {}", report.failed());
    for (stage, count) in report.failures_by_stage() {
        println!("     {:<12} {}", stage, count);
    }
    for failure in &report.failures {
        println!("   ❌ {} [{}]: {}", failure.repository, failure.stage, failure.message);
    }
    println!("   Dataset: {}", dataset.display());
}
