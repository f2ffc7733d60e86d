use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cohort_activity::config::{MalformedRowPolicy, PipelineConfig};
use cohort_activity::export::{self, Format};
use cohort_activity::{report, CohortPipeline};

#[derive(Parser)]
#[command(name = "cohort-activity")]
#[command(about = "Weekly activity and level-bucket analytics for character snapshots", long_about = None)]
struct Cli {
    /// TOML file overriding column names, level range and data-quality limits
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Fail on the first malformed row instead of excluding it
    #[arg(long, global = true)]
    strict: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    #[arg(long)]
    csv: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Format::Csv)]
    format: Format,
}

#[derive(Subcommand)]
enum Commands {
    /// Classified observations with delta, activity state and level bucket
    Classify(TableArgs),
    /// Level-bucket distribution per snapshot date and activity state
    Cohorts(TableArgs),
    /// Growing/stagnant split per level bucket over the whole period
    Stagnation(TableArgs),
    /// Growing/stagnant ratio per snapshot date
    Trend(TableArgs),
    /// Weekly gain distribution by guild membership
    Guild(TableArgs),
    /// Generate a markdown report
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>, strict: bool) -> anyhow::Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if strict {
        config.malformed_rows = MalformedRowPolicy::Strict;
    }
    Ok(config)
}

fn emit_table<T: Serialize>(rows: &[T], args: &TableArgs) -> anyhow::Result<()> {
    export::emit(rows, args.format, args.out.as_deref()).context("failed to write table")?;
    if let Some(out) = &args.out {
        println!("Wrote {} rows to {}.", rows.len(), out.display());
    }
    Ok(())
}

fn load(
    pipeline: &mut CohortPipeline,
    csv: &Path,
) -> anyhow::Result<std::sync::Arc<cohort_activity::PipelineOutput>> {
    pipeline
        .load(csv)
        .with_context(|| format!("failed to process {}", csv.display()))
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.strict)?;
    let mut pipeline = CohortPipeline::new(config).context("invalid pipeline configuration")?;

    match &cli.command {
        Commands::Classify(args) => {
            let output = load(&mut pipeline, &args.csv)?;
            emit_table(&output.classified, args)?;
        }
        Commands::Cohorts(args) => {
            let output = load(&mut pipeline, &args.csv)?;
            emit_table(&output.cohorts, args)?;
        }
        Commands::Stagnation(args) => {
            let output = load(&mut pipeline, &args.csv)?;
            emit_table(&output.stagnation, args)?;
        }
        Commands::Trend(args) => {
            let output = load(&mut pipeline, &args.csv)?;
            emit_table(&output.trend, args)?;
        }
        Commands::Guild(args) => {
            let output = load(&mut pipeline, &args.csv)?;
            emit_table(&output.guild_growth, args)?;
        }
        Commands::Report { csv, out } => {
            let output = load(&mut pipeline, csv)?;
            let source = csv.display().to_string();
            let report = report::build_report(&source, &output, pipeline.buckets());
            std::fs::write(out, report)
                .with_context(|| format!("failed to write report to {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    let stats = pipeline.cache_stats();
    debug!(hits = stats.hits, misses = stats.misses, "cache usage");

    Ok(())
}
