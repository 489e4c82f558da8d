//! xtractor command-line interface.
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use glob::glob;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;
use tracing::info;
use tracing::warn;
use xtractor::archive;
use xtractor::DistributionEngine;
use xtractor::EngineConfig;
use xtractor::ExtractionEngine;
use xtractor::FormatNormalizer;
use xtractor::Mode;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// Full result as JSON
    Json,
}

#[derive(Parser)]
#[command(name = "xtractor")]
#[command(author, version, about = "Extract vehicle stops and distribute visits from tracking spreadsheets", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Result format printed to stdout
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract stops from tracking exports into one unified report
    Extract {
        /// Input files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Which identifier the car column carries
        #[arg(short, long, value_enum, default_value_t = Mode::EngineIdle)]
        mode: Mode,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Split a visits workbook into one file per supervisor and per representative
    Distribute {
        /// Visits workbook
        input: PathBuf,

        /// Sheet holding the visits (defaults to the configured name)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Also bundle the produced files into this zip
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Check a visits workbook without writing anything
    Validate {
        /// Visits workbook
        input: PathBuf,

        /// Sheet holding the visits (defaults to the configured name)
        #[arg(short, long)]
        sheet: Option<String>,
    },

    /// Convert legacy `.xls` files (or every one in a directory) to `.xlsx`
    Convert {
        /// File or directory
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "converted")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Extract { inputs, mode, output } => {
            let files = expand_inputs(&inputs)?;
            info!(files = files.len(), mode = %mode, "Starting extraction");
            let batch = ExtractionEngine::new(&config).process(&files, mode, &output)?;
            let summary = format!(
                "Report: {}\nRecords: {} (inside {}, outside {}, undefined {})\nCars: {}, sheets: {}, skipped sheets: {}, unreadable files: {}",
                batch.report.display(),
                batch.extraction.statistics.total_records,
                batch.extraction.statistics.inside_zone,
                batch.extraction.statistics.outside_zone,
                batch.extraction.statistics.undefined_zone,
                batch.extraction.statistics.unique_cars,
                batch.extraction.statistics.sheets_processed,
                batch.extraction.skipped_sheets.len(),
                batch.extraction.failed_files.len(),
            );
            print_result(cli.format, &batch, summary)
        }
        Commands::Distribute { input, sheet, output, archive: zip_path } => {
            let engine = DistributionEngine::new(&config);
            let result = engine.distribute(&input, sheet.as_deref(), &output)?;
            if let Some(zip_path) = zip_path {
                archive::bundle(&result.paths(&output), &zip_path)?;
            }
            print_result(cli.format, &result, &result)
        }
        Commands::Validate { input, sheet } => {
            let validation = DistributionEngine::new(&config).validate(&input, sheet.as_deref())?;
            let summary = format!(
                "Rows: {}\nSupervisors: {}\nRepresentatives: {}\nLines: {}\nColumns: {}",
                validation.total_rows,
                validation.supervisors_count,
                validation.representatives_count,
                validation.lines_count,
                validation.columns.join(", ")
            );
            print_result(cli.format, &validation, summary)
        }
        Commands::Convert { input, output } => {
            let normalizer = FormatNormalizer::new(config.normalizer.clone());
            if input.is_dir() {
                let summary = normalizer.convert_directory(&input, &output)?;
                let text = format!(
                    "Converted: {}, already modern: {}, failed: {}, total: {}",
                    summary.converted.len(),
                    summary.skipped.len(),
                    summary.errors.len(),
                    summary.total
                );
                print_result(cli.format, &summary, text)
            } else {
                let converted = normalizer.normalize(&input, &output)?;
                print_result(cli.format, &converted, converted.display())
            }
        }
    }
}

/// Expands glob patterns; plain paths are kept even when they do not exist so the
/// batch can report them as unreadable.
fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if Path::new(input).exists() || !input.contains(['*', '?', '[']) {
            files.push(PathBuf::from(input));
            continue;
        }
        let before = files.len();
        for entry in glob(input).with_context(|| format!("Invalid glob pattern: {input}"))? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => (),
                Err(e) => warn!("Could not read {}", e),
            }
        }
        if files.len() == before {
            warn!(pattern = %input, "Pattern matched no files");
        }
    }
    if files.is_empty() {
        bail!("No input files");
    }
    Ok(files)
}

fn print_result<T: Serialize>(format: OutputFormat, value: &T, summary: impl Display) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{summary}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
