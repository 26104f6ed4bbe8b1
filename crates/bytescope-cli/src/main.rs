//! # bytescope-cli
//!
//! Command-line front end: detect formats, print parsed trees, parse byte
//! ranges of large files, list registered formats and check schema files.

mod render;

use anyhow::Context;
use bytescope_ir::Document;
use bytescope_pipeline::{Bytescope, BytescopeConfig, ParseRequest, ParseService, RangeResult};
use bytescope_registry::{Category, FormatFilter};
use bytescope_schema::Compiler;
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bytescope")]
#[command(about = "Schema-driven binary format inspector")]
#[command(version)]
struct Cli {
    /// Path to a YAML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of .ksy schemas to register (repeatable)
    #[arg(long = "schema-dir", global = true)]
    schema_dirs: Vec<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the format of a file
    Detect {
        file: PathBuf,
    },

    /// Parse a whole file and print its structure
    Parse {
        file: PathBuf,

        /// Registered format id to parse with
        #[arg(short, long)]
        format: Option<String>,

        /// Schema file to register and parse with
        #[arg(short, long, conflicts_with = "format")]
        schema: Option<PathBuf>,

        /// Print JSON instead of an indented tree
        #[arg(long)]
        json: bool,

        /// Fold nodes nested deeper than this
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Parse only the nodes overlapping a byte range
    Range {
        file: PathBuf,

        /// First byte of the range (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_offset)]
        start: usize,

        /// End of the range, exclusive
        #[arg(value_parser = parse_offset)]
        end: usize,

        #[arg(short, long)]
        format: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List registered formats
    Formats {
        /// Only formats of this category (system, user, community)
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Compile a schema file and report errors and warnings
    Check {
        schema: PathBuf,
    },
}

fn parse_offset(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{text}': {e}"))
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<BytescopeConfig> {
    let mut config = match &cli.config {
        Some(path) => BytescopeConfig::load(path)?,
        None => BytescopeConfig::default(),
    };
    config.schema_dirs.extend(cli.schema_dirs.iter().cloned());
    Ok(config)
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let scope = Arc::new(Bytescope::from_config(&config)?);

    match cli.command {
        Commands::Detect { file } => {
            let data = read_input(&file)?;
            let name = file.file_name().and_then(|n| n.to_str());
            match scope.detect_format(&data, name) {
                Some(detection) => {
                    println!("{} ({})", detection.format_id, detection.method);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("unknown");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Parse {
            file,
            format,
            schema,
            json,
            depth,
        } => {
            let data = read_input(&file)?;
            let format = match schema {
                Some(path) => {
                    let source = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let info = scope.registry().register(&source, Category::User)?;
                    tracing::info!("Registered schema '{}' from {}", info.id, path.display());
                    Some(info.id)
                }
                None => format,
            };

            let (service, _responses) = ParseService::new(Arc::clone(&scope), &config.worker);
            let output = service
                .call(ParseRequest::full(data, format.as_deref()))
                .await?;
            let document = output
                .document()
                .context("parse service returned a range for a full parse")?;
            print_document(document, json, depth)?;
            Ok(if document.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Range {
            file,
            start,
            end,
            format,
            json,
        } => {
            let data = read_input(&file)?;
            let (service, _responses) = ParseService::new(Arc::clone(&scope), &config.worker);
            let output = service
                .call(ParseRequest::range(data, start, end, format.as_deref()))
                .await?;
            let result = output
                .range()
                .context("parse service returned a document for a range parse")?;
            print_range(result, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Formats { category, json } => {
            let mut filter = FormatFilter::new();
            if let Some(category) = category {
                filter = filter.category(category.parse()?);
            }
            print_formats(&scope, &filter, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { schema } => {
            let source = std::fs::read_to_string(&schema)
                .with_context(|| format!("failed to read {}", schema.display()))?;
            let report = Compiler::with_resolver(scope.registry().as_ref()).check(&source);
            for error in &report.errors {
                println!("error: {error}");
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            println!(
                "{}: {} error(s), {} warning(s)",
                schema.display(),
                report.errors.len(),
                report.warnings.len()
            );
            Ok(if report.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn print_document(document: &Document, json: bool, depth: Option<usize>) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(document)?);
    } else {
        if let Some(format_id) = &document.metadata.format_id {
            println!("Format: {format_id}");
        }
        print!("{}", render::tree(&document.root, depth));
        print!("{}", render::findings(document));
    }
    Ok(())
}

fn print_range(result: &RangeResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!(
            "Format: {} range 0x{:X}..0x{:X} (parsed 0x{:X}..0x{:X})",
            result.format_id, result.start, result.end, result.window_start, result.window_end
        );
        for node in &result.nodes {
            print!("{}", render::tree(node, None));
        }
    }
    Ok(())
}

fn print_formats(scope: &Bytescope, filter: &FormatFilter, json: bool) -> anyhow::Result<()> {
    let formats = scope.registry().list(filter);
    let stats = scope.registry_stats();

    if json {
        let formats: Vec<serde_json::Value> = formats
            .iter()
            .map(|info| {
                serde_json::json!({
                    "id": info.id,
                    "title": info.title,
                    "category": info.category,
                    "extensions": info.extensions,
                    "signature": info.signature_hex(),
                })
            })
            .collect();
        let out = serde_json::json!({ "formats": formats, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for info in &formats {
        println!(
            "{:<12} {:<10} {:<24} {}",
            info.id,
            info.category,
            info.signature_hex().unwrap_or_else(|| "-".to_string()),
            info.display_name()
        );
    }
    println!(
        "{} format(s), {} signature(s), {} extension(s)",
        stats.format_count, stats.signature_count, stats.extension_count
    );
    Ok(())
}
