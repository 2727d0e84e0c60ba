//! tagmatrix CLI - Tag-level comparison of medical-record groups
//!
//! Ingests parsed record trees into a DuckDB store, diffs records tag by tag,
//! and builds tag matrices across groups of records.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tagmatrix_core::differ::groups::DEFAULT_COMPARISON_TABLE;
use tagmatrix_core::matrix::DEFAULT_MATRIX_TABLE;
use tagmatrix_core::{FetchStrategy, IdentifierPolicy, MatrixOptions, WriteMode};

mod commands;
mod config;
mod output;

use commands::*;
use config::TagmatrixConfig;
use output::OutputFormat;

fn parse_fetch(s: &str) -> Result<FetchStrategy, String> {
    FetchStrategy::parse(s).ok_or_else(|| format!("'{}' is not a fetch strategy (per_batch, preload)", s))
}

fn parse_policy(s: &str) -> Result<IdentifierPolicy, String> {
    IdentifierPolicy::parse(s)
        .ok_or_else(|| format!("'{}' is not an identifier policy (union, reference_only)", s))
}

/// Tag-level comparison of medical-record groups.
///
/// Records are flattened into tag paths, so a difference deep inside a
/// nested sequence shows up on its own row.
#[derive(Parser)]
#[command(name = "tagmatrix")]
#[command(author, version)]
#[command(about = "Tag-level diffs and tag matrices for groups of medical records")]
#[command(propagate_version = true)]
#[command(after_help = "Quick Start:
  tagmatrix ingest origin ./before/          Load records into group 'origin'
  tagmatrix ingest terminal ./after/         Load records into group 'terminal'
  tagmatrix compare --groups origin terminal Diff every origin record
  tagmatrix matrix origin terminal=map.csv   Build a tag matrix
  tagmatrix tables tag_matrix                Preview a result table")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (overrides config default)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    /// DuckDB store (overrides config; default tagmatrix.duckdb)
    #[arg(long, global = true, env = "TAGMATRIX_DB")]
    db: Option<PathBuf>,

    /// Config file (default .tagmatrix.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load record files into a group, replacing its previous records
    Ingest {
        /// Group label
        group: String,

        /// Record files or directories (.json, .jsonl, .ndjson)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Files per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Concurrent batches (defaults to CPU count)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Show the tag-path index of a record file
    Index {
        /// Record file
        file: PathBuf,

        /// Only index the record with this identifier
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Compare two record files, or two stored groups with --groups
    #[command(visible_alias = "diff")]
    Compare {
        /// Left record file (origin group with --groups)
        left: String,

        /// Right record file (terminal group with --groups)
        right: String,

        /// Treat LEFT and RIGHT as group labels in the store
        #[arg(short, long)]
        groups: bool,

        /// Identifier of the left record, when the file holds several
        #[arg(long)]
        left_id: Option<String>,

        /// Identifier of the right record, when the file holds several
        #[arg(long)]
        right_id: Option<String>,

        /// Show identical tags as well
        #[arg(short, long)]
        all: bool,

        /// Remap file: origin identifier -> terminal identifier (--groups)
        #[arg(long)]
        remap: Option<PathBuf>,

        /// Result table (--groups)
        #[arg(short, long)]
        table: Option<String>,

        /// Identifiers per batch (--groups)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Concurrent batches (--groups)
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Record fetch strategy: per_batch or preload (--groups)
        #[arg(long, value_parser = parse_fetch)]
        fetch: Option<FetchStrategy>,

        /// Drop and recreate the result table instead of appending (--groups)
        #[arg(long)]
        overwrite: bool,
    },

    /// Build a tag matrix across stored groups
    Matrix {
        /// Groups as LABEL or LABEL=REMAP_FILE; the first is the reference group
        #[arg(required = true)]
        groups: Vec<String>,

        /// Result table
        #[arg(short, long)]
        table: Option<String>,

        /// Identifiers per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Concurrent batches (defaults to CPU count)
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Identifier policy: union or reference_only
        #[arg(long, value_parser = parse_policy)]
        policy: Option<IdentifierPolicy>,

        /// Record fetch strategy: per_batch or preload
        #[arg(long, value_parser = parse_fetch)]
        fetch: Option<FetchStrategy>,

        /// Drop and recreate the result table instead of appending
        #[arg(long)]
        overwrite: bool,
    },

    /// List groups and tables, or preview one table
    #[command(visible_alias = "ls")]
    Tables {
        /// Table to preview
        table: Option<String>,

        /// Rows to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn write_mode(overwrite: bool) -> WriteMode {
    if overwrite {
        WriteMode::Overwrite
    } else {
        WriteMode::Append
    }
}

// Batch runs own their worker pools, so main stays synchronous.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => TagmatrixConfig::load_file(path),
        None => TagmatrixConfig::load(Path::new(".")),
    };

    // Resolve output format: CLI flag > config default > Table
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format()
            .and_then(|f| f.parse().ok())
            .unwrap_or(OutputFormat::Table)
    });

    if let Some(use_color) = config.use_color() {
        colored::control::set_override(use_color);
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    let db = config.db_path(cli.db.as_deref());
    let show_progress = !cli.quiet && format == OutputFormat::Table;

    match command {
        Commands::Ingest {
            group,
            paths,
            batch_size,
            parallelism,
        } => ingest::run(
            ingest::IngestArgs {
                db: &db,
                group: &group,
                paths: &paths,
                batch_size: config.batch_size(batch_size),
                parallelism: config.parallelism(parallelism),
                show_progress,
            },
            format,
        ),
        Commands::Index { file, identifier } => index::run(&file, identifier.as_deref(), format),
        Commands::Compare {
            left,
            right,
            groups,
            left_id,
            right_id,
            all,
            remap,
            table,
            batch_size,
            parallelism,
            fetch,
            overwrite,
        } => {
            if groups {
                let table = table
                    .or_else(|| config.compare.table.clone())
                    .unwrap_or_else(|| DEFAULT_COMPARISON_TABLE.to_string());
                let options = compare::compare_options(
                    table,
                    config.batch_size(batch_size),
                    config.parallelism(parallelism),
                    fetch.or_else(|| config.fetch_strategy()).unwrap_or_default(),
                    overwrite,
                );
                compare::run_groups(
                    compare::GroupArgs {
                        db: &db,
                        origin: &left,
                        terminal: &right,
                        remap: remap.as_deref(),
                        options,
                        show_progress,
                    },
                    format,
                )
            } else {
                if remap.is_some() || table.is_some() {
                    tracing::warn!("--remap and --table only apply with --groups");
                }
                let left_label = config.compare.origin_label.as_deref().unwrap_or("origin");
                let right_label = config.compare.terminal_label.as_deref().unwrap_or("terminal");
                compare::run_files(
                    compare::FileArgs {
                        left: Path::new(&left),
                        right: Path::new(&right),
                        left_id: left_id.as_deref(),
                        right_id: right_id.as_deref(),
                        left_label,
                        right_label,
                        all,
                    },
                    format,
                )
            }
        }
        Commands::Matrix {
            groups,
            table,
            batch_size,
            parallelism,
            policy,
            fetch,
            overwrite,
        } => {
            let options = MatrixOptions {
                table: table
                    .or_else(|| config.matrix.table.clone())
                    .unwrap_or_else(|| DEFAULT_MATRIX_TABLE.to_string()),
                batch_size: config.batch_size(batch_size),
                parallelism: config.parallelism(parallelism),
                policy: policy.or_else(|| config.identifier_policy()).unwrap_or_default(),
                fetch: fetch.or_else(|| config.fetch_strategy()).unwrap_or_default(),
                write_mode: write_mode(overwrite),
            };
            matrix::run(
                matrix::MatrixArgs {
                    db: &db,
                    groups: &groups,
                    options,
                    show_progress,
                },
                format,
            )
        }
        Commands::Tables { table, limit } => tables::run(&db, table.as_deref(), limit, format),
    }
}
