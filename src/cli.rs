use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::source::ProjectId;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest CSV files and browse or edit them without touching the original rows",
    long_about = None
)]
pub struct Cli {
    /// Workspace directory holding uploaded files, sources, and tables
    #[arg(long, global = true, default_value = ".csv-overlay")]
    pub store: PathBuf,
    /// YAML file overriding engine limits and defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Copy a CSV/TSV file into the workspace as a project's source file
    Register(RegisterArgs),
    /// List a project's registered source files, newest first
    Sources(SourcesArgs),
    /// Parse a registered source file into a Table (idempotent)
    Ingest(IngestArgs),
    /// Print one page of rows with edits applied
    Page(PageArgs),
    /// Print an evenly sampled preview of rows with edits applied
    Preview(PreviewArgs),
    /// Validate and apply cell edits to a Table
    Edit(EditArgs),
    /// Show a Table's schema, row count, and edit summary
    Show(ShowArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Project and optional source selecting a Table.
#[derive(Debug, Args)]
pub struct TableArgs {
    /// Project identifier
    #[arg(short, long)]
    pub project: ProjectId,
    /// Source file id; defaults to the project's first Table
    #[arg(long)]
    pub source: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Project identifier
    #[arg(short, long)]
    pub project: ProjectId,
    /// File to register
    #[arg(short, long)]
    pub input: PathBuf,
    /// Name to record instead of the input's file name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Project identifier
    #[arg(short, long)]
    pub project: ProjectId,
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Project identifier
    #[arg(short, long)]
    pub project: ProjectId,
    /// Source file id; defaults to the most recently registered file
    #[arg(long)]
    pub source: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[command(flatten)]
    pub table: TableArgs,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Rows per page (defaults to the configured page size)
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub table: TableArgs,
    /// Maximum rows to show (defaults to the configured preview limit)
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[command(flatten)]
    pub table: TableArgs,
    /// Edits as JSON, e.g. `{"0": {"age": 31}}`
    #[arg(long, conflicts_with = "edits_file", required_unless_present = "edits_file")]
    pub edits: Option<String>,
    /// File containing the edits JSON
    #[arg(long = "edits-file")]
    pub edits_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub table: TableArgs,
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}
