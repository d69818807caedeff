pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod io_utils;
pub mod overlay;
pub mod parser;
pub mod rows;
pub mod schema;
pub mod source;
pub mod store;
pub mod table;
pub mod view;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    cli::{Cli, Commands, OutputFormat, TableArgs},
    config::EngineConfig,
    error::EngineError,
    ingest::{Ingestor, resolve_source},
    parser::DelimitedParser,
    schema::Schema,
    source::{DirFileStore, ProjectId, register_upload},
    store::{JsonDirStore, Table, TableHandle, TableKey, TableRegistry},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_overlay", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let workspace = Workspace::open(&cli.store, cli.config.as_deref())?;
    match &cli.command {
        Commands::Register(args) => handle_register(&workspace, args),
        Commands::Sources(args) => handle_sources(&workspace, args),
        Commands::Ingest(args) => handle_ingest(&workspace, args),
        Commands::Page(args) => handle_page(&workspace, args),
        Commands::Preview(args) => handle_preview(&workspace, args),
        Commands::Edit(args) => handle_edit(&workspace, args),
        Commands::Show(args) => handle_show(&workspace, args),
    }
}

/// Everything a command needs, rooted at the `--store` directory.
struct Workspace {
    config: EngineConfig,
    registry: TableRegistry,
    files: DirFileStore,
    parser: DelimitedParser,
}

impl Workspace {
    fn open(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = EngineConfig::load_or_default(config_path)
            .with_context(|| format!("Loading configuration {config_path:?}"))?;
        debug!("Using store {root:?} with {config:?}");
        let encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
        Ok(Self {
            registry: TableRegistry::new(JsonDirStore::new(root)),
            files: DirFileStore::new(root),
            parser: DelimitedParser::new(&config).with_encoding(encoding),
            config,
        })
    }

    fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.registry, &self.parser, &self.files, &self.config)
    }

    /// Resolves the Table a command targets and backfills it if it is
    /// sample-only but now fits under the cap.
    fn table(&self, args: &TableArgs) -> Result<TableHandle> {
        let handle = match args.source {
            Some(source) => self.registry.open(&TableKey {
                project: args.project,
                source,
            })?,
            None => self.registry.table_for_project(args.project)?,
        }
        .ok_or_else(|| EngineError::not_found(format!("table for project {}", args.project)))?;

        if !handle.read(Table::has_full_data) {
            let key = handle.key();
            match resolve_source(self.registry.store(), key.project, Some(key.source)) {
                Ok(source) => {
                    self.ingestor().ensure_full_data(&handle, &source);
                }
                Err(err) => warn!("Cannot backfill {key:?}: {err}"),
            }
        }
        Ok(handle)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Serializing output")?
    );
    Ok(())
}

fn handle_register(workspace: &Workspace, args: &cli::RegisterArgs) -> Result<()> {
    let bytes = fs::read(&args.input).with_context(|| format!("Reading {:?}", args.input))?;
    let filename = match &args.name {
        Some(name) => name.clone(),
        None => args
            .input
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{:?} has no usable file name", args.input))?,
    };
    let source = register_upload(
        &workspace.config,
        &workspace.files,
        args.project,
        &filename,
        &bytes,
    )
    .with_context(|| format!("Registering {:?}", args.input))?;
    workspace
        .registry
        .store()
        .save_source(&source)
        .context("Recording source file")?;
    print_json(&source)
}

fn handle_sources(workspace: &Workspace, args: &cli::SourcesArgs) -> Result<()> {
    let mut sources = workspace
        .registry
        .store()
        .sources(args.project)
        .with_context(|| format!("Listing sources of project {}", args.project))?;
    sources.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    match args.format {
        OutputFormat::Json => print_json(&sources),
        OutputFormat::Table => {
            let headers = ["id", "filename", "size_bytes", "created_at"]
                .map(str::to_string)
                .to_vec();
            let rows = sources
                .iter()
                .map(|source| {
                    vec![
                        source.id.to_string(),
                        source.filename.clone(),
                        source.size_bytes.to_string(),
                        source.created_at.to_rfc3339(),
                    ]
                })
                .collect::<Vec<_>>();
            print!("{}", table::render_table(&headers, &rows));
            println!("{} source file(s)", sources.len());
            Ok(())
        }
    }
}

fn handle_ingest(workspace: &Workspace, args: &cli::IngestArgs) -> Result<()> {
    let source = resolve_source(workspace.registry.store(), args.project, args.source)?;
    info!("Ingesting '{}' ({})", source.filename, source.id);
    let handle = workspace
        .ingestor()
        .ingest(args.project, &source)
        .with_context(|| format!("Ingesting '{}'", source.filename))?;
    print_json(&handle.read(TableSummary::of))
}

fn handle_page(workspace: &Workspace, args: &cli::PageArgs) -> Result<()> {
    let handle = workspace.table(&args.table)?;
    let page_size = args.page_size.unwrap_or(workspace.config.default_page_size);
    let page = view::get_page(&handle, args.page, page_size)?;
    match args.format {
        OutputFormat::Json => print_json(&page),
        OutputFormat::Table => {
            let first = (page.pagination.page - 1) * page.pagination.page_size;
            print!("{}", table::render_rows(&page.schema, &page.data, Some(first)));
            let info = &page.pagination;
            println!(
                "Page {} of {} ({} row(s))",
                info.page, info.total_pages, info.total_rows
            );
            Ok(())
        }
    }
}

fn handle_preview(workspace: &Workspace, args: &cli::PreviewArgs) -> Result<()> {
    let handle = workspace.table(&args.table)?;
    let limit = args.limit.unwrap_or(workspace.config.default_preview_limit);
    let preview = view::get_preview(&handle, limit, &workspace.config)?;
    match args.format {
        OutputFormat::Json => print_json(&preview),
        OutputFormat::Table => {
            print!("{}", table::render_rows(&preview.schema, &preview.data, None));
            match &preview.sampling_message {
                Some(message) => println!("{message}"),
                None => println!("{} row(s)", preview.total_rows),
            }
            Ok(())
        }
    }
}

fn handle_edit(workspace: &Workspace, args: &cli::EditArgs) -> Result<()> {
    let text = match (&args.edits, &args.edits_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("Reading edits from {path:?}"))?
        }
        (None, None) => return Err(anyhow!("Either --edits or --edits-file is required")),
    };
    let body: JsonValue = serde_json::from_str(&text).context("Parsing edits JSON")?;
    let requested = overlay::parse_edit_request(&body)?;
    let handle = workspace.table(&args.table)?;
    let applied = overlay::apply_edits(&workspace.registry, &handle, &requested)?;
    print_json(&EditReport {
        rows_updated: applied.row_count(),
        cells_updated: applied.cell_count(),
        applied_edits: &applied,
    })
}

fn handle_show(workspace: &Workspace, args: &cli::ShowArgs) -> Result<()> {
    let handle = workspace.table(&args.table)?;
    let summary = handle.read(TableSummary::of);
    match args.format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            println!("Project: {}", summary.project);
            println!("Source: {}", summary.source);
            println!("Rows: {}", summary.row_count);
            println!("Full data: {}", if summary.has_full_data { "yes" } else { "no" });
            println!(
                "Edits: {} cell(s) across {} row(s)",
                summary.edited_cells, summary.edited_rows
            );
            let headers = vec!["column".to_string(), "type".to_string()];
            let rows = summary
                .schema
                .iter()
                .map(|(name, ty)| vec![name.to_string(), ty.to_string()])
                .collect::<Vec<_>>();
            print!("{}", table::render_table(&headers, &rows));
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct TableSummary {
    project: ProjectId,
    source: Uuid,
    schema: Schema,
    row_count: usize,
    sample_rows: usize,
    has_full_data: bool,
    edited_rows: usize,
    edited_cells: usize,
    created_at: DateTime<Utc>,
}

impl TableSummary {
    fn of(table: &Table) -> Self {
        let key = table.key();
        Self {
            project: key.project,
            source: key.source,
            schema: table.schema().clone(),
            row_count: table.row_count(),
            sample_rows: table.sample_rows().len(),
            has_full_data: table.has_full_data(),
            edited_rows: table.edit_overlay().row_count(),
            edited_cells: table.edit_overlay().cell_count(),
            created_at: table.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EditReport<'a> {
    rows_updated: usize,
    cells_updated: usize,
    applied_edits: &'a overlay::AppliedEdits,
}
