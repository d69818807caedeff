//! Ingestion: one Table per (project, source file), created once.
//!
//! Full rows are kept only when the file fits under the configured cap. The
//! initial fill and the lazy backfill of an existing sample-only Table share
//! [`Ingestor::ensure_full_data`], which never fails the caller: anything that
//! goes wrong leaves the Table sample-only and is logged.

use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    parser::TableParser,
    rows::{Row, sanitize_rows},
    source::{FileStore, ProjectId, SourceFile},
    store::{Table, TableHandle, TableKey, TableRegistry, TableStore},
};

/// What [`Ingestor::ensure_full_data`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backfill {
    AlreadyPresent,
    Filled,
    OverCap,
    /// Another caller holds the backfill guard for this Table.
    InProgress,
    Failed,
}

pub struct Ingestor<'a> {
    registry: &'a TableRegistry,
    parser: &'a dyn TableParser,
    files: &'a dyn FileStore,
    config: &'a EngineConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        registry: &'a TableRegistry,
        parser: &'a dyn TableParser,
        files: &'a dyn FileStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            registry,
            parser,
            files,
            config,
        }
    }

    /// Returns the Table for `source`, creating it on first call.
    ///
    /// Parse and format errors of a new file propagate. An existing Table is
    /// returned as is, after a best-effort backfill when it is sample-only
    /// and within the cap.
    pub fn ingest(&self, project: ProjectId, source: &SourceFile) -> EngineResult<TableHandle> {
        if source.project != project {
            return Err(EngineError::not_found(format!(
                "source file {} in project {project}",
                source.id
            )));
        }
        let key = TableKey {
            project,
            source: source.id,
        };
        if let Some(handle) = self.registry.open(&key)? {
            debug!("Table {key:?} already exists");
            self.ensure_full_data(&handle, source);
            return Ok(handle);
        }

        let bytes = self.files.read(&source.storage_key)?;
        let parsed = self.parser.parse(source, &bytes)?;
        let full_rows = self.full_rows(source, &bytes, parsed.row_count);
        let fallback = full_rows.as_ref().map(|_| {
            Table::new(
                key,
                parsed.schema.clone(),
                parsed.row_count,
                parsed.sample_rows.clone(),
                None,
            )
        });
        let table = Table::new(
            key,
            parsed.schema,
            parsed.row_count,
            parsed.sample_rows,
            full_rows,
        );

        let (handle, created) = match (self.registry.create(table), fallback) {
            (Ok(outcome), _) => outcome,
            (Err(err), Some(sample_only)) => {
                warn!("Persisting full rows for {key:?} failed ({err}); storing sample only");
                self.registry.create(sample_only)?
            }
            (Err(err), None) => return Err(err),
        };
        if created {
            handle.read(|table| {
                info!(
                    "Ingested '{}' for project {project}: {} column(s), {} row(s), full data {}",
                    source.filename,
                    table.schema().len(),
                    table.row_count(),
                    if table.has_full_data() { "stored" } else { "not stored" }
                )
            });
        } else {
            // Lost a creation race; the winner's Table stands.
            self.ensure_full_data(&handle, source);
        }
        Ok(handle)
    }

    /// Fills `full_rows` of a sample-only Table when it fits under the cap.
    ///
    /// Never returns an error. Concurrent callers on the same handle do the
    /// parsing work at most once; the loser gets [`Backfill::InProgress`].
    pub fn ensure_full_data(&self, handle: &TableHandle, source: &SourceFile) -> Backfill {
        let (has_full, row_count) = handle.read(|t| (t.has_full_data(), t.row_count()));
        if has_full {
            return Backfill::AlreadyPresent;
        }
        if row_count > self.config.full_data_cap {
            return Backfill::OverCap;
        }
        let Some(_guard) = handle.try_begin_backfill() else {
            debug!("Backfill of {:?} already running", handle.key());
            return Backfill::InProgress;
        };
        if handle.read(Table::has_full_data) {
            return Backfill::AlreadyPresent;
        }

        let bytes = match self.files.read(&source.storage_key) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Backfill of {:?} could not read source: {err}", handle.key());
                return Backfill::Failed;
            }
        };
        let Some(rows) = self.full_rows(source, &bytes, row_count) else {
            return Backfill::Failed;
        };
        match self
            .registry
            .update(handle, |table| Ok(table.fill_full_rows(rows)))
        {
            Ok(true) => {
                info!("Backfilled {row_count} row(s) into {:?}", handle.key());
                Backfill::Filled
            }
            Ok(false) => Backfill::AlreadyPresent,
            Err(err) => {
                warn!("Backfill of {:?} not persisted: {err}", handle.key());
                Backfill::Failed
            }
        }
    }

    /// Sanitized rows of the whole file, or `None` when over the cap or the
    /// parser fails to produce them.
    fn full_rows(&self, source: &SourceFile, bytes: &[u8], row_count: usize) -> Option<Vec<Row>> {
        let cap = self.config.full_data_cap;
        if row_count > cap {
            debug!("'{}' has {row_count} row(s), over the cap of {cap}", source.filename);
            return None;
        }
        match self.parser.read_rows(source, bytes, cap) {
            Ok(raw) => Some(sanitize_rows(&raw)),
            Err(err) => {
                warn!("Reading full rows of '{}' failed: {err}", source.filename);
                None
            }
        }
    }
}

/// The requested source of a project, or its most recently registered one.
pub fn resolve_source(
    store: &dyn TableStore,
    project: ProjectId,
    source: Option<Uuid>,
) -> EngineResult<SourceFile> {
    let sources = store.sources(project)?;
    let found = match source {
        Some(id) => sources.into_iter().find(|s| s.id == id),
        None => sources.into_iter().max_by_key(|s| s.created_at),
    };
    found.ok_or_else(|| match source {
        Some(id) => EngineError::not_found(format!("source file {id} in project {project}")),
        None => EngineError::not_found(format!("source file for project {project}")),
    })
}
