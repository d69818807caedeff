//! Persisted Tables and the registry that serializes access to them.
//!
//! A [`Table`] is written once by ingestion. Afterwards only two things may
//! change: `full_rows` may go from absent to present (backfill), and the edit
//! overlay may grow. [`TableRegistry::update`] is the single write path; it
//! holds the Table's write lock and the store's [`TableLock`] across reload,
//! mutation and persistence, and rolls the in-memory state back if persistence
//! fails. Several processes may share one [`JsonDirStore`] root.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    overlay::EditOverlay,
    rows::Row,
    schema::Schema,
    source::{ProjectId, SourceFile},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    pub project: ProjectId,
    pub source: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    project: ProjectId,
    source: Uuid,
    schema: Schema,
    row_count: usize,
    sample_rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full_rows: Option<Vec<Row>>,
    #[serde(default)]
    edit_overlay: EditOverlay,
    created_at: DateTime<Utc>,
}

impl Table {
    pub fn new(
        key: TableKey,
        schema: Schema,
        row_count: usize,
        sample_rows: Vec<Row>,
        full_rows: Option<Vec<Row>>,
    ) -> Self {
        Self {
            project: key.project,
            source: key.source,
            schema,
            row_count,
            sample_rows,
            full_rows,
            edit_overlay: EditOverlay::default(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> TableKey {
        TableKey {
            project: self.project,
            source: self.source,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn sample_rows(&self) -> &[Row] {
        &self.sample_rows
    }

    pub fn full_rows(&self) -> Option<&[Row]> {
        self.full_rows.as_deref()
    }

    pub fn has_full_data(&self) -> bool {
        self.full_rows.is_some()
    }

    pub fn edit_overlay(&self) -> &EditOverlay {
        &self.edit_overlay
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn edit_overlay_mut(&mut self) -> &mut EditOverlay {
        &mut self.edit_overlay
    }

    /// Sets full rows once; returns `false` if they were already present.
    pub(crate) fn fill_full_rows(&mut self, rows: Vec<Row>) -> bool {
        if self.full_rows.is_some() {
            return false;
        }
        self.full_rows = Some(rows);
        true
    }

    pub(crate) fn without_full_rows(mut self) -> Self {
        self.full_rows = None;
        self
    }
}

/// Exclusive claim on one stored Table, released on drop.
///
/// A lock backed by a file means other processes may write the same Table,
/// so the holder must reload before mutating.
#[derive(Debug, Default)]
pub struct TableLock {
    file: Option<File>,
}

impl TableLock {
    /// For stores no other process can reach.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn is_shared(&self) -> bool {
        self.file.is_some()
    }
}

pub trait TableStore: Send + Sync {
    fn load_table(&self, key: &TableKey) -> EngineResult<Option<Table>>;
    fn save_table(&self, table: &Table) -> EngineResult<()>;
    /// Blocks until no other writer holds `key`.
    fn lock_table(&self, _key: &TableKey) -> EngineResult<TableLock> {
        Ok(TableLock::local())
    }
    fn table_keys(&self, project: ProjectId) -> EngineResult<Vec<TableKey>>;
    fn save_source(&self, source: &SourceFile) -> EngineResult<()>;
    fn sources(&self, project: ProjectId) -> EngineResult<Vec<SourceFile>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableKey, Table>>,
    sources: RwLock<HashMap<ProjectId, Vec<SourceFile>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryStore {
    fn load_table(&self, key: &TableKey) -> EngineResult<Option<Table>> {
        Ok(self.tables.read().get(key).cloned())
    }

    fn save_table(&self, table: &Table) -> EngineResult<()> {
        self.tables.write().insert(table.key(), table.clone());
        Ok(())
    }

    fn table_keys(&self, project: ProjectId) -> EngineResult<Vec<TableKey>> {
        let mut keys: Vec<TableKey> = self
            .tables
            .read()
            .keys()
            .filter(|key| key.project == project)
            .copied()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn save_source(&self, source: &SourceFile) -> EngineResult<()> {
        let mut sources = self.sources.write();
        let entries = sources.entry(source.project).or_default();
        entries.retain(|existing| existing.id != source.id);
        entries.push(source.clone());
        Ok(())
    }

    fn sources(&self, project: ProjectId) -> EngineResult<Vec<SourceFile>> {
        Ok(self.sources.read().get(&project).cloned().unwrap_or_default())
    }
}

/// One JSON document per Table under `<root>/tables/<project>/<source>.json`
/// and one source list per project under `<root>/sources/<project>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project: ProjectId) -> PathBuf {
        self.root.join("tables").join(project.to_string())
    }

    fn table_path(&self, key: &TableKey) -> PathBuf {
        self.project_dir(key.project)
            .join(format!("{}.json", key.source))
    }

    fn lock_path(&self, key: &TableKey) -> PathBuf {
        self.project_dir(key.project)
            .join(format!("{}.lock", key.source))
    }

    fn sources_path(&self, project: ProjectId) -> PathBuf {
        self.root.join("sources").join(format!("{project}.json"))
    }
}

/// Takes an exclusive advisory lock on `path`, creating it if needed.
fn lock_file(path: &Path) -> EngineResult<TableLock> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.lock()?;
    Ok(TableLock { file: Some(file) })
}

/// Writes through a temp file and renames so readers never see half a file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::Storage(format!("{path:?} has no parent directory")))?;
    fs::create_dir_all(parent)?;
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, value)?;
        file.flush()?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl TableStore for JsonDirStore {
    fn load_table(&self, key: &TableKey) -> EngineResult<Option<Table>> {
        read_json(&self.table_path(key))
    }

    fn save_table(&self, table: &Table) -> EngineResult<()> {
        let path = self.table_path(&table.key());
        write_json_atomic(&path, table)?;
        debug!("Persisted table {:?}", path);
        Ok(())
    }

    fn lock_table(&self, key: &TableKey) -> EngineResult<TableLock> {
        lock_file(&self.lock_path(key))
    }

    fn table_keys(&self, project: ProjectId) -> EngineResult<Vec<TableKey>> {
        let dir = self.project_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(source) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            keys.push(TableKey { project, source });
        }
        keys.sort();
        Ok(keys)
    }

    fn save_source(&self, source: &SourceFile) -> EngineResult<()> {
        let path = self.sources_path(source.project);
        let _lock = lock_file(&path.with_extension("lock"))?;
        let mut sources: Vec<SourceFile> = read_json(&path)?.unwrap_or_default();
        sources.retain(|existing| existing.id != source.id);
        sources.push(source.clone());
        write_json_atomic(&path, &sources)
    }

    fn sources(&self, project: ProjectId) -> EngineResult<Vec<SourceFile>> {
        Ok(read_json(&self.sources_path(project))?.unwrap_or_default())
    }
}

#[derive(Debug)]
struct OpenTable {
    key: TableKey,
    table: RwLock<Table>,
    backfill: Mutex<()>,
}

/// Shared access to one open Table. Clones refer to the same Table.
#[derive(Debug, Clone)]
pub struct TableHandle {
    inner: Arc<OpenTable>,
}

impl TableHandle {
    fn new(table: Table) -> Self {
        Self {
            inner: Arc::new(OpenTable {
                key: table.key(),
                table: RwLock::new(table),
                backfill: Mutex::new(()),
            }),
        }
    }

    pub fn key(&self) -> TableKey {
        self.inner.key
    }

    /// Runs `f` against a consistent view of the Table.
    pub fn read<R>(&self, f: impl FnOnce(&Table) -> R) -> R {
        f(&self.inner.table.read())
    }

    pub fn snapshot(&self) -> Table {
        self.inner.table.read().clone()
    }

    /// `None` while another caller is already backfilling this Table.
    pub(crate) fn try_begin_backfill(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.backfill.try_lock()
    }
}

/// Hands out one [`TableHandle`] per key while any caller still holds it.
///
/// The registry keeps only weak references, so a Table's rows are dropped
/// once the last handle goes away and reloaded on the next `open`.
pub struct TableRegistry {
    store: Box<dyn TableStore>,
    open: Mutex<HashMap<TableKey, Weak<OpenTable>>>,
}

impl TableRegistry {
    pub fn new(store: impl TableStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    /// Number of Tables currently held open by some handle.
    pub fn open_count(&self) -> usize {
        self.open
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn cached(open: &HashMap<TableKey, Weak<OpenTable>>, key: &TableKey) -> Option<TableHandle> {
        open.get(key)
            .and_then(Weak::upgrade)
            .map(|inner| TableHandle { inner })
    }

    fn remember(open: &mut HashMap<TableKey, Weak<OpenTable>>, handle: &TableHandle) {
        open.retain(|_, weak| weak.strong_count() > 0);
        open.insert(handle.key(), Arc::downgrade(&handle.inner));
    }

    pub fn open(&self, key: &TableKey) -> EngineResult<Option<TableHandle>> {
        let mut open = self.open.lock();
        if let Some(handle) = Self::cached(&open, key) {
            return Ok(Some(handle));
        }
        let Some(table) = self.store.load_table(key)? else {
            return Ok(None);
        };
        let handle = TableHandle::new(table);
        Self::remember(&mut open, &handle);
        Ok(Some(handle))
    }

    /// Persists `table` unless one already exists for its key.
    ///
    /// Returns the surviving handle and whether this call created it.
    pub fn create(&self, table: Table) -> EngineResult<(TableHandle, bool)> {
        let key = table.key();
        let mut open = self.open.lock();
        if let Some(handle) = Self::cached(&open, &key) {
            return Ok((handle, false));
        }
        let _lock = self.store.lock_table(&key)?;
        if let Some(existing) = self.store.load_table(&key)? {
            let handle = TableHandle::new(existing);
            Self::remember(&mut open, &handle);
            return Ok((handle, false));
        }
        self.store.save_table(&table)?;
        let handle = TableHandle::new(table);
        Self::remember(&mut open, &handle);
        Ok((handle, true))
    }

    /// First Table of a project by creation time.
    pub fn table_for_project(&self, project: ProjectId) -> EngineResult<Option<TableHandle>> {
        let mut first: Option<TableHandle> = None;
        for key in self.store.table_keys(project)? {
            let Some(handle) = self.open(&key)? else {
                continue;
            };
            let earlier = match &first {
                Some(current) => {
                    handle.read(|t| t.created_at()) < current.read(|t| t.created_at())
                }
                None => true,
            };
            if earlier {
                first = Some(handle);
            }
        }
        Ok(first)
    }

    /// Mutates a Table and persists it before anyone else can observe it.
    ///
    /// When the store is shared with other processes the Table is reloaded
    /// under the store lock first, so `f` always sees the latest persisted
    /// overlay. If `f` fails nothing is persisted; if persistence fails the
    /// overlay and full-row state are restored to what they were before `f` ran.
    pub fn update<R>(
        &self,
        handle: &TableHandle,
        f: impl FnOnce(&mut Table) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let key = handle.key();
        let mut table = handle.inner.table.write();
        let lock = self.store.lock_table(&key)?;
        if lock.is_shared() {
            if let Some(current) = self.store.load_table(&key)? {
                *table = current;
            }
        }
        let overlay_before = table.edit_overlay.clone();
        let had_full_rows = table.full_rows.is_some();
        let restore = |table: &mut Table| {
            table.edit_overlay = overlay_before;
            if !had_full_rows {
                table.full_rows = None;
            }
        };
        let outcome = match f(&mut *table) {
            Ok(outcome) => outcome,
            Err(err) => {
                restore(&mut *table);
                return Err(err);
            }
        };
        if let Err(err) = self.store.save_table(&table) {
            warn!("Rolling back table {key:?} after failed write: {err}");
            restore(&mut *table);
            return Err(err);
        }
        drop(lock);
        Ok(outcome)
    }
}
