#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_overlay::{
    config::EngineConfig,
    ingest::Ingestor,
    parser::DelimitedParser,
    source::{FileStore, MemoryFileStore, SourceFile, register_upload},
    store::{MemoryStore, TableHandle, TableRegistry, TableStore},
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory passed to `--store`.
    pub fn store_dir(&self) -> PathBuf {
        self.temp_dir.path().join("store")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// `id,value` CSV with `rows` data lines; `value` is `id * 10`.
pub fn numbered_csv(rows: usize) -> String {
    let mut out = String::from("id,value\n");
    for id in 0..rows {
        let _ = writeln!(out, "{id},{}", id * 10);
    }
    out
}

/// In-memory engine wiring for library-level integration tests.
pub struct Engine {
    pub config: EngineConfig,
    pub registry: TableRegistry,
    pub files: MemoryFileStore,
    pub parser: DelimitedParser,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    pub fn with_store(config: EngineConfig, store: impl TableStore + 'static) -> Self {
        let parser = DelimitedParser::new(&config);
        Self {
            config,
            registry: TableRegistry::new(store),
            files: MemoryFileStore::new(),
            parser,
        }
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.registry, &self.parser, &self.files, &self.config)
    }

    pub fn upload(&self, project: u64, name: &str, contents: &str) -> SourceFile {
        let source = register_upload(
            &self.config,
            &self.files,
            project,
            name,
            contents.as_bytes(),
        )
        .expect("register upload");
        self.registry
            .store()
            .save_source(&source)
            .expect("save source");
        source
    }

    /// Registers and ingests `contents` for project 1.
    pub fn ingest(&self, name: &str, contents: &str) -> TableHandle {
        let source = self.upload(1, name, contents);
        self.ingestor().ingest(1, &source).expect("ingest")
    }

    pub fn stored_bytes(&self, source: &SourceFile) -> Vec<u8> {
        self.files.read(&source.storage_key).expect("stored bytes")
    }
}
