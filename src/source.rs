//! Uploaded source files and the byte store behind them.
//!
//! The engine never interprets stored bytes itself; it only hands them to a
//! [`crate::parser::TableParser`]. Registration validates size and
//! extension, fingerprints the content and files it under a storage key.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult},
    io_utils,
};

pub type ProjectId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: Uuid,
    pub project: ProjectId,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn extension(&self) -> String {
        io_utils::extension_of(&self.filename)
    }
}

/// Opaque byte storage addressed by storage key.
pub trait FileStore: Send + Sync {
    fn read(&self, storage_key: &str) -> EngineResult<Vec<u8>>;
    fn write(&self, storage_key: &str, bytes: &[u8]) -> EngineResult<()>;
}

#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, storage_key: &str) -> EngineResult<PathBuf> {
        let relative = Path::new(storage_key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(EngineError::InvalidRequest(format!(
                "storage key '{storage_key}' escapes the file store"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl FileStore for DirFileStore {
    fn read(&self, storage_key: &str) -> EngineResult<Vec<u8>> {
        let path = self.resolve(storage_key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::not_found(format!("stored file '{storage_key}'")))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, storage_key: &str, bytes: &[u8]) -> EngineResult<()> {
        let path = self.resolve(storage_key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!("Stored {} byte(s) at {:?}", bytes.len(), path);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, storage_key: &str) -> EngineResult<Vec<u8>> {
        self.files
            .read()
            .get(storage_key)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("stored file '{storage_key}'")))
    }

    fn write(&self, storage_key: &str, bytes: &[u8]) -> EngineResult<()> {
        self.files
            .write()
            .insert(storage_key.to_string(), bytes.to_vec());
        Ok(())
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Keeps alphanumerics and `._-`; everything else is dropped.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

pub fn register_upload(
    config: &EngineConfig,
    files: &dyn FileStore,
    project: ProjectId,
    filename: &str,
    bytes: &[u8],
) -> EngineResult<SourceFile> {
    let size_bytes = bytes.len() as u64;
    if size_bytes > config.max_file_size_bytes {
        return Err(EngineError::InvalidRequest(format!(
            "File size ({:.2} MB) exceeds maximum allowed size ({:.0} MB).",
            size_bytes as f64 / (1024.0 * 1024.0),
            config.max_file_size_bytes as f64 / (1024.0 * 1024.0)
        )));
    }
    let extension = io_utils::extension_of(filename);
    if !config.allows_extension(&extension) {
        return Err(EngineError::UnsupportedFormat(extension));
    }

    let id = Uuid::new_v4();
    let created_at = Utc::now();
    let storage_key = format!(
        "projects/{project}/files/{}_{}_{}",
        created_at.timestamp(),
        id.simple(),
        safe_filename(filename)
    );
    files.write(&storage_key, bytes)?;

    let source = SourceFile {
        id,
        project,
        filename: filename.to_string(),
        content_type: format!("application/{}", extension.trim_start_matches('.')),
        size_bytes,
        storage_key,
        checksum: checksum(bytes),
        created_at,
    };
    info!(
        "Registered '{}' ({} byte(s), sha256 {}) for project {}",
        source.filename, source.size_bytes, source.checksum, project
    );
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_strips_unsafe_characters() {
        assert_eq!(safe_filename("my report (v2).csv"), "myreportv2.csv");
        assert_eq!(safe_filename("../../etc/passwd"), "....etcpasswd");
    }

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn register_rejects_oversized_and_unknown_types() {
        let files = MemoryFileStore::new();
        let config = EngineConfig {
            max_file_size_bytes: 4,
            ..EngineConfig::default()
        };
        let err = register_upload(&config, &files, 1, "a.csv", b"a,b\n1,2\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let err = register_upload(&EngineConfig::default(), &files, 1, "a.xlsx", b"x")
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(ext) if ext == ".xlsx"));
    }

    #[test]
    fn register_stores_bytes_under_project_key() {
        let files = MemoryFileStore::new();
        let source =
            register_upload(&EngineConfig::default(), &files, 7, "people.csv", b"age\n30\n")
                .unwrap();
        assert!(source.storage_key.starts_with("projects/7/files/"));
        assert!(source.storage_key.ends_with("_people.csv"));
        assert_eq!(files.read(&source.storage_key).unwrap(), b"age\n30\n");
        assert_eq!(source.content_type, "application/csv");
    }

    #[test]
    fn same_name_uploads_keep_their_own_bytes() {
        let files = MemoryFileStore::new();
        let config = EngineConfig::default();
        let first = register_upload(&config, &files, 1, "data.csv", b"a\n1\n").unwrap();
        let second = register_upload(&config, &files, 1, "data.csv", b"b,c\n2,3\n").unwrap();

        assert_ne!(first.storage_key, second.storage_key);
        assert!(first.storage_key.contains(&first.id.simple().to_string()));
        assert_eq!(files.read(&first.storage_key).unwrap(), b"a\n1\n");
        assert_eq!(files.read(&second.storage_key).unwrap(), b"b,c\n2,3\n");
    }

    #[test]
    fn dir_store_refuses_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFileStore::new(dir.path());
        assert!(store.write("../outside", b"x").is_err());
        assert!(matches!(
            store.read("missing.csv"),
            Err(EngineError::NotFound(_))
        ));
    }
}
