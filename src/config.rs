//! Engine configuration loaded from YAML.
//!
//! All fields are optional in the file; missing keys fall back to the
//! defaults below.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::io_utils;

/// Largest row count for which full data is stored instead of a sample.
pub const FULL_DATA_CAP: usize = 10_000;
pub const DEFAULT_SAMPLE_ROWS: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_PREVIEW_LIMIT: usize = 1_000;
pub const MAX_PREVIEW_LIMIT: usize = 10_000;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub full_data_cap: usize,
    pub sample_rows: usize,
    pub default_page_size: usize,
    pub default_preview_limit: usize,
    pub max_preview_limit: usize,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    /// Encoding label for source files; UTF-8 when unset.
    pub input_encoding: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            full_data_cap: FULL_DATA_CAP,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            default_page_size: DEFAULT_PAGE_SIZE,
            default_preview_limit: DEFAULT_PREVIEW_LIMIT,
            max_preview_limit: MAX_PREVIEW_LIMIT,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: vec![".csv".to_string(), ".tsv".to_string()],
            input_encoding: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: EngineConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.full_data_cap > 0, "full_data_cap must be positive");
        ensure!(self.sample_rows > 0, "sample_rows must be positive");
        ensure!(self.default_page_size > 0, "default_page_size must be positive");
        ensure!(
            (1..=MAX_PREVIEW_LIMIT).contains(&self.max_preview_limit),
            "max_preview_limit must be between 1 and {MAX_PREVIEW_LIMIT}"
        );
        ensure!(
            self.default_preview_limit <= self.max_preview_limit,
            "default_preview_limit ({}) cannot exceed max_preview_limit ({})",
            self.default_preview_limit,
            self.max_preview_limit
        );
        io_utils::resolve_encoding(self.input_encoding.as_deref())?;
        Ok(())
    }

    /// Whether `extension` (with leading dot, any case) may be registered.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }
}
