//! Error taxonomy shared by ingestion, editing and views.
//!
//! Every variant is scoped to a single request or Table; none of them is
//! fatal to the process. The binary wraps these in `anyhow` with context.

use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Full data not available. Only sample data was stored.")]
    FullDataUnavailable,

    #[error("Validation failed: {}", .0.iter().join("; "))]
    Validation(Vec<String>),

    #[error("Failed to parse '{file}': {reason}")]
    Parse { file: String, reason: String },

    #[error("File type '{0}' is not supported")]
    UnsupportedFormat(String),

    #[error("Page {page} out of range (total pages: {total_pages})")]
    PageOutOfRange { page: usize, total_pages: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn parse(file: impl Into<String>, reason: impl ToString) -> Self {
        EngineError::Parse {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    /// Per-cell reasons for a rejected edit request, empty for other errors.
    pub fn validation_errors(&self) -> &[String] {
        match self {
            EngineError::Validation(errors) => errors,
            _ => &[],
        }
    }
}
