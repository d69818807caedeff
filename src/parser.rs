//! Parser boundary: turns stored bytes into a schema, a row count, a small
//! sample, and (on request) a bounded sequence of typed rows.
//!
//! The engine only depends on [`TableParser`]. [`DelimitedParser`] is the
//! bundled implementation for comma- and tab-separated files; any other
//! extension is reported as [`EngineError::UnsupportedFormat`].

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use log::debug;

use crate::{
    config::EngineConfig,
    data::{RawValue, parse_temporal},
    error::{EngineError, EngineResult},
    io_utils,
    rows::{RawRow, Row, sanitize_rows},
    schema::{ColumnType, Schema, infer_type, is_placeholder, parse_boolean_token},
    source::SourceFile,
};

/// Rows scanned when inferring column types.
pub const INFERENCE_ROWS: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub schema: Schema,
    pub row_count: usize,
    pub sample_rows: Vec<Row>,
}

pub trait TableParser: Send + Sync {
    fn parse(&self, source: &SourceFile, bytes: &[u8]) -> EngineResult<ParsedTable>;

    /// Reads at most `limit` typed rows in file order.
    fn read_rows(&self, source: &SourceFile, bytes: &[u8], limit: usize)
    -> EngineResult<Vec<RawRow>>;
}

#[derive(Debug, Clone)]
pub struct DelimitedParser {
    sample_rows: usize,
    inference_rows: usize,
    encoding: &'static Encoding,
}

/// Decoded text cells plus the number of data records in the whole file.
struct TextGrid {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
    total_records: usize,
}

impl DelimitedParser {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sample_rows: config.sample_rows,
            inference_rows: INFERENCE_ROWS,
            encoding: encoding_rs::UTF_8,
        }
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn delimiter_for(&self, source: &SourceFile) -> EngineResult<u8> {
        let extension = source.extension();
        io_utils::delimiter_for_extension(&extension)
            .ok_or(EngineError::UnsupportedFormat(extension))
    }

    fn read_grid(&self, bytes: &[u8], delimiter: u8, keep: usize) -> Result<TextGrid> {
        let mut reader = io_utils::open_csv_reader(bytes, delimiter);
        let headers = dedupe_headers(
            io_utils::reader_headers(&mut reader, self.encoding).context("Reading header row")?,
        );
        if headers.is_empty() || headers.iter().all(|h| h.starts_with("Unnamed: ")) {
            bail!("No columns to parse from file");
        }

        let mut records = Vec::new();
        let mut total_records = 0usize;
        let mut skipped = 0usize;
        let mut record = csv::ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {}
                Err(err) => {
                    // Malformed quoting and similar; the reader resyncs on the next line.
                    debug!("Skipping unreadable record: {err}");
                    skipped += 1;
                    continue;
                }
            }
            if record.len() > headers.len() {
                skipped += 1;
                continue;
            }
            let Ok(mut decoded) = io_utils::decode_record(&record, self.encoding) else {
                skipped += 1;
                continue;
            };
            total_records += 1;
            if records.len() < keep {
                decoded.resize(headers.len(), String::new());
                records.push(decoded);
            }
        }
        if skipped > 0 {
            debug!("Skipped {skipped} malformed record(s)");
        }
        Ok(TextGrid {
            headers,
            records,
            total_records,
        })
    }

    fn infer_schema(&self, grid: &TextGrid) -> Schema {
        let scanned = &grid.records[..grid.records.len().min(self.inference_rows)];
        Schema::from_columns(grid.headers.iter().enumerate().map(|(idx, header)| {
            let ty = infer_type(scanned.iter().map(|record| record[idx].as_str()));
            (header.clone(), ty)
        }))
    }

    fn typed_rows(schema: &Schema, records: &[Vec<String>]) -> Vec<RawRow> {
        records
            .iter()
            .map(|record| {
                schema
                    .iter()
                    .zip(record)
                    .map(|((name, ty), cell)| (name.to_string(), typed_cell(cell, ty)))
                    .collect()
            })
            .collect()
    }
}

impl TableParser for DelimitedParser {
    fn parse(&self, source: &SourceFile, bytes: &[u8]) -> EngineResult<ParsedTable> {
        let delimiter = self.delimiter_for(source)?;
        let keep = self.inference_rows.max(self.sample_rows);
        let grid = self
            .read_grid(bytes, delimiter, keep)
            .map_err(|err| EngineError::parse(&source.filename, format!("{err:#}")))?;
        let schema = self.infer_schema(&grid);
        let sample_len = grid.records.len().min(self.sample_rows);
        let sample_rows = sanitize_rows(&Self::typed_rows(&schema, &grid.records[..sample_len]));
        debug!(
            "Parsed '{}': {} column(s), {} row(s)",
            source.filename,
            schema.len(),
            grid.total_records
        );
        Ok(ParsedTable {
            schema,
            row_count: grid.total_records,
            sample_rows,
        })
    }

    fn read_rows(
        &self,
        source: &SourceFile,
        bytes: &[u8],
        limit: usize,
    ) -> EngineResult<Vec<RawRow>> {
        let delimiter = self.delimiter_for(source)?;
        let grid = self
            .read_grid(bytes, delimiter, limit.max(self.inference_rows))
            .map_err(|err| EngineError::parse(&source.filename, format!("{err:#}")))?;
        let schema = self.infer_schema(&grid);
        let kept = grid.records.len().min(limit);
        Ok(Self::typed_rows(&schema, &grid.records[..kept]))
    }
}

fn typed_cell(cell: &str, ty: ColumnType) -> RawValue {
    if is_placeholder(cell) {
        return RawValue::Missing;
    }
    let trimmed = cell.trim();
    let typed = match ty {
        ColumnType::Number => trimmed
            .parse::<i64>()
            .map(RawValue::Integer)
            .or_else(|_| trimmed.parse::<f64>().map(RawValue::Float))
            .ok(),
        ColumnType::Boolean => parse_boolean_token(trimmed).map(RawValue::Boolean),
        ColumnType::Date => parse_temporal(trimmed),
        ColumnType::String => None,
    };
    typed.unwrap_or_else(|| RawValue::Text(cell.to_string()))
}

/// Blank headers become `Unnamed: <idx>`; repeats get a `.<n>` suffix.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, header)| {
            let trimmed = header.trim();
            let base = if trimmed.is_empty() {
                format!("Unnamed: {idx}")
            } else {
                trimmed.to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{base}.{count}")
            };
            *count += 1;
            name
        })
        .collect()
}
