//! Sparse edit overlay on top of immutable base rows.
//!
//! Edits never touch `full_rows`. They live in an [`EditOverlay`] keyed by
//! row index and column name and are merged onto the base rows on every read
//! by [`materialize`]. A request is validated as a whole and applied all at
//! once or not at all; within the overlay the last write to a cell wins and
//! edits to other cells of the same row are kept.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{
    data::Scalar,
    error::{EngineError, EngineResult},
    rows::Row,
    schema::Coercion,
    store::{Table, TableHandle, TableRegistry},
};

/// Row index (as string) to column name to raw requested value.
pub type RequestedEdits = Map<String, JsonValue>;

/// Accepted cells of one edit request, shaped like the overlay itself.
pub type AppliedEdits = EditOverlay;

/// Integer row keys in memory, string keys once serialized to JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditOverlay {
    rows: BTreeMap<usize, IndexMap<String, Scalar>>,
}

impl EditOverlay {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows with at least one edited cell.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows.values().map(IndexMap::len).sum()
    }

    pub fn row(&self, index: usize) -> Option<&IndexMap<String, Scalar>> {
        self.rows.get(&index)
    }

    pub fn cell(&self, index: usize, column: &str) -> Option<&Scalar> {
        self.rows.get(&index).and_then(|cells| cells.get(column))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &IndexMap<String, Scalar>)> {
        self.rows.iter().map(|(index, cells)| (*index, cells))
    }

    pub(crate) fn merge_cell(&mut self, index: usize, column: String, value: Scalar) {
        self.rows.entry(index).or_default().insert(column, value);
    }

    /// Cell-wise merge; `other` wins on overlapping cells.
    pub(crate) fn merge(&mut self, other: &EditOverlay) {
        for (index, cells) in other.iter() {
            for (column, value) in cells {
                self.merge_cell(index, column.clone(), value.clone());
            }
        }
    }
}

/// Accepts either `{"edits": {...}}` or the bare row map.
pub fn parse_edit_request(body: &JsonValue) -> EngineResult<RequestedEdits> {
    let edits = match body.get("edits") {
        Some(inner) => inner,
        None => body,
    };
    match edits {
        JsonValue::Object(map) => Ok(map.clone()),
        _ => Err(EngineError::InvalidRequest(
            "Edits must be an object with row indices as keys.".to_string(),
        )),
    }
}

/// Validates every requested cell against the Table, collecting all errors.
pub fn validate_edits(table: &Table, requested: &RequestedEdits) -> EngineResult<EditOverlay> {
    let Some(full_rows) = table.full_rows() else {
        return Err(EngineError::FullDataUnavailable);
    };
    let row_total = full_rows.len();
    let mut accepted = EditOverlay::default();
    let mut errors = Vec::new();

    for (row_key, row_edits) in requested {
        let Ok(parsed) = row_key.trim().parse::<i64>() else {
            errors.push(format!("invalid row index '{row_key}'"));
            continue;
        };
        let Some(row) = usize::try_from(parsed).ok().filter(|row| *row < row_total) else {
            errors.push(format!("row {parsed} out of range"));
            continue;
        };
        let JsonValue::Object(cells) = row_edits else {
            errors.push(format!("row {row}: edits must be an object"));
            continue;
        };
        for (column, raw) in cells {
            match table.schema().validate(column, raw) {
                Coercion::Accepted(value) => accepted.merge_cell(row, column.clone(), value),
                Coercion::Rejected(reason) => errors.push(reason.describe(row)),
            }
        }
    }

    if errors.is_empty() {
        Ok(accepted)
    } else {
        Err(EngineError::Validation(errors))
    }
}

/// Validates and applies a whole edit request under the Table's write lock.
///
/// Returns the accepted edits. On any validation error nothing is applied.
pub fn apply_edits(
    registry: &TableRegistry,
    handle: &TableHandle,
    requested: &RequestedEdits,
) -> EngineResult<AppliedEdits> {
    if requested.is_empty() {
        return handle.read(|table| {
            if table.has_full_data() {
                Ok(EditOverlay::default())
            } else {
                Err(EngineError::FullDataUnavailable)
            }
        });
    }
    let applied = registry.update(handle, |table| {
        let accepted = validate_edits(table, requested)?;
        table.edit_overlay_mut().merge(&accepted);
        Ok(accepted)
    })?;
    info!(
        "Applied {} cell edit(s) across {} row(s) to table {:?}",
        applied.cell_count(),
        applied.row_count(),
        handle.key()
    );
    Ok(applied)
}

/// Base rows with overlay cells applied; `None` for sample-only Tables.
pub fn materialize(table: &Table) -> Option<Vec<Row>> {
    let mut rows = table.full_rows()?.to_vec();
    for (index, cells) in table.edit_overlay().iter() {
        let Some(row) = rows.get_mut(index) else {
            debug!("Ignoring overlay entry for missing row {index}");
            continue;
        };
        overlay_cells(row, cells);
    }
    Some(rows)
}

/// Materializes only the given row indices, in the order given.
///
/// Indices past the end of the base rows are skipped.
pub fn materialize_indices<I>(table: &Table, indices: I) -> Option<Vec<Row>>
where
    I: IntoIterator<Item = usize>,
{
    let full_rows = table.full_rows()?;
    let overlay = table.edit_overlay();
    let rows = indices
        .into_iter()
        .filter_map(|index| {
            let mut row = full_rows.get(index)?.clone();
            if let Some(cells) = overlay.row(index) {
                overlay_cells(&mut row, cells);
            }
            Some(row)
        })
        .collect();
    Some(rows)
}

fn overlay_cells(row: &mut Row, cells: &IndexMap<String, Scalar>) {
    for (column, value) in cells {
        row.insert(column.clone(), value.clone());
    }
}
