//! Plain-text table output for the CLI.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{data::Scalar, rows::Row, schema::Schema};

/// Renders `rows` under the schema's column order. With `first_index` set, a
/// leading `#` column numbers the rows from it.
pub fn render_rows(schema: &Schema, rows: &[Row], first_index: Option<usize>) -> String {
    let mut headers = Vec::with_capacity(schema.len() + 1);
    if first_index.is_some() {
        headers.push("#".to_string());
    }
    headers.extend(schema.headers());
    let cells = rows
        .iter()
        .enumerate()
        .map(|(offset, row)| {
            let mut line = Vec::with_capacity(headers.len());
            if let Some(first) = first_index {
                line.push((first + offset).to_string());
            }
            line.extend(schema.iter().map(|(column, _)| {
                row.get(column).map(Scalar::as_display).unwrap_or_default()
            }));
            line
        })
        .collect::<Vec<_>>();
    render_table(&headers, &cells)
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator_cells, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate().take(widths.len()) {
        let sanitized = sanitize_cell(value);
        let padding = widths[idx].saturating_sub(display_width(&sanitized));
        let mut cell = sanitized.into_owned();
        cell.push_str(&" ".repeat(padding));
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    line.truncate(line.trim_end().len());
    line
}

/// Control characters count as one column since they render as a space.
fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.chars().any(char::is_control) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| if ch.is_control() { ' ' } else { ch })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}
