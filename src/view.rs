//! Read-only projections over a Table's merged rows.
//!
//! Two shapes: offset pagination and deterministic stride sampling. Both
//! work on row indices first and only materialize the rows they return, so
//! a page of 100 rows never copies the other 9 900.

use std::ops::Range;

use serde::Serialize;

use crate::{
    config::{EngineConfig, MAX_PREVIEW_LIMIT},
    error::{EngineError, EngineResult},
    overlay::materialize_indices,
    rows::Row,
    schema::Schema,
    store::TableHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub data: Vec<Row>,
    pub schema: Schema,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub data: Vec<Row>,
    pub schema: Schema,
    pub total_rows: usize,
    pub preview_rows: usize,
    pub is_sampled: bool,
    pub sampling_message: Option<String>,
}

/// Row range and page metadata for a 1-based `page`.
///
/// Page 1 of an empty dataset is an empty range; any other page that starts
/// at or past the end is out of range.
pub fn page_bounds(
    total_rows: usize,
    page: usize,
    page_size: usize,
) -> EngineResult<(Range<usize>, PageInfo)> {
    if page == 0 || page_size == 0 {
        return Err(EngineError::InvalidRequest(
            "page and page_size must be at least 1".to_string(),
        ));
    }
    let total_pages = total_rows.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size);
    if start >= total_rows && !(total_rows == 0 && page == 1) {
        return Err(EngineError::PageOutOfRange { page, total_pages });
    }
    let end = start.saturating_add(page_size).min(total_rows);
    let info = PageInfo {
        page,
        page_size,
        total_rows,
        total_pages,
        has_next: end < total_rows,
        has_previous: page > 1,
    };
    Ok((start..end, info))
}

pub fn paginate<T>(rows: &[T], page: usize, page_size: usize) -> EngineResult<(&[T], PageInfo)> {
    let (range, info) = page_bounds(rows.len(), page, page_size)?;
    Ok((&rows[range], info))
}

pub fn clamp_limit(limit: usize, max_limit: usize) -> usize {
    limit.clamp(1, max_limit.max(1))
}

/// Evenly spaced, strictly increasing indices into `0..total_rows`.
///
/// Returns every index when `total_rows <= limit`.
pub fn sample_indices(total_rows: usize, limit: usize) -> Vec<usize> {
    if total_rows <= limit {
        return (0..total_rows).collect();
    }
    let step = total_rows as f64 / limit as f64;
    (0..limit)
        .map(|i| (i as f64 * step).floor() as usize)
        .filter(|index| *index < total_rows)
        .collect()
}

/// Stride sample of `rows`; the flag reports whether anything was dropped.
pub fn sample<T: Clone>(rows: &[T], limit: usize) -> (Vec<T>, bool) {
    let limit = clamp_limit(limit, MAX_PREVIEW_LIMIT);
    if rows.len() <= limit {
        return (rows.to_vec(), false);
    }
    let sampled = sample_indices(rows.len(), limit)
        .into_iter()
        .map(|index| rows[index].clone())
        .collect();
    (sampled, true)
}

pub fn get_page(handle: &TableHandle, page: usize, page_size: usize) -> EngineResult<Page> {
    handle.read(|table| -> EngineResult<Page> {
        let total_rows = table
            .full_rows()
            .map(<[Row]>::len)
            .ok_or(EngineError::FullDataUnavailable)?;
        let (range, pagination) = page_bounds(total_rows, page, page_size)?;
        let data = materialize_indices(table, range).ok_or(EngineError::FullDataUnavailable)?;
        Ok(Page {
            data,
            schema: table.schema().clone(),
            pagination,
        })
    })
}

pub fn get_preview(handle: &TableHandle, limit: usize, config: &EngineConfig) -> EngineResult<Preview> {
    let limit = clamp_limit(limit, config.max_preview_limit.min(MAX_PREVIEW_LIMIT));
    handle.read(|table| -> EngineResult<Preview> {
        let total_rows = table
            .full_rows()
            .map(<[Row]>::len)
            .ok_or(EngineError::FullDataUnavailable)?;
        let is_sampled = total_rows > limit;
        let indices = sample_indices(total_rows, limit);
        let data = materialize_indices(table, indices).ok_or(EngineError::FullDataUnavailable)?;
        let preview_rows = data.len();
        Ok(Preview {
            data,
            schema: table.schema().clone(),
            total_rows,
            preview_rows,
            is_sampled,
            sampling_message: is_sampled.then(|| {
                format!("Showing {preview_rows} of {total_rows} rows (sampled for preview)")
            }),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_of_empty_rows_is_empty_not_an_error() {
        let rows: Vec<u32> = Vec::new();
        let (slice, info) = paginate(&rows, 1, 10).unwrap();
        assert!(slice.is_empty());
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next);
        assert!(matches!(
            paginate(&rows, 2, 10),
            Err(EngineError::PageOutOfRange { page: 2, .. })
        ));
    }

    #[test]
    fn last_page_is_short_and_has_no_next() {
        let rows: Vec<u32> = (0..25).collect();
        let (slice, info) = paginate(&rows, 3, 10).unwrap();
        assert_eq!(slice, &[20, 21, 22, 23, 24]);
        assert_eq!(info.total_pages, 3);
        assert!(!info.has_next);
        assert!(info.has_previous);
        assert!(paginate(&rows, 4, 10).is_err());
    }

    #[test]
    fn zero_page_or_size_is_invalid() {
        let rows = [1, 2, 3];
        assert!(matches!(paginate(&rows, 0, 1), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(paginate(&rows, 1, 0), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let rows = [1, 2, 3];
        assert!(matches!(
            paginate(&rows, usize::MAX, usize::MAX),
            Err(EngineError::PageOutOfRange { .. })
        ));
    }

    #[test]
    fn sample_returns_input_when_within_limit() {
        let rows: Vec<u32> = (0..5).collect();
        assert_eq!(sample(&rows, 5), (rows.clone(), false));
        assert_eq!(sample(&rows, 0).0.len(), 1);
    }

    #[test]
    fn sample_strides_evenly_from_row_zero() {
        let rows: Vec<u32> = (0..10).collect();
        let (sampled, is_sampled) = sample(&rows, 4);
        assert!(is_sampled);
        assert_eq!(sampled, vec![0, 2, 5, 7]);
    }

    #[test]
    fn ten_thousand_rows_sample_to_exactly_the_limit() {
        let indices = sample_indices(10_000, 1_000);
        assert_eq!(indices.len(), 1_000);
        assert_eq!(indices[0], 0);
        assert!(*indices.last().unwrap() < 10_000);
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn clamp_limit_bounds_both_ends() {
        assert_eq!(clamp_limit(0, 10_000), 1);
        assert_eq!(clamp_limit(50_000, 10_000), 10_000);
        assert_eq!(clamp_limit(20, 10_000), 20);
    }
}
