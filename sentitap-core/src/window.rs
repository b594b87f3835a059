//! Window planning: split a request span into API-sized sub-windows.

use crate::domain::{BinSize, FetchRequest, Window};
use crate::error::PipelineError;
use chrono::{Duration, NaiveDateTime};

/// Split `[start, end)` into contiguous windows of `row_cap` buckets each.
///
/// The last window is clipped to `end`. A span shorter than one bucket
/// yields a single window covering the whole span.
pub fn plan_windows(
    start: NaiveDateTime,
    end: NaiveDateTime,
    bin_size: BinSize,
    row_cap: usize,
) -> Result<Vec<Window>, PipelineError> {
    if start >= end {
        return Err(PipelineError::InvalidRange { start, end });
    }
    if row_cap == 0 {
        return Err(PipelineError::InvalidRowCap(row_cap));
    }

    let step = i32::try_from(row_cap)
        .ok()
        .and_then(|cap| bin_size.unit_duration().checked_mul(cap))
        .unwrap_or(Duration::MAX);

    let mut windows = Vec::new();
    let mut current = start;
    while current < end {
        let next = current
            .checked_add_signed(step)
            .map_or(end, |t| t.min(end));
        windows.push(Window {
            start: current,
            end: next,
        });
        current = next;
    }
    Ok(windows)
}

/// Plan the windows for a request against a source's per-call row cap.
pub fn plan_request(request: &FetchRequest, row_cap: usize) -> Result<Vec<Window>, PipelineError> {
    plan_windows(request.start(), request.end(), request.bin_size(), row_cap)
}
