use crate::dvr::downsample_lttb;
use crate::error::{Error, Result, require_finite, require_positive_finite};
use crate::model::Snapshot;
use crate::storage::TelemetryStore;

/// Points requested by the timeline view when the caller has no preference.
pub const DEFAULT_RESOLUTION: usize = 500;

/// Reads `[start, end]` from `store` and downsamples it to `resolution` points.
///
/// The range comes back already ordered and is handed to the downsampler as is.
pub fn query_timeline<S>(
    store: &S,
    start: Option<f64>,
    end: Option<f64>,
    resolution: usize,
) -> Result<Vec<Snapshot>>
where
    S: TelemetryStore + ?Sized,
{
    if resolution < 2 {
        return Err(Error::invalid_argument(
            "resolution must be an integer >= 2.",
        ));
    }

    let snapshots = store.between(start, end)?;
    if snapshots.is_empty() {
        return Ok(snapshots);
    }
    downsample_lttb(&snapshots, resolution)
}

/// Timeline over the `window_seconds` leading up to `end`.
pub fn query_recent<S>(
    store: &S,
    end: f64,
    window_seconds: f64,
    resolution: usize,
) -> Result<Vec<Snapshot>>
where
    S: TelemetryStore + ?Sized,
{
    require_finite(end, "end_timestamp")?;
    require_positive_finite(window_seconds, "window_seconds")?;
    query_timeline(store, Some(end - window_seconds), Some(end), resolution)
}
