use crate::error::{Error, Result};
use crate::model::Snapshot;

/// Reduces `snapshots` (ascending by timestamp) to at most `target` points.
///
/// x is the timestamp, y is `cpu_percent`; memory rides along on whichever
/// point is picked. The first and last inputs are always kept. Bucket bounds
/// are computed in `f64` and truncated, and ties keep the lowest index, so the
/// output is stable pixel for pixel across runs.
pub fn downsample_lttb(snapshots: &[Snapshot], target: usize) -> Result<Vec<Snapshot>> {
    if target < 2 {
        return Err(Error::invalid_argument("target must be an integer >= 2."));
    }

    let n = snapshots.len();
    if n <= target {
        return Ok(snapshots.to_vec());
    }

    let mut selected = Vec::with_capacity(target);
    selected.push(snapshots[0]);
    if target == 2 {
        selected.push(snapshots[n - 1]);
        return Ok(selected);
    }

    let bucket_size = (n - 2) as f64 / (target - 2) as f64;
    let bound = |i: usize| (1.0 + i as f64 * bucket_size) as usize;

    let mut prev_x = snapshots[0].timestamp;
    let mut prev_y = snapshots[0].cpu_percent;

    for i in 0..target - 2 {
        let bucket_start = bound(i);
        let bucket_end = bound(i + 1).min(n - 1);

        // Centroid of the next bucket; the last bucket looks at the final point.
        let (next_start, next_end) = if i == target - 3 {
            (n - 1, n - 1)
        } else {
            (bound(i + 1), bound(i + 2).min(n - 1))
        };
        let next = &snapshots[next_start..=next_end];
        let count = next.len() as f64;
        let avg_x = next.iter().map(|s| s.timestamp).sum::<f64>() / count;
        let avg_y = next.iter().map(|s| s.cpu_percent).sum::<f64>() / count;

        let mut best_area = -1.0;
        let mut best_idx = bucket_start;
        for (j, candidate) in snapshots
            .iter()
            .enumerate()
            .take(bucket_end)
            .skip(bucket_start)
        {
            let area = (prev_x * (candidate.cpu_percent - avg_y)
                + candidate.timestamp * (avg_y - prev_y)
                + avg_x * (prev_y - candidate.cpu_percent))
                .abs();
            if area > best_area {
                best_area = area;
                best_idx = j;
            }
        }

        let chosen = snapshots[best_idx];
        selected.push(chosen);
        prev_x = chosen.timestamp;
        prev_y = chosen.cpu_percent;
    }

    selected.push(snapshots[n - 1]);
    Ok(selected)
}
