//! Bounded-resolution views over stored telemetry.
//!
//! - `lttb` - Largest-Triangle-Three-Buckets downsampling
//! - `timeline` - range read + downsample, as the timeline view asks for it

mod lttb;
mod timeline;

pub use lttb::downsample_lttb;
pub use timeline::{DEFAULT_RESOLUTION, query_recent, query_timeline};
