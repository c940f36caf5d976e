//! Telemetry persistence.
//!
//! [`TelemetryStore`] is the capability the shell and the timeline query use;
//! [`FileBackedStore`] is the only implementation: an ordered in-memory buffer
//! mirrored to a line-oriented text file.

mod codec;
mod file;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::config::DEFAULT_RETENTION_SECONDS;
use crate::error::Result;
use crate::model::Snapshot;

pub use codec::{LEGACY_MAGIC, parse_line, serialize_line};
pub use file::{FileBackedStore, MEMORY_PATH};

/// Operations every telemetry store offers.
///
/// All calls prune entries older than the retention horizon before answering.
pub trait TelemetryStore: Send + Sync {
    /// Validates and inserts a snapshot.
    fn append(&self, snapshot: Snapshot) -> Result<()>;

    /// Number of retained snapshots.
    fn count(&self) -> Result<usize>;

    /// The `min(limit, count)` most recent snapshots, ascending. `limit` must be > 0.
    fn latest(&self, limit: usize) -> Result<Vec<Snapshot>>;

    /// Snapshots with `start <= timestamp <= end`, ascending. A missing bound
    /// is unbounded on that side.
    fn between(&self, start: Option<f64>, end: Option<f64>) -> Result<Vec<Snapshot>>;
}

/// Source of "now" in unix seconds, used for retention pruning.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// When the in-memory buffer is written back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Rewrite after every public call.
    #[default]
    Always,
    /// Rewrite only when an append or a prune changed the contents.
    OnChange,
    /// Rewrite once this many changes are pending. Pending changes are also
    /// written by [`FileBackedStore::flush`] and on drop.
    Batched { max_pending: usize },
}

/// Store tuning.
#[derive(Clone)]
pub struct StoreOptions {
    pub retention_seconds: f64,
    pub flush_policy: FlushPolicy,
    pub clock: Arc<dyn Clock>,
}

impl StoreOptions {
    pub fn new(retention_seconds: f64) -> Self {
        Self {
            retention_seconds,
            ..Self::default()
        }
    }

    pub fn with_flush_policy(mut self, flush_policy: FlushPolicy) -> Self {
        self.flush_policy = flush_policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            flush_policy: FlushPolicy::Always,
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("retention_seconds", &self.retention_seconds)
            .field("flush_policy", &self.flush_policy)
            .field("now", &self.clock.now())
            .finish()
    }
}
