use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, require_finite};

/// One timestamped CPU/memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix seconds.
    pub timestamp: f64,
    /// CPU utilization, 0..=100.
    pub cpu_percent: f64,
    /// Memory utilization, 0..=100.
    pub memory_percent: f64,
}

impl Snapshot {
    pub fn new(timestamp: f64, cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            timestamp,
            cpu_percent,
            memory_percent,
        }
    }

    /// Checks that all fields are finite and both percents lie in `[0, 100]`.
    ///
    /// Out-of-range percents are rejected, not clamped.
    pub fn validate(&self) -> Result<()> {
        require_finite(self.timestamp, "timestamp")?;
        require_finite(self.cpu_percent, "cpu_percent")?;
        require_finite(self.memory_percent, "memory_percent")?;

        if !(0.0..=100.0).contains(&self.cpu_percent) {
            return Err(Error::invalid_argument(
                "cpu_percent must be between 0 and 100.",
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_percent) {
            return Err(Error::invalid_argument(
                "memory_percent must be between 0 and 100.",
            ));
        }
        Ok(())
    }

    /// Store order: timestamp, then cpu_percent, then memory_percent.
    pub fn store_order(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then_with(|| self.cpu_percent.total_cmp(&other.cpu_percent))
            .then_with(|| self.memory_percent.total_cmp(&other.memory_percent))
    }
}
