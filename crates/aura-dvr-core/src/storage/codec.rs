//! On-disk line format: `timestamp,cpu_percent,memory_percent\n`.
//!
//! Numbers are written with Rust's shortest round-trip formatting, which never
//! needs more than 17 significant digits for an `f64`.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::Snapshot;

/// Header of the legacy binary store format (an SQLite 3 database).
pub const LEGACY_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Serializes a snapshot without the trailing newline.
pub fn serialize_line(snapshot: &Snapshot) -> String {
    format!(
        "{},{},{}",
        snapshot.timestamp, snapshot.cpu_percent, snapshot.memory_percent
    )
}

/// Parses and validates one line.
pub fn parse_line(line: &str) -> Result<Snapshot> {
    let mut fields = line.trim().split(',');
    let timestamp = parse_field(fields.next(), "timestamp")?;
    let cpu_percent = parse_field(fields.next(), "cpu_percent")?;
    let memory_percent = parse_field(fields.next(), "memory_percent")?;
    if fields.next().is_some() {
        return Err(Error::invalid_argument(
            "Malformed snapshot line: too many fields",
        ));
    }

    let snapshot = Snapshot::new(timestamp, cpu_percent, memory_percent);
    snapshot.validate()?;
    Ok(snapshot)
}

fn parse_field(raw: Option<&str>, name: &str) -> Result<f64> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_argument(format!("Malformed snapshot line: missing {}", name)))?;
    raw.parse::<f64>().map_err(|e| {
        Error::invalid_argument(format!(
            "Malformed snapshot line: invalid {} '{}': {}",
            name, raw, e
        ))
    })
}

/// Returns true if the file starts with [`LEGACY_MAGIC`].
///
/// Files shorter than the header, or missing files, are not legacy.
pub(crate) fn is_legacy_file(path: &Path) -> io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let mut header = [0u8; 16];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(&header == LEGACY_MAGIC)
}
