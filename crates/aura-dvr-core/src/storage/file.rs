use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::codec::{is_legacy_file, parse_line, serialize_line};
use super::{Clock, FlushPolicy, StoreOptions, TelemetryStore};
use crate::error::{Error, Result, require_finite, require_positive_finite};
use crate::model::Snapshot;

/// Path sentinel that keeps the store purely in memory.
pub const MEMORY_PATH: &str = ":memory:";

const TMP_SUFFIX: &str = ".tmp";
const LEGACY_SUFFIX: &str = ".legacy.sqlite";

enum Backing {
    Memory,
    File { path: PathBuf, tmp_path: PathBuf },
}

#[derive(Default)]
struct StoreState {
    /// Sorted by [`Snapshot::store_order`].
    snapshots: Vec<Snapshot>,
    /// Changes not yet written to disk.
    pending: usize,
}

/// Ordered snapshot buffer mirrored to a text file.
///
/// Every public call takes the store lock, prunes expired entries and, per the
/// [`FlushPolicy`], rewrites the whole file through `<path>.tmp` plus an
/// atomic rename. One writer per path is assumed; nothing coordinates two
/// stores (or two processes) opened on the same file.
pub struct FileBackedStore {
    backing: Backing,
    retention_seconds: f64,
    flush_policy: FlushPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl FileBackedStore {
    /// Opens a store with the wall clock and the default flush policy.
    pub fn open(path: impl AsRef<Path>, retention_seconds: f64) -> Result<Self> {
        Self::open_with(path, StoreOptions::new(retention_seconds))
    }

    /// Opens a store that never touches the filesystem.
    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        Self::open_with(MEMORY_PATH, options)
    }

    /// Opens (or creates) the store at `path`.
    ///
    /// Load sequence: move a legacy binary file out of the way, promote or
    /// discard a leftover temporary file, read lines (skipping unreadable
    /// ones), sort, prune, and write the result back.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument(
                "db_path cannot be empty when persistence is enabled.",
            ));
        }
        require_positive_finite(options.retention_seconds, "retention_seconds")?;

        let mut state = StoreState::default();
        let backing = if path.as_os_str() == MEMORY_PATH {
            Backing::Memory
        } else {
            let path = path.to_path_buf();
            let tmp_path = with_suffix(&path, TMP_SUFFIX);

            ensure_parent_dir(&path)?;
            migrate_legacy_file(&path)?;
            recover_temp_file(&path, &tmp_path)?;
            state.snapshots = load_snapshots(&path)?;

            Backing::File { path, tmp_path }
        };

        let store = Self {
            backing,
            retention_seconds: options.retention_seconds,
            flush_policy: options.flush_policy,
            clock: options.clock,
            state: Mutex::new(state),
        };

        {
            let mut state = store.lock()?;
            store.prune_locked(&mut state);
            if let Backing::File { path, tmp_path } = &store.backing {
                write_snapshots(path, tmp_path, &state.snapshots)?;
                state.pending = 0;
                info!(
                    path = %path.display(),
                    snapshots = state.snapshots.len(),
                    retention_seconds = store.retention_seconds,
                    "telemetry store opened"
                );
            }
        }

        Ok(store)
    }

    /// The backing file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory => None,
            Backing::File { path, .. } => Some(path),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.backing, Backing::Memory)
    }

    pub fn retention_seconds(&self) -> f64 {
        self.retention_seconds
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    /// Writes the current contents to disk regardless of the flush policy.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.write_locked(&mut state)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| Error::store("telemetry store lock poisoned"))
    }

    /// Drops entries older than `now - retention_seconds`.
    fn prune_locked(&self, state: &mut StoreState) -> usize {
        let cutoff = self.clock.now() - self.retention_seconds;
        let expired = state.snapshots.partition_point(|s| s.timestamp < cutoff);
        if expired > 0 {
            state.snapshots.drain(..expired);
            state.pending += 1;
            debug!(expired, cutoff, "pruned expired snapshots");
        }
        expired
    }

    /// Prune, then rewrite if the flush policy says so.
    fn sync_locked(&self, state: &mut StoreState) -> Result<()> {
        self.prune_locked(state);

        let due = match self.flush_policy {
            FlushPolicy::Always => true,
            FlushPolicy::OnChange => state.pending > 0,
            FlushPolicy::Batched { max_pending } => state.pending >= max_pending.max(1),
        };
        if due {
            self.write_locked(state)?;
        }
        Ok(())
    }

    fn write_locked(&self, state: &mut StoreState) -> Result<()> {
        if let Backing::File { path, tmp_path } = &self.backing {
            write_snapshots(path, tmp_path, &state.snapshots)?;
        }
        state.pending = 0;
        Ok(())
    }
}

impl TelemetryStore for FileBackedStore {
    fn append(&self, snapshot: Snapshot) -> Result<()> {
        snapshot.validate()?;

        let mut state = self.lock()?;
        let at = state
            .snapshots
            .partition_point(|s| s.store_order(&snapshot).is_le());
        state.snapshots.insert(at, snapshot);
        state.pending += 1;
        self.sync_locked(&mut state)
    }

    fn count(&self) -> Result<usize> {
        let mut state = self.lock()?;
        self.sync_locked(&mut state)?;
        Ok(state.snapshots.len())
    }

    fn latest(&self, limit: usize) -> Result<Vec<Snapshot>> {
        if limit == 0 {
            return Err(Error::invalid_argument(
                "limit must be an integer greater than 0.",
            ));
        }

        let mut state = self.lock()?;
        self.sync_locked(&mut state)?;
        let start = state.snapshots.len().saturating_sub(limit);
        Ok(state.snapshots[start..].to_vec())
    }

    fn between(&self, start: Option<f64>, end: Option<f64>) -> Result<Vec<Snapshot>> {
        if let Some(start) = start {
            require_finite(start, "start_timestamp")?;
        }
        if let Some(end) = end {
            require_finite(end, "end_timestamp")?;
        }
        if let (Some(start), Some(end)) = (start, end)
            && start > end
        {
            return Err(Error::invalid_argument(
                "start_timestamp must be less than or equal to end_timestamp.",
            ));
        }

        let mut state = self.lock()?;
        self.sync_locked(&mut state)?;

        let snapshots = &state.snapshots;
        let lo = start.map_or(0, |start| snapshots.partition_point(|s| s.timestamp < start));
        let hi = end.map_or(snapshots.len(), |end| {
            snapshots.partition_point(|s| s.timestamp <= end)
        });
        if lo >= hi {
            return Ok(Vec::new());
        }
        Ok(snapshots[lo..hi].to_vec())
    }
}

impl Drop for FileBackedStore {
    fn drop(&mut self) {
        let Backing::File { path, tmp_path } = &self.backing else {
            return;
        };
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.pending == 0 {
            return;
        }
        if let Err(e) = write_snapshots(path, tmp_path, &state.snapshots) {
            warn!(error = %e, "failed to flush telemetry store on close");
        }
    }
}

impl std::fmt::Debug for FileBackedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackedStore")
            .field("path", &self.path())
            .field("retention_seconds", &self.retention_seconds)
            .field("flush_policy", &self.flush_policy)
            .finish()
    }
}

/// `foo.sqlite` + `.tmp` -> `foo.sqlite.tmp`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| Error::io("failed to create directory", parent, e)),
        _ => Ok(()),
    }
}

/// A leftover temporary file wins only if the main file is missing or shorter.
fn recover_temp_file(path: &Path, tmp_path: &Path) -> Result<()> {
    let tmp_len = match fs::metadata(tmp_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io("failed to inspect", tmp_path, e)),
    };
    let main_len = match fs::metadata(path) {
        Ok(meta) => Some(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(Error::io("failed to inspect", path, e)),
    };

    if main_len.is_none_or(|len| len < tmp_len) {
        warn!(
            tmp = %tmp_path.display(),
            tmp_len,
            main_len = main_len.unwrap_or(0),
            "recovering telemetry store from interrupted rewrite"
        );
        fs::rename(tmp_path, path).map_err(|e| Error::io("failed to recover", tmp_path, e))
    } else {
        warn!(tmp = %tmp_path.display(), "discarding stale temporary telemetry file");
        fs::remove_file(tmp_path).map_err(|e| Error::io("failed to remove", tmp_path, e))
    }
}

/// Moves a legacy binary store aside (or deletes it). One way: nothing is converted.
fn migrate_legacy_file(path: &Path) -> Result<()> {
    let legacy = is_legacy_file(path).map_err(|e| Error::io("failed to read", path, e))?;
    if !legacy {
        return Ok(());
    }

    let legacy_path = with_suffix(path, LEGACY_SUFFIX);
    match fs::rename(path, &legacy_path) {
        Ok(()) => {
            warn!(
                from = %path.display(),
                to = %legacy_path.display(),
                "legacy telemetry database moved aside; starting with an empty store"
            );
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to rename legacy telemetry database, removing it");
            if let Err(e) = fs::remove_file(path) {
                warn!(error = %e, path = %path.display(), "failed to remove legacy telemetry database");
            }
        }
    }
    Ok(())
}

/// Reads every line, skipping (and counting) ones that do not parse.
fn load_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io("failed to read", path, e)),
    };

    let mut loaded = Vec::new();
    let mut parse_failures = 0usize;
    for raw in data.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(raw);
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(snapshot) => loaded.push(snapshot),
            Err(e) => {
                parse_failures += 1;
                debug!(error = %e, "skipping unreadable telemetry line");
            }
        }
    }

    if parse_failures > 0 {
        if loaded.is_empty() {
            warn!(
                path = %path.display(),
                lines = parse_failures,
                "telemetry file is unreadable; starting with an empty store"
            );
            return Ok(Vec::new());
        }
        warn!(
            path = %path.display(),
            skipped = parse_failures,
            loaded = loaded.len(),
            "skipped corrupt telemetry lines"
        );
    }

    loaded.sort_by(Snapshot::store_order);
    Ok(loaded)
}

/// Writes all snapshots to `tmp_path`, syncs, and renames over `path`.
fn write_snapshots(path: &Path, tmp_path: &Path, snapshots: &[Snapshot]) -> Result<()> {
    let result = write_temp(tmp_path, snapshots)
        .and_then(|()| fs::rename(tmp_path, path).map_err(|e| Error::io("failed to replace", path, e)));
    match result {
        Ok(()) => {
            debug!(path = %path.display(), snapshots = snapshots.len(), "telemetry store rewritten");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp_path);
            Err(e)
        }
    }
}

fn write_temp(tmp_path: &Path, snapshots: &[Snapshot]) -> Result<()> {
    let file = File::create(tmp_path).map_err(|e| Error::io("failed to create", tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    for snapshot in snapshots {
        writeln!(writer, "{}", serialize_line(snapshot))
            .map_err(|e| Error::io("failed to write", tmp_path, e))?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| Error::io("failed to write", tmp_path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| Error::io("failed to sync", tmp_path, e))
}
