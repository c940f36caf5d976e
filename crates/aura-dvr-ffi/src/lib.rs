//! aura-dvr-ffi - C ABI over `aura-dvr-core`.
//!
//! Every entry point returns an `AURA_*` status code and, when given a
//! non-null `AuraError`, fills it with the code and a NUL-terminated message of
//! at most 511 bytes. Errors and panics are converted here and never unwind
//! into the caller. The most recent message on the calling thread is also
//! available through [`aura_last_error_message`].
//!
//! Query functions copy into caller-owned buffers. When a result does not fit,
//! they return `AURA_ERR_CAPACITY` and store the required length in
//! `out_count`.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::slice;

use aura_dvr_core::config::{self, ConfigRequest, DbSource, RuntimeConfig};
use aura_dvr_core::dvr::{downsample_lttb, query_timeline};
use aura_dvr_core::{Error, FileBackedStore, Snapshot, TelemetryStore};
use tracing::{debug, error};

pub const AURA_PLATFORM_ABI_VERSION: c_int = 1;

pub const AURA_OK: c_int = 0;
pub const AURA_ERR_INVALID_ARGUMENT: c_int = 1;
pub const AURA_ERR_RUNTIME: c_int = 2;
pub const AURA_ERR_IO: c_int = 3;
pub const AURA_ERR_STORE: c_int = 4;
pub const AURA_ERR_CAPACITY: c_int = 5;

pub const AURA_DB_SOURCE_CLI: c_int = 0;
pub const AURA_DB_SOURCE_ENV: c_int = 1;
pub const AURA_DB_SOURCE_CONFIG: c_int = 2;
pub const AURA_DB_SOURCE_AUTO: c_int = 3;
pub const AURA_DB_SOURCE_DISABLED: c_int = 4;

/// Size of `AuraError::message`, terminator included.
pub const AURA_ERROR_MESSAGE_LEN: usize = 512;
/// Size of `AuraRuntimeConfig::db_path`, terminator included.
pub const AURA_DB_PATH_LEN: usize = 1024;

/// Matches `aura_snapshot_t`: five doubles, 40 bytes.
///
/// The disk rates are not stored; they are ignored on input and written as 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuraSnapshot {
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_read_bps: f64,
    pub disk_write_bps: f64,
}

impl From<AuraSnapshot> for Snapshot {
    fn from(raw: AuraSnapshot) -> Self {
        Snapshot::new(raw.timestamp, raw.cpu_percent, raw.memory_percent)
    }
}

impl From<Snapshot> for AuraSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            cpu_percent: snapshot.cpu_percent,
            memory_percent: snapshot.memory_percent,
            disk_read_bps: 0.0,
            disk_write_bps: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct AuraError {
    pub code: c_int,
    pub message: [c_char; AURA_ERROR_MESSAGE_LEN],
}

impl Default for AuraError {
    fn default() -> Self {
        Self {
            code: AURA_OK,
            message: [0; AURA_ERROR_MESSAGE_LEN],
        }
    }
}

impl AuraError {
    /// The message up to the first NUL.
    pub fn message_lossy(&self) -> String {
        c_buffer_to_string(&self.message)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuraConfigRequest {
    /// Optional; null or empty means "not given".
    pub cli_db_path: *const c_char,
    pub no_persist: c_int,
    pub has_cli_retention: c_int,
    pub cli_retention_seconds: f64,
    /// Optional; null or empty means the platform default location.
    pub config_path_override: *const c_char,
}

impl Default for AuraConfigRequest {
    fn default() -> Self {
        Self {
            cli_db_path: ptr::null(),
            no_persist: 0,
            has_cli_retention: 0,
            cli_retention_seconds: 0.0,
            config_path_override: ptr::null(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone)]
pub struct AuraRuntimeConfig {
    pub persistence_enabled: c_int,
    pub retention_seconds: f64,
    pub db_source: c_int,
    pub db_path: [c_char; AURA_DB_PATH_LEN],
}

impl Default for AuraRuntimeConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: 0,
            retention_seconds: 0.0,
            db_source: AURA_DB_SOURCE_AUTO,
            db_path: [0; AURA_DB_PATH_LEN],
        }
    }
}

impl AuraRuntimeConfig {
    pub fn db_path_lossy(&self) -> String {
        c_buffer_to_string(&self.db_path)
    }
}

/// Opaque store handle.
pub struct AuraStore {
    store: FileBackedStore,
}

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

// ---------------------------------------------------------------------------
// Error plumbing
// ---------------------------------------------------------------------------

fn c_buffer_to_string(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|c| **c != 0).map(|c| *c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Copies `s` into a fixed C buffer, zero-filling the rest.
fn write_c_buffer(buf: &mut [c_char], s: &str) {
    buf.fill(0);
    let text = truncate_utf8(s, buf.len() - 1);
    for (dst, src) in buf.iter_mut().zip(text.bytes().take_while(|b| *b != 0)) {
        *dst = src as c_char;
    }
}

fn set_last_error(message: &str) {
    let c_message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|last| *last.borrow_mut() = c_message);
}

/// Records an error and returns its code.
///
/// # Safety
/// `out_error` must be null or point to a writable `AuraError`.
unsafe fn report(out_error: *mut AuraError, code: c_int, message: &str) -> c_int {
    set_last_error(message);
    // SAFETY: caller guarantees `out_error` is null or valid.
    if let Some(out) = unsafe { out_error.as_mut() } {
        out.code = code;
        write_c_buffer(&mut out.message, message);
    }
    code
}

/// # Safety
/// `out_error` must be null or point to a writable `AuraError`.
unsafe fn clear(out_error: *mut AuraError) -> c_int {
    LAST_ERROR.with(|last| *last.borrow_mut() = CString::default());
    // SAFETY: caller guarantees `out_error` is null or valid.
    if let Some(out) = unsafe { out_error.as_mut() } {
        out.code = AURA_OK;
        out.message.fill(0);
    }
    AURA_OK
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `f`, converting its error or panic into a status code.
///
/// # Safety
/// `out_error` must be null or point to a writable `AuraError`.
unsafe fn guarded<F>(out_error: *mut AuraError, f: F) -> c_int
where
    F: FnOnce() -> Result<(), Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        // SAFETY: forwarded caller guarantee.
        Ok(Ok(())) => unsafe { clear(out_error) },
        Ok(Err(e)) => unsafe { report(out_error, e.kind().code(), e.message()) },
        Err(payload) => {
            let message = format!("internal panic: {}", panic_message(payload));
            error!("{}", message);
            unsafe { report(out_error, AURA_ERR_RUNTIME, &message) }
        }
    }
}

// ---------------------------------------------------------------------------
// Argument conversion
// ---------------------------------------------------------------------------

/// # Safety
/// `raw` must be null or a valid NUL-terminated string.
unsafe fn optional_string(raw: *const c_char, field: &str) -> Result<Option<String>, Error> {
    if raw.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null and NUL-terminated per caller contract.
    let value = unsafe { CStr::from_ptr(raw) }
        .to_str()
        .map_err(|_| Error::invalid_argument(format!("{} must be valid UTF-8.", field)))?;
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

fn optional_bound(has: c_int, value: f64) -> Option<f64> {
    (has != 0).then_some(value)
}

/// Negative values map to 0 so the core reports its own range error.
fn non_negative(value: c_int) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn db_source_code(source: DbSource) -> c_int {
    match source {
        DbSource::Cli => AURA_DB_SOURCE_CLI,
        DbSource::Env => AURA_DB_SOURCE_ENV,
        DbSource::Config => AURA_DB_SOURCE_CONFIG,
        DbSource::Auto => AURA_DB_SOURCE_AUTO,
        DbSource::Disabled => AURA_DB_SOURCE_DISABLED,
    }
}

fn write_config(config: &RuntimeConfig, out: &mut AuraRuntimeConfig) -> Result<(), Error> {
    if config.db_path.len() >= AURA_DB_PATH_LEN {
        return Err(Error::capacity(format!(
            "db_path is {} bytes; at most {} fit in the output buffer.",
            config.db_path.len(),
            AURA_DB_PATH_LEN - 1
        )));
    }
    out.persistence_enabled = c_int::from(config.persistence_enabled);
    out.retention_seconds = config.retention_seconds;
    out.db_source = db_source_code(config.db_source);
    write_c_buffer(&mut out.db_path, &config.db_path);
    Ok(())
}

/// Checks the output contract before any work is done.
fn check_output(out_capacity: c_int, out_count: *mut c_int) -> Result<(), Error> {
    if out_count.is_null() {
        return Err(Error::invalid_argument("out_count must not be null."));
    }
    if out_capacity < 0 {
        return Err(Error::invalid_argument("out_capacity must be >= 0."));
    }
    Ok(())
}

/// Copies results into the caller's buffer.
///
/// # Safety
/// `out_count` must be valid for writes; `out_snapshots` must be null or valid
/// for `out_capacity` writes.
unsafe fn copy_out(
    snapshots: &[Snapshot],
    out_snapshots: *mut AuraSnapshot,
    out_capacity: c_int,
    out_count: *mut c_int,
) -> Result<(), Error> {
    check_output(out_capacity, out_count)?;
    let needed = c_int::try_from(snapshots.len())
        .map_err(|_| Error::capacity("result set exceeds the ABI count range."))?;

    if needed > out_capacity {
        // SAFETY: checked non-null above.
        unsafe { *out_count = needed };
        return Err(Error::capacity(format!(
            "Output buffer capacity is too small ({} needed, {} available).",
            needed, out_capacity
        )));
    }
    if needed > 0 && out_snapshots.is_null() {
        return Err(Error::invalid_argument(
            "out_snapshots must not be null when results are present.",
        ));
    }

    if needed > 0 {
        // SAFETY: non-null and at least `out_capacity >= needed` elements long.
        let dst = unsafe { slice::from_raw_parts_mut(out_snapshots, snapshots.len()) };
        for (dst, src) in dst.iter_mut().zip(snapshots) {
            *dst = AuraSnapshot::from(*src);
        }
    }
    // SAFETY: checked non-null above.
    unsafe { *out_count = needed };
    Ok(())
}

/// # Safety
/// `store` must be null or a handle returned by [`aura_store_open`].
unsafe fn store_ref<'a>(store: *const AuraStore) -> Result<&'a FileBackedStore, Error> {
    // SAFETY: caller guarantees the handle is live.
    unsafe { store.as_ref() }
        .map(|handle| &handle.store)
        .ok_or_else(|| Error::invalid_argument("store must not be null."))
}

// ---------------------------------------------------------------------------
// Exported functions
// ---------------------------------------------------------------------------

/// Library version as a static NUL-terminated string.
#[unsafe(no_mangle)]
pub extern "C" fn aura_platform_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

/// Last error message set on this thread, or an empty string.
///
/// The pointer stays valid until the next ABI call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn aura_last_error_message() -> *const c_char {
    LAST_ERROR.with(|last| last.borrow().as_ptr())
}

/// Resolves the runtime configuration. A null `request` means all defaults.
///
/// # Safety
/// Pointers must be null or valid for their types; strings NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_config_resolve(
    request: *const AuraConfigRequest,
    out_config: *mut AuraRuntimeConfig,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let out_config = out_config
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("out_config must not be null."))?;

            let mut req = ConfigRequest::default();
            if let Some(raw) = request.as_ref() {
                req.cli_db_path = optional_string(raw.cli_db_path, "cli_db_path")?;
                req.no_persist = raw.no_persist != 0;
                req.cli_retention_seconds =
                    optional_bound(raw.has_cli_retention, raw.cli_retention_seconds);
                req.config_path_override =
                    optional_string(raw.config_path_override, "config_path_override")?
                        .map(PathBuf::from);
            }

            let resolved = config::resolve(&req)?;
            write_config(&resolved, out_config)
        })
    }
}

/// Opens a store. Use `":memory:"` for a store without a file.
///
/// # Safety
/// `db_path` must be a valid NUL-terminated string; `out_store` and
/// `out_error` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_open(
    db_path: *const c_char,
    retention_seconds: f64,
    out_store: *mut *mut AuraStore,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            if db_path.is_null() || out_store.is_null() {
                return Err(Error::invalid_argument(
                    "db_path and out_store must not be null.",
                ));
            }
            let path = CStr::from_ptr(db_path)
                .to_str()
                .map_err(|_| Error::invalid_argument("db_path must be valid UTF-8."))?;

            let store = FileBackedStore::open(path, retention_seconds)?;
            *out_store = Box::into_raw(Box::new(AuraStore { store }));
            Ok(())
        })
    }
}

/// Closes a store. Null is accepted and ignored.
///
/// # Safety
/// `store` must be null or a live handle from [`aura_store_open`]; it must not
/// be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_close(store: *mut AuraStore) -> c_int {
    if store.is_null() {
        return AURA_OK;
    }
    // SAFETY: handle was produced by Box::into_raw in aura_store_open.
    let handle = unsafe { Box::from_raw(store) };
    debug!(path = ?handle.store.path(), "closing telemetry store");
    let result = panic::catch_unwind(AssertUnwindSafe(move || drop(handle)));
    if result.is_err() {
        return AURA_ERR_RUNTIME;
    }
    AURA_OK
}

/// # Safety
/// `store` must be a live handle; other pointers null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_append(
    store: *mut AuraStore,
    snapshot: *const AuraSnapshot,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let store = store_ref(store)?;
            let snapshot = snapshot
                .as_ref()
                .ok_or_else(|| Error::invalid_argument("snapshot must not be null."))?;
            store.append(Snapshot::from(*snapshot))
        })
    }
}

/// # Safety
/// `store` must be a live handle; other pointers null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_count(
    store: *mut AuraStore,
    out_count: *mut c_int,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let store = store_ref(store)?;
            let out_count = out_count
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("out_count must not be null."))?;
            let count = store.count()?;
            *out_count = c_int::try_from(count)
                .map_err(|_| Error::capacity("count exceeds the ABI count range."))?;
            Ok(())
        })
    }
}

/// # Safety
/// `store` must be a live handle; `out_snapshots` null or valid for
/// `out_capacity` elements; other pointers null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_latest(
    store: *mut AuraStore,
    limit: c_int,
    out_snapshots: *mut AuraSnapshot,
    out_capacity: c_int,
    out_count: *mut c_int,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let store = store_ref(store)?;
            check_output(out_capacity, out_count)?;
            let snapshots = store.latest(non_negative(limit))?;
            copy_out(&snapshots, out_snapshots, out_capacity, out_count)
        })
    }
}

/// # Safety
/// Same contract as [`aura_store_latest`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_store_between(
    store: *mut AuraStore,
    has_start: c_int,
    start_timestamp: f64,
    has_end: c_int,
    end_timestamp: f64,
    out_snapshots: *mut AuraSnapshot,
    out_capacity: c_int,
    out_count: *mut c_int,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let store = store_ref(store)?;
            check_output(out_capacity, out_count)?;
            let snapshots = store.between(
                optional_bound(has_start, start_timestamp),
                optional_bound(has_end, end_timestamp),
            )?;
            copy_out(&snapshots, out_snapshots, out_capacity, out_count)
        })
    }
}

/// Downsamples a caller-provided ascending series.
///
/// # Safety
/// `input_snapshots` must be valid for `input_count` reads when
/// `input_count > 0`; output pointers as in [`aura_store_latest`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_dvr_downsample_lttb(
    input_snapshots: *const AuraSnapshot,
    input_count: c_int,
    target: c_int,
    out_snapshots: *mut AuraSnapshot,
    out_capacity: c_int,
    out_count: *mut c_int,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let input_len = usize::try_from(input_count)
                .map_err(|_| Error::invalid_argument("input_count must be >= 0."))?;
            if input_len > 0 && input_snapshots.is_null() {
                return Err(Error::invalid_argument(
                    "input_snapshots must not be null when input_count > 0.",
                ));
            }
            check_output(out_capacity, out_count)?;

            let input: Vec<Snapshot> = if input_len == 0 {
                Vec::new()
            } else {
                slice::from_raw_parts(input_snapshots, input_len)
                    .iter()
                    .map(|raw| Snapshot::from(*raw))
                    .collect()
            };
            let output = downsample_lttb(&input, non_negative(target))?;
            copy_out(&output, out_snapshots, out_capacity, out_count)
        })
    }
}

/// Range read plus downsampling in one call.
///
/// # Safety
/// Same contract as [`aura_store_between`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aura_dvr_query_timeline(
    store: *mut AuraStore,
    has_start: c_int,
    start_timestamp: f64,
    has_end: c_int,
    end_timestamp: f64,
    resolution: c_int,
    out_snapshots: *mut AuraSnapshot,
    out_capacity: c_int,
    out_count: *mut c_int,
    out_error: *mut AuraError,
) -> c_int {
    unsafe {
        guarded(out_error, || {
            let store = store_ref(store)?;
            check_output(out_capacity, out_count)?;
            let snapshots = query_timeline(
                store,
                optional_bound(has_start, start_timestamp),
                optional_bound(has_end, end_timestamp),
                non_negative(resolution),
            )?;
            copy_out(&snapshots, out_snapshots, out_capacity, out_count)
        })
    }
}
