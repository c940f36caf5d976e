use std::ffi::{CStr, CString, c_int};
use std::path::Path;
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

use aura_platform::*;
use tempfile::tempdir;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn c_path(path: &Path) -> CString {
    CString::new(path.to_str().unwrap()).unwrap()
}

fn open(path: &CString, retention: f64) -> *mut AuraStore {
    let mut store = ptr::null_mut();
    let mut err = AuraError::default();
    let rc = unsafe { aura_store_open(path.as_ptr(), retention, &mut store, &mut err) };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    assert!(!store.is_null());
    store
}

fn append(store: *mut AuraStore, timestamp: f64, cpu: f64, mem: f64) {
    let snapshot = AuraSnapshot {
        timestamp,
        cpu_percent: cpu,
        memory_percent: mem,
        ..Default::default()
    };
    let mut err = AuraError::default();
    let rc = unsafe { aura_store_append(store, &snapshot, &mut err) };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
}

fn latest(store: *mut AuraStore, limit: c_int) -> Vec<AuraSnapshot> {
    let mut buf = vec![AuraSnapshot::default(); 64];
    let mut count: c_int = 0;
    let mut err = AuraError::default();
    let rc = unsafe {
        aura_store_latest(
            store,
            limit,
            buf.as_mut_ptr(),
            buf.len() as c_int,
            &mut count,
            &mut err,
        )
    };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    buf.truncate(count as usize);
    buf
}

#[test]
fn test_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = c_path(&dir.path().join("nested").join("telemetry.sqlite"));
    let base = now();

    let store = open(&path, 3600.0);
    append(store, base - 2.0, 10.0, 20.0);
    append(store, base - 1.0, 11.0, 21.0);
    append(store, base, 12.0, 22.0);
    assert_eq!(unsafe { aura_store_close(store) }, AURA_OK);

    let store = open(&path, 3600.0);
    let mut count: c_int = 0;
    let rc = unsafe { aura_store_count(store, &mut count, ptr::null_mut()) };
    assert_eq!(rc, AURA_OK);
    assert_eq!(count, 3);

    let out = latest(store, 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].timestamp, base - 1.0);
    assert_eq!(out[1].timestamp, base);
    assert_eq!(out[1].cpu_percent, 12.0);
    assert_eq!(out[1].memory_percent, 22.0);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_between_with_open_bounds() {
    let store = open(&CString::new(":memory:").unwrap(), 3600.0);
    let base = now();
    for i in 0..5 {
        append(store, base - 10.0 + i as f64, 1.0, 1.0);
    }

    let mut buf = [AuraSnapshot::default(); 8];
    let mut count: c_int = 0;
    let rc = unsafe {
        aura_store_between(
            store,
            1,
            base - 8.0,
            0,
            0.0,
            buf.as_mut_ptr(),
            buf.len() as c_int,
            &mut count,
            ptr::null_mut(),
        )
    };
    assert_eq!(rc, AURA_OK);
    assert_eq!(count, 3);
    assert_eq!(buf[0].timestamp, base - 8.0);

    let mut err = AuraError::default();
    let rc = unsafe {
        aura_store_between(
            store,
            1,
            base,
            1,
            base - 5.0,
            buf.as_mut_ptr(),
            buf.len() as c_int,
            &mut count,
            &mut err,
        )
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    assert_eq!(err.code, AURA_ERR_INVALID_ARGUMENT);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_legacy_file_is_moved_aside() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("telemetry.sqlite");
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(&[7u8; 128]);
    std::fs::write(&db, bytes).unwrap();

    let store = open(&c_path(&db), 3600.0);
    assert!(latest(store, 10).is_empty());
    unsafe { aura_store_close(store) };

    assert!(dir.path().join("telemetry.sqlite.legacy.sqlite").exists());
    let contents = std::fs::read(&db).unwrap();
    assert!(!contents.starts_with(b"SQLite format 3\0"));
}

#[test]
fn test_corrupt_lines_are_skipped() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("telemetry.sqlite");
    let base = now();
    std::fs::write(
        &db,
        format!(
            "{},1,2\nnot a line\n{},3,4\n{},500,4\n",
            base - 2.0,
            base - 1.0,
            base
        ),
    )
    .unwrap();

    let store = open(&c_path(&db), 3600.0);
    let out = latest(store, 10);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].cpu_percent, 1.0);
    assert_eq!(out[1].cpu_percent, 3.0);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_downsample_ten_to_four() {
    let input: Vec<AuraSnapshot> = (0..10)
        .map(|i| AuraSnapshot {
            timestamp: 100.0 + i as f64,
            cpu_percent: (i * 7 % 10) as f64,
            memory_percent: 30.0,
            ..Default::default()
        })
        .collect();
    let mut out = [AuraSnapshot::default(); 4];
    let mut count: c_int = 0;
    let mut err = AuraError::default();
    let rc = unsafe {
        aura_dvr_downsample_lttb(
            input.as_ptr(),
            input.len() as c_int,
            4,
            out.as_mut_ptr(),
            out.len() as c_int,
            &mut count,
            &mut err,
        )
    };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    assert_eq!(count, 4);
    assert_eq!(out[0].timestamp, 100.0);
    assert_eq!(out[3].timestamp, 109.0);
}

#[test]
fn test_downsample_empty_input_with_null_buffers() {
    let mut count: c_int = -1;
    let rc = unsafe {
        aura_dvr_downsample_lttb(
            ptr::null(),
            0,
            10,
            ptr::null_mut(),
            0,
            &mut count,
            ptr::null_mut(),
        )
    };
    assert_eq!(rc, AURA_OK);
    assert_eq!(count, 0);
}

#[test]
fn test_downsample_argument_errors() {
    let input = [AuraSnapshot::default(); 3];
    let mut out = [AuraSnapshot::default(); 3];
    let mut count: c_int = 0;
    let mut err = AuraError::default();

    let rc = unsafe {
        aura_dvr_downsample_lttb(input.as_ptr(), -1, 2, out.as_mut_ptr(), 3, &mut count, &mut err)
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe {
        aura_dvr_downsample_lttb(input.as_ptr(), 3, 1, out.as_mut_ptr(), 3, &mut count, &mut err)
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe {
        aura_dvr_downsample_lttb(ptr::null(), 3, 2, out.as_mut_ptr(), 3, &mut count, &mut err)
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe {
        aura_dvr_downsample_lttb(input.as_ptr(), 3, 2, out.as_mut_ptr(), 3, ptr::null_mut(), &mut err)
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
}

#[test]
fn test_timeline_over_window() {
    let store = open(&CString::new(":memory:").unwrap(), 3600.0);
    let base = now() - 60.0;
    for i in 0..50 {
        append(store, base + i as f64, (i % 9) as f64 * 10.0, 50.0);
    }

    let start = base + 10.0;
    let end = base + 40.0;
    let mut out = [AuraSnapshot::default(); 16];
    let mut count: c_int = 0;
    let mut err = AuraError::default();
    let rc = unsafe {
        aura_dvr_query_timeline(
            store,
            1,
            start,
            1,
            end,
            10,
            out.as_mut_ptr(),
            out.len() as c_int,
            &mut count,
            &mut err,
        )
    };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    assert_eq!(count, 10);
    let points = &out[..count as usize];
    assert!(points.iter().all(|s| s.timestamp >= start && s.timestamp <= end));
    assert_eq!(points[0].timestamp, start);
    assert_eq!(points[9].timestamp, end);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_capacity_errors_report_required_length() {
    let store = open(&CString::new(":memory:").unwrap(), 3600.0);
    let base = now();
    for i in 0..5 {
        append(store, base - i as f64, 1.0, 1.0);
    }

    let mut buf = [AuraSnapshot::default(); 2];
    let mut count: c_int = 0;
    let mut err = AuraError::default();
    let rc = unsafe {
        aura_store_latest(store, 5, buf.as_mut_ptr(), 2, &mut count, &mut err)
    };
    assert_eq!(rc, AURA_ERR_CAPACITY);
    assert_eq!(err.code, AURA_ERR_CAPACITY);
    assert_eq!(count, 5);
    assert!(err.message_lossy().contains("capacity is too small"));

    let last = unsafe { CStr::from_ptr(aura_last_error_message()) };
    assert!(last.to_str().unwrap().contains("capacity is too small"));

    let rc = unsafe { aura_store_latest(store, 5, buf.as_mut_ptr(), -1, &mut count, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe { aura_store_latest(store, 5, ptr::null_mut(), 10, &mut count, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe { aura_store_latest(store, 0, buf.as_mut_ptr(), 2, &mut count, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_null_arguments() {
    let mut err = AuraError::default();
    let mut count: c_int = 0;

    assert_eq!(unsafe { aura_store_close(ptr::null_mut()) }, AURA_OK);

    let rc = unsafe { aura_store_count(ptr::null_mut(), &mut count, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    assert_eq!(err.code, AURA_ERR_INVALID_ARGUMENT);

    let store = open(&CString::new(":memory:").unwrap(), 60.0);
    let rc = unsafe { aura_store_append(store, ptr::null(), &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let mut handle = ptr::null_mut();
    let rc = unsafe { aura_store_open(ptr::null(), 60.0, &mut handle, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    assert!(handle.is_null());

    let rc = unsafe {
        aura_store_open(c":memory:".as_ptr(), -1.0, &mut handle, &mut err)
    };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);

    let rc = unsafe { aura_config_resolve(ptr::null(), ptr::null_mut(), &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_invalid_snapshot_is_rejected() {
    let store = open(&CString::new(":memory:").unwrap(), 60.0);
    let bad = AuraSnapshot {
        timestamp: now(),
        cpu_percent: f64::NAN,
        memory_percent: 1.0,
        ..Default::default()
    };
    let mut err = AuraError::default();
    let rc = unsafe { aura_store_append(store, &bad, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    assert!(err.message_lossy().contains("cpu_percent"));

    let mut count: c_int = -1;
    unsafe { aura_store_count(store, &mut count, ptr::null_mut()) };
    assert_eq!(count, 0);
    unsafe { aura_store_close(store) };
}

#[test]
fn test_success_clears_error() {
    let store = open(&CString::new(":memory:").unwrap(), 60.0);
    let mut err = AuraError::default();
    let mut count: c_int = 0;
    unsafe { aura_store_count(ptr::null_mut(), &mut count, &mut err) };
    assert_ne!(err.code, AURA_OK);

    let rc = unsafe { aura_store_count(store, &mut count, &mut err) };
    assert_eq!(rc, AURA_OK);
    assert_eq!(err.code, AURA_OK);
    assert!(err.message_lossy().is_empty());
    unsafe { aura_store_close(store) };
}

#[test]
fn test_config_no_persist_is_disabled() {
    let dir = tempdir().unwrap();
    let missing = c_path(&dir.path().join("missing.toml"));
    let request = AuraConfigRequest {
        no_persist: 1,
        has_cli_retention: 1,
        cli_retention_seconds: 120.0,
        config_path_override: missing.as_ptr(),
        ..Default::default()
    };
    let mut config = AuraRuntimeConfig::default();
    let mut err = AuraError::default();
    let rc = unsafe { aura_config_resolve(&request, &mut config, &mut err) };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    assert_eq!(config.persistence_enabled, 0);
    assert_eq!(config.db_source, AURA_DB_SOURCE_DISABLED);
    assert_eq!(config.retention_seconds, 120.0);
    assert!(config.db_path_lossy().is_empty());
}

#[test]
fn test_config_cli_path_wins() {
    let dir = tempdir().unwrap();
    let config_file = dir.path().join("aura.toml");
    std::fs::write(
        &config_file,
        "[persistence]\ndb_path = \"/from/config.sqlite\"\nretention_seconds = 60\n",
    )
    .unwrap();
    let config_c = c_path(&config_file);
    let cli_path = CString::new("/from/cli.sqlite").unwrap();

    let request = AuraConfigRequest {
        cli_db_path: cli_path.as_ptr(),
        has_cli_retention: 1,
        cli_retention_seconds: 30.0,
        config_path_override: config_c.as_ptr(),
        ..Default::default()
    };
    let mut config = AuraRuntimeConfig::default();
    let rc = unsafe { aura_config_resolve(&request, &mut config, ptr::null_mut()) };
    assert_eq!(rc, AURA_OK);
    assert_eq!(config.persistence_enabled, 1);
    assert_eq!(config.db_source, AURA_DB_SOURCE_CLI);
    assert_eq!(config.db_path_lossy(), "/from/cli.sqlite");
    assert_eq!(config.retention_seconds, 30.0);
}

#[test]
fn test_config_rejects_bad_cli_retention() {
    let dir = tempdir().unwrap();
    let missing = c_path(&dir.path().join("missing.toml"));
    let request = AuraConfigRequest {
        has_cli_retention: 1,
        cli_retention_seconds: 0.0,
        config_path_override: missing.as_ptr(),
        ..Default::default()
    };
    let mut config = AuraRuntimeConfig::default();
    let mut err = AuraError::default();
    let rc = unsafe { aura_config_resolve(&request, &mut config, &mut err) };
    assert_eq!(rc, AURA_ERR_INVALID_ARGUMENT);
    assert!(err.message_lossy().contains("retention_seconds"));
}

#[test]
fn test_version_string() {
    let version = unsafe { CStr::from_ptr(aura_platform_version()) };
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_output_records_use_full_snapshot_stride() {
    assert_eq!(std::mem::size_of::<AuraSnapshot>(), 5 * std::mem::size_of::<f64>());

    let input: Vec<AuraSnapshot> = (0..3)
        .map(|i| AuraSnapshot {
            timestamp: 200.0 + i as f64,
            cpu_percent: 10.0 * i as f64,
            memory_percent: 40.0,
            disk_read_bps: 123.0,
            disk_write_bps: 456.0,
        })
        .collect();
    let stale = AuraSnapshot {
        disk_read_bps: 7.0,
        disk_write_bps: 7.0,
        ..Default::default()
    };
    let mut out = [stale; 3];
    let mut count: c_int = 0;
    let rc = unsafe {
        aura_dvr_downsample_lttb(
            input.as_ptr(),
            input.len() as c_int,
            10,
            out.as_mut_ptr(),
            out.len() as c_int,
            &mut count,
            ptr::null_mut(),
        )
    };
    assert_eq!(rc, AURA_OK);
    assert_eq!(count, 3);
    for (i, s) in out.iter().enumerate() {
        assert_eq!(s.timestamp, 200.0 + i as f64);
        assert_eq!(s.cpu_percent, 10.0 * i as f64);
        assert_eq!(s.disk_read_bps, 0.0);
        assert_eq!(s.disk_write_bps, 0.0);
    }
}
