//! Mutates the process environment, so it lives in its own test binary.

use std::ffi::CString;

use aura_platform::*;
use tempfile::tempdir;

#[test]
fn test_malformed_env_retention_is_runtime_error() {
    let dir = tempdir().unwrap();
    let missing = CString::new(dir.path().join("missing.toml").to_str().unwrap()).unwrap();
    let db_path = CString::new(dir.path().join("t.sqlite").to_str().unwrap()).unwrap();

    unsafe { std::env::set_var("AURA_RETENTION_SECONDS", "soon") };

    let request = AuraConfigRequest {
        cli_db_path: db_path.as_ptr(),
        config_path_override: missing.as_ptr(),
        ..Default::default()
    };
    let mut config = AuraRuntimeConfig::default();
    let mut err = AuraError::default();
    let rc = unsafe { aura_config_resolve(&request, &mut config, &mut err) };
    assert_eq!(rc, AURA_ERR_RUNTIME);
    assert!(err.message_lossy().contains("AURA_RETENTION_SECONDS"));

    // A CLI value short-circuits the environment.
    let request = AuraConfigRequest {
        has_cli_retention: 1,
        cli_retention_seconds: 90.0,
        ..request
    };
    let rc = unsafe { aura_config_resolve(&request, &mut config, &mut err) };
    assert_eq!(rc, AURA_OK, "{}", err.message_lossy());
    assert_eq!(config.retention_seconds, 90.0);

    unsafe { std::env::remove_var("AURA_RETENTION_SECONDS") };
}
