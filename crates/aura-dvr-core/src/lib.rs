//! aura-dvr-core - persistence and query substrate for the telemetry DVR.
//!
//! Provides:
//! - `config` - runtime configuration resolver (CLI / environment / file / default)
//! - `model` - the `Snapshot` sample and its validation
//! - `storage` - `TelemetryStore` trait and the file-backed implementation
//! - `dvr` - LTTB downsampling and timeline queries
//! - `error` - error kinds shared with the C ABI

pub mod config;
pub mod dvr;
pub mod error;
pub mod model;
pub mod storage;

pub use config::{ConfigRequest, DbSource, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use model::Snapshot;
pub use storage::{FileBackedStore, FlushPolicy, StoreOptions, TelemetryStore};
