//! aura-dvr - Telemetry DVR command-line tool.
//!
//! Records CPU/memory snapshots from stdin into the local store and replays
//! them as raw ranges or downsampled timelines.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod time_parser;

use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use aura_dvr_core::config::{self, ConfigRequest, RuntimeConfig};
use aura_dvr_core::dvr::{DEFAULT_RESOLUTION, query_recent, query_timeline};
use aura_dvr_core::storage::parse_line;
use aura_dvr_core::{Error, FileBackedStore, FlushPolicy, Snapshot, StoreOptions, TelemetryStore};

use time_parser::{now_seconds, parse_duration, parse_time};

const EXIT_FAILURE: u8 = 2;

/// Telemetry DVR: record and replay CPU/memory snapshots.
#[derive(Parser, Debug)]
#[command(name = "aura-dvr", about = "Telemetry DVR for CPU/memory snapshots", version)]
struct Args {
    /// Store file path (overrides AURA_DB_PATH and the config file).
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<String>,

    /// Config file to read instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Retention window in seconds (overrides AURA_RETENTION_SECONDS and the config file).
    #[arg(long, global = true, value_name = "SECONDS")]
    retention_seconds: Option<f64>,

    /// Keep samples in memory only.
    #[arg(long, global = true)]
    no_persist: bool,

    /// Print one JSON object per line.
    #[arg(long, global = true)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved runtime configuration.
    Config,

    /// Append snapshots read from stdin until EOF or Ctrl-C.
    ///
    /// Each line is `timestamp,cpu,memory` or `cpu,memory` (stamped with the
    /// current time).
    Record {
        /// Rewrite the store file every N samples instead of after each one.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        flush_every: Option<u64>,
    },

    /// Print the most recent N snapshots, oldest first.
    Latest {
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
    },

    /// Print every snapshot within a time range.
    Between {
        /// Range start (unix seconds, now, -1h, or ISO 8601).
        #[arg(long, value_parser = time_arg, allow_hyphen_values = true)]
        since: Option<f64>,

        /// Range end (unix seconds, now, -1h, or ISO 8601).
        #[arg(long, value_parser = time_arg, allow_hyphen_values = true)]
        until: Option<f64>,
    },

    /// Print a downsampled timeline.
    Timeline {
        /// Range start (unix seconds, now, -1h, or ISO 8601).
        #[arg(long, value_parser = time_arg, allow_hyphen_values = true, conflicts_with = "window")]
        since: Option<f64>,

        /// Range end (unix seconds, now, -1h, or ISO 8601).
        #[arg(long, value_parser = time_arg, allow_hyphen_values = true)]
        until: Option<f64>,

        /// Window ending at --until (or now), e.g. 15m, 1h.
        #[arg(long, value_parser = duration_arg)]
        window: Option<f64>,

        /// Number of points to return.
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        resolution: usize,
    },
}

fn time_arg(s: &str) -> Result<f64, String> {
    parse_time(s).map_err(|e| e.to_string())
}

fn duration_arg(s: &str) -> Result<f64, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only). Logs go to
/// stderr so stdout stays machine-readable.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["aura_dvr", "aura_dvr_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("aura-dvr: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let runtime = config::resolve(&config_request(args))?;
    let mut out = BufWriter::new(io::stdout().lock());

    match &args.command {
        Command::Config => print_config(&mut out, &runtime, args.json)?,
        Command::Record { flush_every } => {
            let policy = match flush_every {
                Some(n) => FlushPolicy::Batched {
                    max_pending: usize::try_from(*n).unwrap_or(usize::MAX),
                },
                None => FlushPolicy::Always,
            };
            record(&runtime, policy)?;
        }
        Command::Latest { limit } => {
            let store = open_for_read(&runtime)?;
            let limit = usize::try_from(*limit).unwrap_or(usize::MAX);
            print_snapshots(&mut out, &store.latest(limit)?, args.json)?;
        }
        Command::Between { since, until } => {
            let store = open_for_read(&runtime)?;
            print_snapshots(&mut out, &store.between(*since, *until)?, args.json)?;
        }
        Command::Timeline {
            since,
            until,
            window,
            resolution,
        } => {
            let store = open_for_read(&runtime)?;
            let points = match window {
                Some(window) => {
                    let end = until.unwrap_or_else(now_seconds);
                    query_recent(&store, end, *window, *resolution)?
                }
                None => query_timeline(&store, *since, *until, *resolution)?,
            };
            debug!(points = points.len(), "timeline computed");
            print_snapshots(&mut out, &points, args.json)?;
        }
    }

    out.flush().map_err(output_error)
}

fn config_request(args: &Args) -> ConfigRequest {
    ConfigRequest {
        cli_db_path: args.db_path.clone(),
        no_persist: args.no_persist,
        cli_retention_seconds: args.retention_seconds,
        config_path_override: args.config_path.clone(),
    }
}

fn open_for_read(runtime: &RuntimeConfig) -> Result<FileBackedStore, Error> {
    if !runtime.persistence_enabled {
        return Err(Error::invalid_argument(
            "--no-persist leaves nothing to read; drop it for read commands.",
        ));
    }
    FileBackedStore::open(&runtime.db_path, runtime.retention_seconds)
}

fn open_for_record(runtime: &RuntimeConfig, policy: FlushPolicy) -> Result<FileBackedStore, Error> {
    let options = StoreOptions::new(runtime.retention_seconds).with_flush_policy(policy);
    if runtime.persistence_enabled {
        FileBackedStore::open_with(&runtime.db_path, options)
    } else {
        FileBackedStore::in_memory(options)
    }
}

/// Parses one stdin record. Two fields are `cpu,memory` stamped with `now`.
fn parse_record(line: &str, now: f64) -> Result<Snapshot, Error> {
    let trimmed = line.trim();
    match trimmed.matches(',').count() {
        1 => parse_line(&format!("{},{}", now, trimmed)),
        _ => parse_line(trimmed),
    }
}

/// Appends to the active store. The first failure turns persistence off for
/// the rest of the session; returns whether the snapshot was stored.
fn append_or_disable(store: &mut Option<FileBackedStore>, snapshot: Snapshot) -> bool {
    let Some(active) = store.as_ref() else {
        return false;
    };
    match active.append(snapshot) {
        Ok(()) => true,
        Err(e) => {
            warn!("DVR persistence disabled: {}", e);
            *store = None;
            false
        }
    }
}

fn record(runtime: &RuntimeConfig, policy: FlushPolicy) -> Result<(), Error> {
    let mut store = Some(open_for_record(runtime, policy)?);
    info!(
        persistent = runtime.persistence_enabled,
        source = runtime.db_source.as_str(),
        path = %runtime.db_path,
        retention_seconds = runtime.retention_seconds,
        "recording from stdin"
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    // stdin blocks, so lines are read on a helper thread and the loop polls
    // the channel to notice shutdown.
    let (tx, rx) = mpsc::channel::<io::Result<String>>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });

    let mut recorded: u64 = 0;
    let mut skipped: u64 = 0;
    let mut dropped: u64 = 0;
    let mut line_no: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let line = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match parse_record(&line, now_seconds()) {
            Ok(snapshot) => {
                if append_or_disable(&mut store, snapshot) {
                    recorded += 1;
                    debug!(
                        "Snapshot #{}: cpu={:.1}% mem={:.1}%",
                        recorded, snapshot.cpu_percent, snapshot.memory_percent
                    );
                } else {
                    dropped += 1;
                }
            }
            Err(e) => {
                skipped += 1;
                warn!("Skipping line {}: {}", line_no, e);
            }
        }
    }

    info!("Shutting down...");
    match store {
        Some(store) => {
            store.flush()?;
            info!(
                "Recorded {} snapshots, skipped {}, {} in store",
                recorded,
                skipped,
                store.count()?
            );
        }
        None => {
            warn!(
                "Recorded {} snapshots before persistence was disabled, {} not stored, skipped {}",
                recorded, dropped, skipped
            );
        }
    }
    Ok(())
}

fn output_error(e: io::Error) -> Error {
    Error::runtime(format!("failed to write output: {}", e))
}

fn format_snapshot(snapshot: &Snapshot) -> String {
    format!(
        "cpu={:.1}% mem={:.1}% ts={:.3}",
        snapshot.cpu_percent, snapshot.memory_percent, snapshot.timestamp
    )
}

fn print_snapshots<W: Write>(out: &mut W, snapshots: &[Snapshot], json: bool) -> Result<(), Error> {
    for snapshot in snapshots {
        if json {
            let line = serde_json::to_string(snapshot)
                .map_err(|e| Error::runtime(format!("failed to encode snapshot: {}", e)))?;
            writeln!(out, "{}", line).map_err(output_error)?;
        } else {
            writeln!(out, "{}", format_snapshot(snapshot)).map_err(output_error)?;
        }
    }
    Ok(())
}

fn print_config<W: Write>(out: &mut W, runtime: &RuntimeConfig, json: bool) -> Result<(), Error> {
    if json {
        let text = serde_json::to_string_pretty(runtime)
            .map_err(|e| Error::runtime(format!("failed to encode config: {}", e)))?;
        return writeln!(out, "{}", text).map_err(output_error);
    }

    let path = if runtime.db_path.is_empty() {
        "-"
    } else {
        runtime.db_path.as_str()
    };
    let state = if runtime.persistence_enabled {
        "enabled"
    } else {
        "disabled"
    };
    let write = |out: &mut W| -> io::Result<()> {
        writeln!(out, "persistence: {}", state)?;
        writeln!(out, "db_source:   {}", runtime.db_source.as_str())?;
        writeln!(out, "db_path:     {}", path)?;
        writeln!(out, "retention:   {}s", runtime.retention_seconds)
    };
    write(out).map_err(output_error)
}
