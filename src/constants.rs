//! Application-wide constants and configuration defaults.
//!
//! This module defines all static configuration values used throughout
//! Tunwarden, including timing intervals, bounded-collection capacities,
//! alert and failover thresholds, probe targets, and OpenVPN launch
//! parameters.

#![allow(dead_code)]
use std::time::Duration;

// === Application Metadata ===

/// Application name (from Cargo.toml).
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
/// Current application version (from Cargo.toml).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// === Path Configuration ===

/// Default directory holding persisted profile records.
pub const DEFAULT_PROFILES_DIR: &str = "/config/vpn/profiles";
/// Default directory for connection state, history, and per-run artifacts.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/tunwarden/vpn-state";
/// Persisted record for the current active connection.
pub const CONNECTION_STATE_FILE: &str = "current_connection.json";
/// Persisted record for the bounded connection history.
pub const CONNECTION_HISTORY_FILE: &str = "connection_history.json";
/// Upper bound on ingested configuration file size.
pub const MAX_CONFIG_SIZE_BYTES: u64 = 1_048_576;

// === Bounded Collections ===

/// Maximum retained connection history records.
pub const HISTORY_CAP: usize = 100;
/// Hard ceiling on retained health snapshots (24 h at the 30 s default).
pub const SNAPSHOT_CAP: usize = 2880;
/// Sliding health window length in seconds (24 hours).
pub const SNAPSHOT_WINDOW_SECS: u64 = 86_400;
/// Maximum retained diagnostic results.
pub const DIAGNOSTIC_RESULT_CAP: usize = 100;
/// Maximum retained health alerts.
pub const ALERT_CAP: usize = 50;

// === Health Monitoring ===

/// Default interval between health monitor ticks.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum accepted monitor interval.
pub const MONITOR_INTERVAL_FLOOR: Duration = Duration::from_secs(10);
/// Hostname resolved each tick to probe DNS health.
pub const DNS_PROBE_HOST: &str = "google.com";
/// Deadline for name resolution (validation and health probes).
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Ping sample count for the latency probe.
pub const LATENCY_PING_COUNT: u32 = 3;
/// Ping sample count for the packet-loss probe.
pub const LOSS_PING_COUNT: u32 = 10;
/// Per-packet ping wait in seconds (`-W`).
pub const PING_WAIT_SECS: u32 = 3;
/// Latency multiplier treated as a tunnel-instability spike.
pub const LATENCY_SPIKE_FACTOR: f64 = 3.0;
/// Minutes of history aggregated into the health summary.
pub const SUMMARY_WINDOW_MINUTES: i64 = 60;
/// Fraction of a threshold at which the summary degrades to "warning".
pub const WARNING_FRACTION: f64 = 0.8;
/// Relative change (percent) below which a trend is labelled "stable".
pub const TREND_STABLE_BAND: f64 = 10.0;

// === Failover ===

/// Minimum interval between two consecutive switchovers.
pub const FAILOVER_COOLDOWN: Duration = Duration::from_secs(300);
/// Delay before the deferred failover attempt after a process death.
pub const CRASH_FAILOVER_DELAY: Duration = Duration::from_secs(2);

// === OpenVPN Subprocess ===

/// Seconds between OpenVPN status-file rewrites (`--status <file> N`).
pub const OPENVPN_STATUS_INTERVAL: u32 = 10;
/// Seconds between connection retries (`--connect-retry`).
pub const OPENVPN_CONNECT_RETRY_SECS: u32 = 10;
/// Maximum connection retries (`--connect-retry-max`).
pub const OPENVPN_CONNECT_RETRY_MAX: u32 = 3;
/// Log verbosity handed to the subprocess (`--verb`).
pub const OPENVPN_VERBOSITY: u32 = 3;
/// Grace period between interrupt and kill when stopping a process.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);
/// Deadline for short system probes (`ip`, `kill`, `pgrep`).
pub const PROBE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

// === Diagnostics Defaults ===

/// Default ping packet count.
pub const DIAG_PING_COUNT: u32 = 4;
/// Default ping per-packet timeout in seconds.
pub const DIAG_PING_TIMEOUT_SECS: u32 = 5;
/// Default ping inter-packet interval in seconds.
pub const DIAG_PING_INTERVAL_SECS: f64 = 1.0;
/// Default ping payload size in bytes.
pub const DIAG_PING_SIZE: u32 = 32;
/// Default traceroute hop ceiling.
pub const DIAG_TRACEROUTE_MAX_HOPS: u32 = 30;
/// Default traceroute per-hop wait in seconds.
pub const DIAG_TRACEROUTE_TIMEOUT_SECS: u32 = 5;
/// Default traceroute queries per hop.
pub const DIAG_TRACEROUTE_QUERIES: u32 = 3;
/// Default bandwidth test download target.
pub const DIAG_BANDWIDTH_URL: &str = "http://speedtest.wdc01.softlayer.com/downloads/test100.zip";
/// Default bandwidth test duration in seconds.
pub const DIAG_BANDWIDTH_DURATION_SECS: u64 = 10;
/// Read buffer size for the bandwidth probe.
pub const DIAG_BANDWIDTH_BUF: usize = 8192;
/// Default DNS server for non-A record lookups.
pub const DIAG_DNS_SERVER: &str = "8.8.8.8";
/// Overall deadline for a `dig` invocation.
pub const DIAG_DIG_TIMEOUT: Duration = Duration::from_secs(10);

// === HTTP ===

/// Timeout for profile downloads.
pub const HTTP_TIMEOUT_SECS: u64 = 10;
