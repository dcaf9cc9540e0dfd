//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::constants;

/// Tunwarden - OpenVPN tunnel control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding persisted profile records
    #[arg(long, default_value = constants::DEFAULT_PROFILES_DIR)]
    pub profiles_dir: PathBuf,

    /// Directory for connection state and per-run artifacts
    #[arg(long, default_value = constants::DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Mirror log output into a file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage VPN profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Drive the tunnel connection
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },
    /// Configure automatic failover
    Failover {
        #[command(subcommand)]
        command: FailoverCommands,
    },
    /// Inspect and control health monitoring
    Health {
        #[command(subcommand)]
        command: HealthCommands,
    },
    /// Run network diagnostics
    Diag {
        #[command(subcommand)]
        command: DiagCommands,
    },
    /// Run the control plane in the foreground with monitoring active
    Run {
        /// Health probe interval in seconds (minimum 10)
        #[arg(long)]
        interval_seconds: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// List all profiles
    List,
    /// Show one profile
    Get { id: String },
    /// Import a .ovpn file or URL
    Import {
        /// Path to a .ovpn file, or an http(s) URL
        source: String,
        /// Display name override
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a profile
    Delete { id: String },
    /// Render a profile back to OpenVPN text
    Export {
        id: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Re-run validation on a profile
    Validate { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConnectionCommands {
    /// Show the current connection status
    Status,
    /// Connect to a profile
    Connect { id: String },
    /// Connect using the ranked failover list
    ConnectFailover,
    /// Disconnect the active tunnel
    Disconnect,
    /// Show the connection history
    History,
}

#[derive(Subcommand, Debug)]
pub enum FailoverCommands {
    /// Enable failover over a ranked profile list
    Enable {
        /// Profile ids in priority order (first = highest)
        #[arg(required = true)]
        ids: Vec<String>,
        /// Latency threshold in milliseconds
        #[arg(long)]
        max_latency_ms: Option<f64>,
        /// Packet loss threshold in percent
        #[arg(long)]
        max_packet_loss: Option<f64>,
        /// Ceiling on time spent connecting, in seconds
        #[arg(long)]
        max_connection_time: Option<u64>,
        /// Attempts before a profile is skipped
        #[arg(long)]
        max_failed_attempts: Option<u32>,
    },
    /// Disable failover
    Disable,
    /// Show failover configuration and counters
    Status,
    /// Manually trigger one switchover
    Trigger,
    /// Reset per-profile failed-attempt counters
    ResetAttempts,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Latest health snapshot
    Current,
    /// Aggregated health over the last hour
    Summary,
    /// Snapshots from the last N minutes
    History {
        #[arg(long, default_value_t = 60)]
        minutes: i64,
    },
    /// Show alert thresholds
    GetThresholds,
    /// Update alert thresholds
    SetThresholds {
        #[arg(long)]
        max_latency_ms: Option<f64>,
        #[arg(long)]
        max_packet_loss: Option<f64>,
        #[arg(long)]
        min_throughput_mbps: Option<f64>,
    },
    /// Start the monitoring loop
    Start {
        /// Probe interval in seconds (minimum 10)
        #[arg(long)]
        interval_seconds: Option<u64>,
    },
    /// Stop the monitoring loop
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum DiagCommands {
    /// Ping a host
    Ping {
        host: String,
        #[arg(long)]
        count: Option<u32>,
        #[arg(long)]
        timeout: Option<u32>,
    },
    /// Trace the route to a host
    Traceroute {
        host: String,
        #[arg(long)]
        max_hops: Option<u32>,
        #[arg(long)]
        timeout: Option<u32>,
    },
    /// Measure download bandwidth
    Bandwidth {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Resolve a hostname
    Dns {
        hostname: String,
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        record_type: Option<String>,
    },
    /// List stored diagnostic results
    Results,
    /// Show one diagnostic result by key
    Result { key: String },
}
