//! Command dispatch: maps parsed CLI arguments onto the manager API and
//! prints results as JSON.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use serde::Serialize;

use crate::cli::args::{
    Args, Commands, ConnectionCommands, DiagCommands, FailoverCommands, HealthCommands,
    ProfileCommands,
};
use crate::core::diagnostics::{PingParams, TracerouteParams};
use crate::logger::{self, LogLevel};
use crate::manager::Manager;
use crate::state::failover::FailoverThresholds;
use crate::state::health::HealthThresholds;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one CLI command against a freshly opened control plane.
pub fn handle(args: Args) -> Result<()> {
    logger::set_verbose(args.verbose);
    if let Some(log_file) = &args.log_file {
        logger::init_file(log_file)?;
    }

    let manager = Manager::new(&args.profiles_dir, &args.state_dir)?;

    match args.command {
        Commands::Profile { command } => handle_profile(&manager, command),
        Commands::Connection { command } => handle_connection(&manager, command),
        Commands::Failover { command } => handle_failover(&manager, command),
        Commands::Health { command } => handle_health(&manager, command),
        Commands::Diag { command } => handle_diag(&manager, command),
        Commands::Run { interval_seconds } => run_foreground(&manager, &args.profiles_dir, interval_seconds),
    }
}

fn handle_profile(manager: &Manager, command: ProfileCommands) -> Result<()> {
    match command {
        ProfileCommands::List => print_json(&manager.profiles()?),
        ProfileCommands::Get { id } => print_json(&manager.profile(&id)?),
        ProfileCommands::Import { source, name } => {
            let profile = if source.starts_with("http://") || source.starts_with("https://") {
                manager.import_profile_url(&source, name.as_deref())?
            } else {
                manager.import_profile(Path::new(&source), name.as_deref())?
            };
            println!(
                "Imported profile: {} (id: {}, validated: {})",
                profile.name, profile.id, profile.validated
            );
            if let Some(error) = &profile.validation_error {
                println!("Validation error: {error}");
            }
            Ok(())
        }
        ProfileCommands::Delete { id } => {
            manager.delete_profile(&id)?;
            println!("Profile deleted: {id}");
            Ok(())
        }
        ProfileCommands::Export { id, output } => match output {
            Some(path) => {
                let mut file = fs::File::create(&path)?;
                manager.export_profile(&id, &mut file)?;
                println!("Exported to {}", path.display());
                Ok(())
            }
            None => {
                let mut stdout = std::io::stdout();
                manager.export_profile(&id, &mut stdout)?;
                Ok(())
            }
        },
        ProfileCommands::Validate { id } => print_json(&manager.validate_profile(&id)?),
    }
}

fn handle_connection(manager: &Manager, command: ConnectionCommands) -> Result<()> {
    match command {
        ConnectionCommands::Status => print_json(&manager.connection_status()?),
        ConnectionCommands::Connect { id } => {
            manager.connect(&id)?;
            println!("Connection initiated for profile {id}");
            Ok(())
        }
        ConnectionCommands::ConnectFailover => {
            let id = manager.connect_with_failover()?;
            println!("Failover connection initiated for profile {id}");
            Ok(())
        }
        ConnectionCommands::Disconnect => {
            let record = manager.disconnect()?;
            println!(
                "Disconnected from {} after {} seconds",
                record.profile_name, record.duration_seconds
            );
            Ok(())
        }
        ConnectionCommands::History => print_json(&manager.connection_history()?),
    }
}

fn handle_failover(manager: &Manager, command: FailoverCommands) -> Result<()> {
    match command {
        FailoverCommands::Enable {
            ids,
            max_latency_ms,
            max_packet_loss,
            max_connection_time,
            max_failed_attempts,
        } => {
            let overridden = max_latency_ms.is_some()
                || max_packet_loss.is_some()
                || max_connection_time.is_some()
                || max_failed_attempts.is_some();
            let thresholds = overridden.then(|| {
                let defaults = FailoverThresholds::default();
                FailoverThresholds {
                    max_latency_ms: max_latency_ms.unwrap_or(defaults.max_latency_ms),
                    max_packet_loss_percent: max_packet_loss
                        .unwrap_or(defaults.max_packet_loss_percent),
                    max_connection_time_seconds: max_connection_time
                        .unwrap_or(defaults.max_connection_time_seconds),
                    max_failed_attempts: max_failed_attempts
                        .unwrap_or(defaults.max_failed_attempts),
                    health_check_interval_seconds: defaults.health_check_interval_seconds,
                }
            });
            manager.enable_failover(&ids, thresholds)?;
            println!("Failover enabled with {} profiles", ids.len());
            Ok(())
        }
        FailoverCommands::Disable => {
            manager.disable_failover()?;
            println!("Failover disabled");
            Ok(())
        }
        FailoverCommands::Status => print_json(&manager.failover_status()?),
        FailoverCommands::Trigger => {
            let id = manager.trigger_failover()?;
            println!("Switched over to profile {id}");
            Ok(())
        }
        FailoverCommands::ResetAttempts => {
            manager.reset_failover_attempts()?;
            println!("Connection attempt counters reset");
            Ok(())
        }
    }
}

fn handle_health(manager: &Manager, command: HealthCommands) -> Result<()> {
    match command {
        HealthCommands::Current => match manager.current_health()? {
            Some(snapshot) => print_json(&snapshot),
            None => {
                println!("No health data available - monitoring may not be started");
                Ok(())
            }
        },
        HealthCommands::Summary => print_json(&manager.health_summary()?),
        HealthCommands::History { minutes } => print_json(&manager.health_history(minutes)?),
        HealthCommands::GetThresholds => print_json(&manager.health_thresholds()?),
        HealthCommands::SetThresholds {
            max_latency_ms,
            max_packet_loss,
            min_throughput_mbps,
        } => {
            let current = manager.health_thresholds()?;
            manager.set_health_thresholds(HealthThresholds {
                max_latency_ms: max_latency_ms.unwrap_or(current.max_latency_ms),
                max_packet_loss_percent: max_packet_loss
                    .unwrap_or(current.max_packet_loss_percent),
                min_throughput_mbps: min_throughput_mbps.unwrap_or(current.min_throughput_mbps),
                max_reconnect_count: current.max_reconnect_count,
            })?;
            println!("Health thresholds updated");
            Ok(())
        }
        HealthCommands::Start { interval_seconds } => {
            manager.start_monitoring(interval_seconds.map(Duration::from_secs));
            println!("Health monitoring started");
            Ok(())
        }
        HealthCommands::Stop => {
            manager.stop_monitoring();
            println!("Health monitoring stopped");
            Ok(())
        }
    }
}

fn handle_diag(manager: &Manager, command: DiagCommands) -> Result<()> {
    match command {
        DiagCommands::Ping { host, count, timeout } => {
            let params = (count.is_some() || timeout.is_some()).then(|| {
                let defaults = PingParams::default();
                PingParams {
                    count: count.unwrap_or(defaults.count),
                    timeout_seconds: timeout.unwrap_or(defaults.timeout_seconds),
                    ..defaults
                }
            });
            print_json(&manager.ping(&host, params)?)
        }
        DiagCommands::Traceroute {
            host,
            max_hops,
            timeout,
        } => {
            let params = (max_hops.is_some() || timeout.is_some()).then(|| {
                let defaults = TracerouteParams::default();
                TracerouteParams {
                    max_hops: max_hops.unwrap_or(defaults.max_hops),
                    timeout_seconds: timeout.unwrap_or(defaults.timeout_seconds),
                    ..defaults
                }
            });
            print_json(&manager.traceroute(&host, params)?)
        }
        DiagCommands::Bandwidth { url, duration } => {
            print_json(&manager.bandwidth(url.as_deref(), duration)?)
        }
        DiagCommands::Dns {
            hostname,
            server,
            record_type,
        } => print_json(&manager.dns(&hostname, server.as_deref(), record_type.as_deref())?),
        DiagCommands::Results => print_json(&manager.diagnostic_results()?),
        DiagCommands::Result { key } => print_json(&manager.diagnostic_result(&key)?),
    }
}

/// Foreground mode: import any loose `.ovpn` files dropped into the
/// profiles directory, start monitoring, and park.
fn run_foreground(
    manager: &Manager,
    profiles_dir: &Path,
    interval_seconds: Option<u64>,
) -> Result<()> {
    bootstrap_import(manager, profiles_dir);
    manager.start_monitoring(interval_seconds.map(Duration::from_secs));
    logger::log(
        LogLevel::Info,
        "MAIN",
        format!(
            "{} v{} running; {} profiles loaded",
            crate::constants::APP_NAME,
            crate::constants::APP_VERSION,
            manager.profiles().map(|p| p.len()).unwrap_or(0)
        ),
    );

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

/// Import `.ovpn` files found next to the profile records, skipping sources
/// that already have a record.
fn bootstrap_import(manager: &Manager, profiles_dir: &Path) {
    let known_sources: Vec<String> = manager
        .profiles()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.source_file)
        .collect();

    let Ok(entries) = fs::read_dir(profiles_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ovpn") {
            continue;
        }
        let source = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if known_sources.contains(&source) {
            continue;
        }
        match manager.import_profile(&path, None) {
            Ok(profile) => logger::log(
                LogLevel::Info,
                "MAIN",
                format!(
                    "imported {} (validated: {})",
                    profile.name, profile.validated
                ),
            ),
            Err(e) => logger::log(
                LogLevel::Warning,
                "MAIN",
                format!("failed to import {}: {e}", path.display()),
            ),
        }
    }
}
