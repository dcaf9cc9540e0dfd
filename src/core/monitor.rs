//! Tunnel health monitoring.
//!
//! A background loop samples the active connection at a fixed interval:
//! process liveness, status-file fields, interface detection, latency and
//! packet loss via `ping`, throughput from interface byte counters, DNS
//! health, and tunnel stability. Snapshots land in a sliding window sized to
//! 24 hours; threshold violations become alerts; the failover triggers are
//! evaluated at the end of every tick.
//!
//! The supervisor lock is held only to read and fold back observations —
//! never across a subprocess invocation.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::constants;
use crate::core::process::{self, ProcessDriver};
use crate::core::store::ProfileStore;
use crate::core::supervisor::Supervisor;
use crate::logger::{self, LogLevel};
use crate::state::connection::{Connection, ConnectionState};
use crate::state::health::{
    HealthAlert, HealthSnapshot, HealthSummary, HealthThresholds, OverallStatus,
    PerformanceTrends, Throughput, Trend,
};
use crate::utils;

/// Snapshot window, alerts, thresholds and loop control.
pub struct HealthMonitor {
    history: VecDeque<HealthSnapshot>,
    alerts: VecDeque<HealthAlert>,
    thresholds: HealthThresholds,
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    loop_generation: u64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
            alerts: VecDeque::new(),
            thresholds: HealthThresholds::default(),
            interval: constants::MONITOR_INTERVAL,
            stop_tx: None,
            loop_generation: 0,
        }
    }

    /// Set the probe interval, clamped to the 10-second floor.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(constants::MONITOR_INTERVAL_FLOOR);
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: HealthThresholds) {
        self.thresholds = thresholds;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Install the loop's stop channel. Returns the loop generation, or
    /// `None` when a loop is already running (start is idempotent).
    pub(crate) fn attach_loop(&mut self, stop_tx: Sender<()>) -> Option<u64> {
        if self.stop_tx.is_some() {
            return None;
        }
        self.loop_generation += 1;
        self.stop_tx = Some(stop_tx);
        Some(self.loop_generation)
    }

    /// Signal the loop to stop at the next tick boundary.
    pub fn request_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Loop-exit cleanup. The generation guard keeps an outgoing loop from
    /// detaching a successor that started in the meantime.
    pub(crate) fn clear_loop(&mut self, generation: u64) {
        if self.loop_generation == generation {
            self.stop_tx = None;
        }
    }

    #[must_use]
    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.history.back()
    }

    /// Snapshots newer than `minutes` ago, oldest first.
    #[must_use]
    pub fn history_since(&self, minutes: i64) -> Vec<HealthSnapshot> {
        let minutes = if minutes <= 0 { 60 } else { minutes };
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        self.history
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Window capacity: one day of snapshots at the current interval,
    /// never more than the hard cap.
    #[must_use]
    pub fn window_cap(&self) -> usize {
        let secs = self.interval.as_secs().max(1);
        let per_day = constants::SNAPSHOT_WINDOW_SECS.div_ceil(secs) as usize;
        per_day.min(constants::SNAPSHOT_CAP).max(1)
    }

    /// Append a snapshot, trim the window, and record any alerts.
    pub fn push_snapshot(&mut self, snapshot: HealthSnapshot) {
        self.check_alerts(&snapshot);
        self.history.push_back(snapshot);
        let cap = self.window_cap();
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    fn check_alerts(&mut self, snapshot: &HealthSnapshot) {
        if !snapshot.connected {
            return;
        }

        let t = self.thresholds;
        if snapshot.latency_ms > t.max_latency_ms {
            self.record_alert(
                "latency",
                snapshot.latency_ms,
                t.max_latency_ms,
                format!(
                    "high latency: {:.1} ms (threshold {:.1} ms)",
                    snapshot.latency_ms, t.max_latency_ms
                ),
            );
        }
        if snapshot.packet_loss_percent > t.max_packet_loss_percent {
            self.record_alert(
                "packet_loss",
                snapshot.packet_loss_percent,
                t.max_packet_loss_percent,
                format!(
                    "high packet loss: {:.1}% (threshold {:.1}%)",
                    snapshot.packet_loss_percent, t.max_packet_loss_percent
                ),
            );
        }
        let avg_throughput =
            (snapshot.throughput.download_speed_mbps + snapshot.throughput.upload_speed_mbps) / 2.0;
        if avg_throughput > 0.0 && avg_throughput < t.min_throughput_mbps {
            self.record_alert(
                "throughput",
                avg_throughput,
                t.min_throughput_mbps,
                format!(
                    "low throughput: {avg_throughput:.2} Mbps (threshold {:.2} Mbps)",
                    t.min_throughput_mbps
                ),
            );
        }
    }

    fn record_alert(&mut self, kind: &str, value: f64, threshold: f64, message: String) {
        logger::log(LogLevel::Warning, "HEALTH", &message);
        let severity = if threshold > 0.0 && value > threshold * 2.0 {
            "critical"
        } else {
            "warning"
        };
        self.alerts.push_back(HealthAlert {
            timestamp: Utc::now(),
            severity: severity.to_string(),
            kind: kind.to_string(),
            message,
            value,
            threshold,
        });
        while self.alerts.len() > constants::ALERT_CAP {
            self.alerts.pop_front();
        }
    }

    fn recent_alerts(&self) -> Vec<HealthAlert> {
        let cutoff = Utc::now() - chrono::Duration::minutes(constants::SUMMARY_WINDOW_MINUTES);
        self.alerts
            .iter()
            .filter(|a| a.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Aggregate the last hour of snapshots.
    #[must_use]
    pub fn summary(&self) -> HealthSummary {
        let Some(latest) = self.history.back() else {
            return HealthSummary::empty(OverallStatus::Unknown);
        };
        if !latest.connected {
            let mut summary = HealthSummary::empty(OverallStatus::Disconnected);
            summary.recent_alerts = self.recent_alerts();
            return summary;
        }

        let window = self.history_since(constants::SUMMARY_WINDOW_MINUTES);
        if window.is_empty() {
            return HealthSummary::empty(OverallStatus::Unknown);
        }

        let connected: Vec<&HealthSnapshot> = window.iter().filter(|s| s.connected).collect();
        let samples = connected.len().max(1) as f64;
        let average_latency_ms =
            connected.iter().map(|s| s.latency_ms).sum::<f64>() / samples;
        let average_packet_loss_percent =
            connected.iter().map(|s| s.packet_loss_percent).sum::<f64>() / samples;
        let average_download_mbps = connected
            .iter()
            .map(|s| s.throughput.download_speed_mbps)
            .sum::<f64>()
            / samples;
        let average_upload_mbps = connected
            .iter()
            .map(|s| s.throughput.upload_speed_mbps)
            .sum::<f64>()
            / samples;

        let t = self.thresholds;
        let overall_status = if average_latency_ms > t.max_latency_ms
            || average_packet_loss_percent > t.max_packet_loss_percent
        {
            OverallStatus::Critical
        } else if average_latency_ms > t.max_latency_ms * constants::WARNING_FRACTION
            || average_packet_loss_percent
                > t.max_packet_loss_percent * constants::WARNING_FRACTION
        {
            OverallStatus::Warning
        } else {
            OverallStatus::Healthy
        };

        HealthSummary {
            overall_status,
            last_update: Utc::now(),
            connection_uptime_seconds: latest.connection_uptime_seconds,
            success_rate_percent: connected.len() as f64 / window.len() as f64 * 100.0,
            average_latency_ms,
            average_packet_loss_percent,
            average_download_mbps,
            average_upload_mbps,
            recent_alerts: self.recent_alerts(),
            performance_trends: compute_trends(&window, &self.history),
        }
    }
}

/// Compare the first and last thirds of the summary window.
fn compute_trends(
    window: &[HealthSnapshot],
    full_history: &VecDeque<HealthSnapshot>,
) -> PerformanceTrends {
    let mut trends = PerformanceTrends::default();

    if !full_history.is_empty() {
        let up = full_history.iter().filter(|s| s.connected).count();
        trends.uptime_percentage_24h = up as f64 / full_history.len() as f64 * 100.0;
    }

    let third = window.len() / 3;
    if third == 0 {
        return trends;
    }
    let first = &window[..third];
    let last = &window[window.len() - third..];

    let avg = |slice: &[HealthSnapshot], f: fn(&HealthSnapshot) -> f64| -> f64 {
        slice.iter().map(f).sum::<f64>() / slice.len() as f64
    };

    let first_latency = avg(first, |s| s.latency_ms);
    let last_latency = avg(last, |s| s.latency_ms);
    if first_latency > 0.0 {
        trends.latency_change_percent = (last_latency - first_latency) / first_latency * 100.0;
        // Lower latency is an improvement.
        trends.latency_trend = if trends.latency_change_percent < -constants::TREND_STABLE_BAND {
            Trend::Improving
        } else if trends.latency_change_percent > constants::TREND_STABLE_BAND {
            Trend::Degrading
        } else {
            Trend::Stable
        };
    }

    let throughput_of = |s: &HealthSnapshot| {
        (s.throughput.download_speed_mbps + s.throughput.upload_speed_mbps) / 2.0
    };
    let first_throughput = avg(first, throughput_of);
    let last_throughput = avg(last, throughput_of);
    if first_throughput > 0.0 {
        trends.throughput_change_percent =
            (last_throughput - first_throughput) / first_throughput * 100.0;
        trends.throughput_trend =
            if trends.throughput_change_percent > constants::TREND_STABLE_BAND {
                Trend::Improving
            } else if trends.throughput_change_percent < -constants::TREND_STABLE_BAND {
                Trend::Degrading
            } else {
                Trend::Stable
            };
    }

    let stable_ratio = |slice: &[HealthSnapshot]| {
        slice.iter().filter(|s| s.tunnel_stable).count() as f64 / slice.len() as f64
    };
    let delta = stable_ratio(last) - stable_ratio(first);
    trends.stability_trend = if delta > 0.1 {
        Trend::Improving
    } else if delta < -0.1 {
        Trend::Degrading
    } else {
        Trend::Stable
    };

    trends
}

// ── Monitoring loop ─────────────────────────────────────────────────────────

/// Shared handles the loop and its deferred tasks operate on. Loop threads
/// hold clones; none of the components own each other.
#[derive(Clone)]
pub(crate) struct MonitorHandles {
    pub store: Arc<RwLock<ProfileStore>>,
    pub supervisor: Arc<RwLock<Supervisor>>,
    pub monitor: Arc<RwLock<HealthMonitor>>,
    pub driver: Arc<dyn ProcessDriver>,
    pub crash_failover_delay: Duration,
}

/// Loop body: tick at the configured interval until the stop signal. The
/// stop signal interrupts the tick boundary, not a probe in flight.
pub(crate) fn monitor_loop(handles: &MonitorHandles, stop_rx: &Receiver<()>, generation: u64) {
    logger::log(LogLevel::Info, "HEALTH", "monitoring started");
    loop {
        let interval = handles
            .monitor
            .read()
            .map(|m| m.interval())
            .unwrap_or(constants::MONITOR_INTERVAL);
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => run_tick(handles),
        }
    }
    if let Ok(mut monitor) = handles.monitor.write() {
        monitor.clear_loop(generation);
    }
    logger::log(LogLevel::Info, "HEALTH", "monitoring stopped");
}

/// One monitor tick.
pub(crate) fn run_tick(handles: &MonitorHandles) {
    let view = handles
        .supervisor
        .read()
        .ok()
        .and_then(|sup| sup.connection_view());

    let Some(conn) = view else {
        push_disconnected_snapshot(handles);
        return;
    };

    // Liveness probe runs unlocked; the verdict is folded back under the
    // supervisor lock.
    let probe_alive = handles.driver.is_alive(&conn.paths);
    let report = match handles.supervisor.write() {
        Ok(mut sup) => sup.observe_liveness(probe_alive),
        Err(_) => return,
    };
    if report.died {
        if let Ok(mut store) = handles.store.write() {
            store.set_active(None);
        }
        if report.failover_enabled {
            schedule_crash_failover(handles.clone());
        }
        push_disconnected_snapshot(handles);
        return;
    }

    // System observations, all unlocked.
    let status = process::read_status_file(&conn.paths.status_file);
    let interface = detect_vpn_interface();
    let counters = interface
        .as_deref()
        .and_then(read_interface_counters);

    let updated = match handles.supervisor.write() {
        Ok(mut sup) => {
            sup.apply_observation(status, interface, counters);
            sup.connection_view()
        }
        Err(_) => return,
    };
    let Some(conn) = updated else {
        return;
    };

    // Network probes against the tunnel remote, still unlocked.
    let mut warnings = Vec::new();
    let remote_host = conn
        .remote_ip
        .as_deref()
        .map(|r| r.split(':').next().unwrap_or(r).to_string());

    let mut latency_ms = 0.0;
    let mut remote_reachable = false;
    let mut packet_loss_percent = 0.0;
    if let Some(host) = &remote_host {
        match measure_latency(host) {
            Ok(ms) => {
                latency_ms = ms;
                remote_reachable = true;
            }
            Err(e) => warnings.push(format!("failed to measure latency: {e}")),
        }
        match measure_packet_loss(host) {
            Ok(loss) => packet_loss_percent = loss,
            Err(e) => warnings.push(format!("failed to measure packet loss: {e}")),
        }
    }

    let dns_resolution =
        utils::resolve_host(constants::DNS_PROBE_HOST, constants::RESOLVE_TIMEOUT).is_ok();
    if !dns_resolution {
        warnings.push("DNS resolution is not working".to_string());
    }

    let latest = {
        let Ok(mut monitor) = handles.monitor.write() else {
            return;
        };
        let previous = monitor.latest().cloned();
        let (tunnel_stable, stability_warnings) =
            check_tunnel_stability(&conn, latency_ms, previous.as_ref());
        warnings.extend(stability_warnings);

        let snapshot = HealthSnapshot {
            timestamp: Utc::now(),
            connected: conn.state == ConnectionState::Connected,
            profile_id: Some(conn.profile_id.clone()),
            profile_name: Some(conn.profile_name.clone()),
            connection_uptime_seconds: conn.uptime_seconds(),
            local_ip: conn.local_ip.clone(),
            remote_ip: conn.remote_ip.clone(),
            interface: conn.interface.clone(),
            latency_ms,
            packet_loss_percent,
            throughput: Throughput::from_counters(
                conn.bytes_in,
                conn.bytes_out,
                previous.as_ref().map(|s| &s.throughput),
                monitor.interval().as_secs(),
            ),
            dns_resolution,
            remote_reachable,
            tunnel_stable,
            errors: Vec::new(),
            warnings,
        };
        monitor.push_snapshot(snapshot);
        monitor.latest().cloned()
    };

    evaluate_failover(handles, latest.as_ref());
}

fn push_disconnected_snapshot(handles: &MonitorHandles) {
    if let Ok(mut monitor) = handles.monitor.write() {
        monitor.push_snapshot(HealthSnapshot {
            timestamp: Utc::now(),
            ..HealthSnapshot::default()
        });
    }
}

/// Check the failover triggers and run a switchover when one fires.
fn evaluate_failover(handles: &MonitorHandles, latest: Option<&HealthSnapshot>) {
    let reason = handles
        .supervisor
        .read()
        .ok()
        .and_then(|sup| sup.check_failover_conditions(latest));
    let Some(reason) = reason else {
        return;
    };

    logger::log(
        LogLevel::Warning,
        "FAILOVER",
        format!("conditions met: {reason}"),
    );
    let ranked = ranked_profiles(handles);
    let switched = match handles.supervisor.write() {
        Ok(mut sup) => match sup.perform_failover(&ranked) {
            Ok(id) => Some(id),
            Err(e) => {
                logger::log(LogLevel::Warning, "FAILOVER", format!("attempt failed: {e}"));
                None
            }
        },
        Err(_) => None,
    };
    if let Some(id) = switched {
        if let Ok(mut store) = handles.store.write() {
            store.set_active(Some(&id));
        }
    }
}

/// Resolve the ranked failover profile ids into profile clones. The store
/// lock is released before any supervisor lock is taken.
pub(crate) fn ranked_profiles(handles: &MonitorHandles) -> Vec<crate::state::profile::VpnProfile> {
    let ids = handles
        .supervisor
        .read()
        .map(|sup| sup.failover_state().profiles.clone())
        .unwrap_or_default();
    let Ok(store) = handles.store.read() else {
        return Vec::new();
    };
    ids.iter().filter_map(|id| store.get(id).cloned()).collect()
}

/// Deferred failover after a process death: wait, re-check the supervisor
/// (a user-initiated connect in between cancels the attempt), then walk the
/// ring.
fn schedule_crash_failover(handles: MonitorHandles) {
    logger::log(
        LogLevel::Info,
        "FAILOVER",
        "scheduling automatic failover after process death",
    );
    thread::spawn(move || {
        thread::sleep(handles.crash_failover_delay);

        let reconnected = handles
            .supervisor
            .read()
            .map(|sup| sup.status().state.is_live())
            .unwrap_or(true);
        if reconnected {
            logger::log(
                LogLevel::Info,
                "FAILOVER",
                "connection re-established; skipping deferred failover",
            );
            return;
        }

        let ranked = ranked_profiles(&handles);
        let switched = match handles.supervisor.write() {
            Ok(mut sup) => match sup.perform_failover(&ranked) {
                Ok(id) => {
                    logger::log(
                        LogLevel::Info,
                        "FAILOVER",
                        format!("automatic failover connected {id}"),
                    );
                    Some(id)
                }
                Err(e) => {
                    logger::log(
                        LogLevel::Warning,
                        "FAILOVER",
                        format!("automatic failover failed: {e}"),
                    );
                    None
                }
            },
            Err(_) => None,
        };
        if let Some(id) = switched {
            if let Ok(mut store) = handles.store.write() {
                store.set_active(Some(&id));
            }
        }
    });
}

// ── Probes ──────────────────────────────────────────────────────────────────

/// Average RTT from `ping -c 3 -W 3`.
fn measure_latency(host: &str) -> Result<f64, String> {
    let count = constants::LATENCY_PING_COUNT;
    let output = ping_output(host, count)?;
    parse_latency_output(&output).ok_or_else(|| "could not parse ping output".to_string())
}

/// Loss percentage from `ping -c 10 -W 3`.
fn measure_packet_loss(host: &str) -> Result<f64, String> {
    let output = ping_output(host, constants::LOSS_PING_COUNT)?;
    parse_loss_output(&output).ok_or_else(|| "could not parse ping output".to_string())
}

fn ping_output(host: &str, count: u32) -> Result<String, String> {
    let deadline =
        Duration::from_secs(u64::from(count * constants::PING_WAIT_SECS) + 10);
    let output = utils::run_command(
        "ping",
        &[
            "-c",
            &count.to_string(),
            "-W",
            &constants::PING_WAIT_SECS.to_string(),
            host,
        ],
        deadline,
    )
    .map_err(|e| e.to_string())?;
    // ping exits non-zero on loss; the summary lines are still present.
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Extract avg from the `min/avg/max` summary line.
fn parse_latency_output(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.contains("min/avg/max") {
            let values = line.split('=').nth(1)?;
            let avg = values.trim().split('/').nth(1)?;
            return avg.trim().parse::<f64>().ok();
        }
    }
    None
}

/// Extract the `N% packet loss` token.
fn parse_loss_output(output: &str) -> Option<f64> {
    for line in output.lines() {
        if line.contains("packet loss") {
            for token in line.split_whitespace() {
                if let Some(percent) = token.strip_suffix('%') {
                    return percent.parse::<f64>().ok();
                }
            }
        }
    }
    None
}

/// First tun/tap-prefixed interface in `ip link show` / `ip route show`.
fn detect_vpn_interface() -> Option<String> {
    for args in [["link", "show"], ["route", "show"]] {
        let Some(output) = utils::cmd_stdout("ip", &args, constants::PROBE_COMMAND_TIMEOUT) else {
            continue;
        };
        for line in output.lines() {
            for token in line.split_whitespace() {
                let name = token.trim_end_matches(':');
                if name.starts_with("tun") || name.starts_with("tap") {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

/// Cumulative byte counters from sysfs.
fn read_interface_counters(interface: &str) -> Option<(u64, u64)> {
    let base = format!("/sys/class/net/{interface}/statistics");
    let read = |name: &str| -> Option<u64> {
        std::fs::read_to_string(format!("{base}/{name}"))
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
    };
    Some((read("rx_bytes")?, read("tx_bytes")?))
}

/// Stability verdict: false when an endpoint IP changed or latency spiked
/// past 3x the previous sample; true on the first snapshot.
fn check_tunnel_stability(
    conn: &Connection,
    latency_ms: f64,
    previous: Option<&HealthSnapshot>,
) -> (bool, Vec<String>) {
    let Some(prev) = previous else {
        return (true, Vec::new());
    };

    let mut warnings = Vec::new();
    let mut stable = true;

    if prev.local_ip.is_some() && conn.local_ip != prev.local_ip {
        warnings.push("local IP address changed unexpectedly".to_string());
        stable = false;
    }
    if prev.remote_ip.is_some() && conn.remote_ip != prev.remote_ip {
        warnings.push("remote IP address changed unexpectedly".to_string());
        stable = false;
    }
    if prev.latency_ms > 0.0 && latency_ms > prev.latency_ms * constants::LATENCY_SPIKE_FACTOR {
        warnings.push("significant latency spike detected".to_string());
        stable = false;
    }

    (stable, warnings)
}

/// Spawn the monitoring loop. Returns false when one is already running.
pub(crate) fn start(handles: MonitorHandles) -> bool {
    let (tx, rx) = mpsc::channel();
    let generation = {
        let Ok(mut monitor) = handles.monitor.write() else {
            return false;
        };
        match monitor.attach_loop(tx) {
            Some(generation) => generation,
            None => return false,
        }
    };
    thread::spawn(move || monitor_loop(&handles, &rx, generation));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::supervisor::test_driver::FakeDriver;
    use crate::state::profile::{Remote, VpnProfile};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const PING_OUTPUT: &str = "\
PING 10.8.0.1 (10.8.0.1) 56(84) bytes of data.
64 bytes from 10.8.0.1: icmp_seq=1 ttl=64 time=12.3 ms
64 bytes from 10.8.0.1: icmp_seq=2 ttl=64 time=14.1 ms
64 bytes from 10.8.0.1: icmp_seq=3 ttl=64 time=13.2 ms

--- 10.8.0.1 ping statistics ---
3 packets transmitted, 3 received, 0% packet loss, time 2003ms
rtt min/avg/max/mdev = 12.300/13.200/14.100/0.736 ms
";

    fn snapshot(connected: bool, latency: f64) -> HealthSnapshot {
        HealthSnapshot {
            timestamp: Utc::now(),
            connected,
            latency_ms: latency,
            tunnel_stable: true,
            ..HealthSnapshot::default()
        }
    }

    #[test]
    fn test_parse_latency_output() {
        assert_eq!(parse_latency_output(PING_OUTPUT), Some(13.2));
        assert_eq!(parse_latency_output("no summary here"), None);
    }

    #[test]
    fn test_parse_loss_output() {
        assert_eq!(parse_loss_output(PING_OUTPUT), Some(0.0));
        let lossy = "10 packets transmitted, 7 received, 30% packet loss, time 9010ms";
        assert_eq!(parse_loss_output(lossy), Some(30.0));
        assert_eq!(parse_loss_output("garbage"), None);
    }

    #[test]
    fn test_interval_floor_enforced() {
        let mut monitor = HealthMonitor::new();
        monitor.set_interval(Duration::from_secs(5));
        assert_eq!(monitor.interval(), constants::MONITOR_INTERVAL_FLOOR);
        monitor.set_interval(Duration::from_secs(60));
        assert_eq!(monitor.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_window_cap_tracks_interval() {
        let mut monitor = HealthMonitor::new();
        assert_eq!(monitor.window_cap(), 2880);
        monitor.set_interval(Duration::from_secs(60));
        assert_eq!(monitor.window_cap(), 1440);
        // The floor keeps the cap at the hard ceiling.
        monitor.set_interval(Duration::from_secs(10));
        assert_eq!(monitor.window_cap(), constants::SNAPSHOT_CAP);
    }

    #[test]
    fn test_window_trims_oldest() {
        let mut monitor = HealthMonitor::new();
        monitor.set_interval(Duration::from_secs(60));
        for _ in 0..1500 {
            monitor.push_snapshot(snapshot(true, 10.0));
        }
        assert_eq!(monitor.history_since(24 * 60).len(), 1440);
    }

    #[test]
    fn test_alert_on_latency_breach() {
        let mut monitor = HealthMonitor::new();
        monitor.push_snapshot(snapshot(true, 250.0));
        let alerts = monitor.recent_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "latency");
        assert_eq!(alerts[0].severity, "warning");
    }

    #[test]
    fn test_alert_severity_critical_past_double() {
        let mut monitor = HealthMonitor::new();
        monitor.push_snapshot(snapshot(true, 500.0));
        assert_eq!(monitor.recent_alerts()[0].severity, "critical");
    }

    #[test]
    fn test_no_alerts_when_disconnected() {
        let mut monitor = HealthMonitor::new();
        monitor.push_snapshot(snapshot(false, 999.0));
        assert!(monitor.recent_alerts().is_empty());
    }

    #[test]
    fn test_summary_unknown_without_data() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.summary().overall_status, OverallStatus::Unknown);
    }

    #[test]
    fn test_summary_disconnected() {
        let mut monitor = HealthMonitor::new();
        monitor.push_snapshot(snapshot(false, 0.0));
        assert_eq!(
            monitor.summary().overall_status,
            OverallStatus::Disconnected
        );
    }

    #[test]
    fn test_summary_statuses_by_average_latency() {
        let mut monitor = HealthMonitor::new();
        for _ in 0..10 {
            monitor.push_snapshot(snapshot(true, 20.0));
        }
        assert_eq!(monitor.summary().overall_status, OverallStatus::Healthy);

        let mut monitor = HealthMonitor::new();
        for _ in 0..10 {
            monitor.push_snapshot(snapshot(true, 170.0));
        }
        assert_eq!(monitor.summary().overall_status, OverallStatus::Warning);

        let mut monitor = HealthMonitor::new();
        for _ in 0..10 {
            monitor.push_snapshot(snapshot(true, 400.0));
        }
        assert_eq!(monitor.summary().overall_status, OverallStatus::Critical);
    }

    #[test]
    fn test_summary_success_rate() {
        let mut monitor = HealthMonitor::new();
        for i in 0..10 {
            monitor.push_snapshot(snapshot(i % 2 == 0, 20.0));
        }
        // Latest snapshot must be connected for a non-disconnected summary.
        monitor.push_snapshot(snapshot(true, 20.0));
        let summary = monitor.summary();
        assert!((summary.success_rate_percent - 6.0 / 11.0 * 100.0).abs() < 0.01);
    }

    #[test]
    fn test_trends_degrading_latency() {
        let mut monitor = HealthMonitor::new();
        for _ in 0..5 {
            monitor.push_snapshot(snapshot(true, 20.0));
        }
        for _ in 0..5 {
            monitor.push_snapshot(snapshot(true, 30.0));
        }
        for _ in 0..5 {
            monitor.push_snapshot(snapshot(true, 90.0));
        }
        let trends = monitor.summary().performance_trends;
        assert_eq!(trends.latency_trend, Trend::Degrading);
        assert!(trends.latency_change_percent > 100.0);
        assert!((trends.uptime_percentage_24h - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tunnel_stability_rules() {
        let paths =
            crate::state::connection::RunPaths::for_profile(std::path::Path::new("/tmp"), "p");
        let mut conn = Connection::new("p".into(), "p".into(), paths);
        conn.local_ip = Some("10.8.0.2".into());
        conn.remote_ip = Some("198.51.100.4".into());

        // First snapshot: stable by definition.
        let (stable, warnings) = check_tunnel_stability(&conn, 20.0, None);
        assert!(stable && warnings.is_empty());

        let mut prev = snapshot(true, 20.0);
        prev.local_ip = Some("10.8.0.2".into());
        prev.remote_ip = Some("198.51.100.4".into());

        // Unchanged endpoints, sane latency.
        let (stable, _) = check_tunnel_stability(&conn, 25.0, Some(&prev));
        assert!(stable);

        // Local IP changed.
        conn.local_ip = Some("10.8.0.9".into());
        let (stable, warnings) = check_tunnel_stability(&conn, 25.0, Some(&prev));
        assert!(!stable);
        assert!(warnings[0].contains("local IP"));
        conn.local_ip = Some("10.8.0.2".into());

        // Latency spike past 3x.
        let (stable, warnings) = check_tunnel_stability(&conn, 70.0, Some(&prev));
        assert!(!stable);
        assert!(warnings[0].contains("latency spike"));
    }

    // ── Tick integration with a scripted driver ─────────────────────────────

    fn test_handles() -> (MonitorHandles, Arc<FakeDriver>, TempDir, TempDir) {
        let profile_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::default());
        let driver_dyn: Arc<dyn ProcessDriver> = driver.clone();

        let store = ProfileStore::new(profile_dir.path()).unwrap();
        let supervisor = Supervisor::new(state_dir.path(), driver_dyn.clone()).unwrap();

        let handles = MonitorHandles {
            store: Arc::new(RwLock::new(store)),
            supervisor: Arc::new(RwLock::new(supervisor)),
            monitor: Arc::new(RwLock::new(HealthMonitor::new())),
            driver: driver_dyn,
            crash_failover_delay: Duration::from_millis(50),
        };
        (handles, driver, profile_dir, state_dir)
    }

    fn validated_profile(id: &str) -> VpnProfile {
        let mut p = VpnProfile::new(id.to_string(), id.to_string(), format!("{id}.ovpn"));
        p.remotes.push(Remote {
            host: "203.0.113.10".into(),
            port: 1194,
        });
        p.validated = true;
        p
    }

    #[test]
    fn test_tick_records_disconnected_snapshot_when_idle() {
        let (handles, _driver, _pd, _sd) = test_handles();
        run_tick(&handles);
        let monitor = handles.monitor.read().unwrap();
        let latest = monitor.latest().unwrap();
        assert!(!latest.connected);
    }

    #[test]
    fn test_crash_triggers_deferred_failover_to_next_profile() {
        let (handles, driver, _pd, _sd) = test_handles();
        let p1 = validated_profile("p1_1");
        let p2 = validated_profile("p2_1");
        {
            let mut store = handles.store.write().unwrap();
            store.insert(p1.clone());
            store.insert(p2.clone());
        }
        {
            let mut sup = handles.supervisor.write().unwrap();
            sup.enable_failover(vec![p1.id.clone(), p2.id.clone()], None);
            sup.connect(&p1).unwrap();
            sup.apply_observation(None, Some("tun0".into()), None);
        }

        // The process dies.
        driver.alive.store(false, Ordering::SeqCst);
        run_tick(&handles);

        {
            let sup = handles.supervisor.read().unwrap();
            let history = sup.history();
            assert_eq!(
                history.last().unwrap().disconnect_reason,
                crate::state::connection::DisconnectReason::ProcessDied
            );
        }

        // The deferred attempt fires after the crash delay.
        thread::sleep(Duration::from_millis(500));
        let sup = handles.supervisor.read().unwrap();
        let status = sup.status();
        assert_eq!(status.profile_id.as_deref(), Some("p2_1"));
        assert_eq!(status.state, ConnectionState::Connecting);
    }

    #[test]
    fn test_deferred_failover_cancelled_by_user_reconnect() {
        let (handles, driver, _pd, _sd) = test_handles();
        let p1 = validated_profile("p1_1");
        let p2 = validated_profile("p2_1");
        {
            let mut store = handles.store.write().unwrap();
            store.insert(p1.clone());
            store.insert(p2.clone());
        }
        {
            let mut sup = handles.supervisor.write().unwrap();
            sup.enable_failover(vec![p1.id.clone(), p2.id.clone()], None);
            sup.connect(&p1).unwrap();
        }

        driver.alive.store(false, Ordering::SeqCst);
        run_tick(&handles);

        // User reconnects to p1 before the deferred task fires.
        {
            let mut sup = handles.supervisor.write().unwrap();
            sup.connect(&p1).unwrap();
        }
        thread::sleep(Duration::from_millis(500));

        let sup = handles.supervisor.read().unwrap();
        assert_eq!(sup.status().profile_id.as_deref(), Some("p1_1"));
    }
}
