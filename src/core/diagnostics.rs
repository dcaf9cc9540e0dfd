//! On-demand network diagnostics.
//!
//! Ping, traceroute, bandwidth and DNS probes parameterized by caller input
//! with defaults filled in. Each probe records a [`DiagnosticResult`] keyed
//! by `(test, target, start-unix-seconds)` into a bounded map; when the map
//! would exceed its cap the entry with the smallest start time is evicted.

use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Error, Result};
use crate::logger::{self, LogLevel};
use crate::utils;

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingParams {
    pub count: u32,
    pub timeout_seconds: u32,
    pub interval_seconds: f64,
    pub packet_size: u32,
}

impl Default for PingParams {
    fn default() -> Self {
        Self {
            count: constants::DIAG_PING_COUNT,
            timeout_seconds: constants::DIAG_PING_TIMEOUT_SECS,
            interval_seconds: constants::DIAG_PING_INTERVAL_SECS,
            packet_size: constants::DIAG_PING_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TracerouteParams {
    pub max_hops: u32,
    pub timeout_seconds: u32,
    pub queries_per_hop: u32,
}

impl Default for TracerouteParams {
    fn default() -> Self {
        Self {
            max_hops: constants::DIAG_TRACEROUTE_MAX_HOPS,
            timeout_seconds: constants::DIAG_TRACEROUTE_TIMEOUT_SECS,
            queries_per_hop: constants::DIAG_TRACEROUTE_QUERIES,
        }
    }
}

/// Echo of the parameters a probe actually ran with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum DiagnosticParams {
    Ping(PingParams),
    Traceroute(TracerouteParams),
    Bandwidth {
        test_url: String,
        duration_seconds: u64,
    },
    Dns {
        dns_server: String,
        record_type: String,
    },
}

// ── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReport {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: f64,
    pub min_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub stddev_rtt_ms: f64,
    pub rtts_ms: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracerouteHop {
    pub hop_number: u32,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub rtts_ms: Vec<f64>,
    pub avg_rtt_ms: f64,
    pub timeout: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracerouteReport {
    pub target: String,
    pub hops: Vec<TracerouteHop>,
    pub completed: bool,
    pub max_hops: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub download_speed_mbps: f64,
    pub test_server: String,
    pub data_transferred_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsReport {
    pub hostname: String,
    pub ips: Vec<String>,
    pub response_time_ms: f64,
    pub dns_server: String,
    pub record_type: String,
}

/// Typed probe payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticData {
    Ping(PingReport),
    Traceroute(TracerouteReport),
    Bandwidth(BandwidthReport),
    Dns(DnsReport),
}

/// One recorded probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub test_type: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub parameters: DiagnosticParams,
    pub data: Option<DiagnosticData>,
}

impl DiagnosticResult {
    /// Retrieval key: `(test, target, start-unix-seconds)`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.test_type,
            self.target,
            self.started_at.timestamp()
        )
    }
}

// ── Diagnostics service ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct Diagnostics {
    results: HashMap<String, DiagnosticResult>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `ping` and parse per-packet RTTs plus the summary statistics.
    pub fn ping(&mut self, host: &str, params: Option<PingParams>) -> DiagnosticResult {
        let params = params.unwrap_or_default();
        let started_at = Utc::now();
        let start = Instant::now();

        let deadline = Duration::from_secs(
            u64::from(params.count) * u64::from(params.timeout_seconds) + 10,
        );
        let outcome = utils::run_command(
            "ping",
            &[
                "-c",
                &params.count.to_string(),
                "-W",
                &params.timeout_seconds.to_string(),
                "-i",
                &format!("{:.1}", params.interval_seconds),
                "-s",
                &params.packet_size.to_string(),
                host,
            ],
            deadline,
        );

        let mut result = self.result_skeleton(
            "ping",
            host,
            started_at,
            start,
            DiagnosticParams::Ping(params),
        );
        match outcome {
            Ok(output) if output.status.success() => {
                match parse_ping_output(&String::from_utf8_lossy(&output.stdout)) {
                    Some(report) => {
                        result.success = true;
                        result.data = Some(DiagnosticData::Ping(report));
                    }
                    None => result.error = Some("failed to parse ping output".to_string()),
                }
            }
            Ok(output) => {
                result.error = Some(format!("ping command failed: {}", output.status));
            }
            Err(e) => result.error = Some(e.to_string()),
        }

        self.store(result.clone());
        result
    }

    /// Wrap `traceroute` and parse its hop table.
    pub fn traceroute(
        &mut self,
        host: &str,
        params: Option<TracerouteParams>,
    ) -> DiagnosticResult {
        let params = params.unwrap_or_default();
        let started_at = Utc::now();
        let start = Instant::now();

        let deadline = Duration::from_secs(
            u64::from(params.max_hops)
                * u64::from(params.timeout_seconds)
                * u64::from(params.queries_per_hop)
                + 30,
        );
        let outcome = utils::run_command(
            "traceroute",
            &[
                "-m",
                &params.max_hops.to_string(),
                "-w",
                &params.timeout_seconds.to_string(),
                "-q",
                &params.queries_per_hop.to_string(),
                host,
            ],
            deadline,
        );

        let mut result = self.result_skeleton(
            "traceroute",
            host,
            started_at,
            start,
            DiagnosticParams::Traceroute(params),
        );
        match outcome {
            Ok(output) if output.status.success() => {
                let mut report =
                    parse_traceroute_output(&String::from_utf8_lossy(&output.stdout));
                report.target = host.to_string();
                report.max_hops = params.max_hops;
                result.success = true;
                result.data = Some(DiagnosticData::Traceroute(report));
            }
            Ok(output) => {
                result.error = Some(format!("traceroute command failed: {}", output.status));
            }
            Err(e) => result.error = Some(e.to_string()),
        }

        self.store(result.clone());
        result
    }

    /// Download from `test_url` for at most `duration_seconds`, measuring
    /// achieved throughput.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unparsable URL; network failures
    /// are recorded on the result instead.
    pub fn bandwidth(
        &mut self,
        test_url: Option<&str>,
        duration_seconds: Option<u64>,
    ) -> Result<DiagnosticResult> {
        let test_url = test_url
            .filter(|u| !u.is_empty())
            .unwrap_or(constants::DIAG_BANDWIDTH_URL)
            .to_string();
        url::Url::parse(&test_url).map_err(|_| Error::Validation("invalid test URL".to_string()))?;
        let duration_seconds = match duration_seconds {
            Some(0) | None => constants::DIAG_BANDWIDTH_DURATION_SECS,
            Some(d) => d,
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let mut result = self.result_skeleton(
            "bandwidth",
            &test_url,
            started_at,
            start,
            DiagnosticParams::Bandwidth {
                test_url: test_url.clone(),
                duration_seconds,
            },
        );

        match run_bandwidth_probe(&test_url, duration_seconds) {
            Ok(report) => {
                result.success = true;
                result.data = Some(DiagnosticData::Bandwidth(report));
            }
            Err(e) => result.error = Some(e),
        }
        result.finished_at = Utc::now();
        result.duration_ms = start.elapsed().as_millis() as i64;

        self.store(result.clone());
        Ok(result)
    }

    /// Resolve a hostname: system resolver for `A` records, `dig` for
    /// everything else.
    pub fn dns(
        &mut self,
        hostname: &str,
        dns_server: Option<&str>,
        record_type: Option<&str>,
    ) -> DiagnosticResult {
        let dns_server = dns_server
            .filter(|s| !s.is_empty())
            .unwrap_or(constants::DIAG_DNS_SERVER)
            .to_string();
        let record_type = record_type
            .filter(|s| !s.is_empty())
            .unwrap_or("A")
            .to_uppercase();

        let started_at = Utc::now();
        let start = Instant::now();
        let mut result = self.result_skeleton(
            "dns",
            hostname,
            started_at,
            start,
            DiagnosticParams::Dns {
                dns_server: dns_server.clone(),
                record_type: record_type.clone(),
            },
        );

        if record_type == "A" {
            let resolve_start = Instant::now();
            match utils::resolve_host(hostname, constants::RESOLVE_TIMEOUT) {
                Ok(ips) => {
                    result.success = true;
                    result.data = Some(DiagnosticData::Dns(DnsReport {
                        hostname: hostname.to_string(),
                        ips: ips.iter().map(ToString::to_string).collect(),
                        response_time_ms: resolve_start.elapsed().as_secs_f64() * 1000.0,
                        dns_server: "system".to_string(),
                        record_type,
                    }));
                }
                Err(e) => result.error = Some(format!("DNS lookup failed: {e}")),
            }
        } else {
            let outcome = utils::run_command(
                "dig",
                &[
                    &format!("@{dns_server}"),
                    hostname,
                    &record_type,
                    "+short",
                    "+time=5",
                ],
                constants::DIAG_DIG_TIMEOUT,
            );
            match outcome {
                Ok(output) if output.status.success() => {
                    let records: Vec<String> = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with(';'))
                        .map(ToString::to_string)
                        .collect();
                    result.success = true;
                    result.data = Some(DiagnosticData::Dns(DnsReport {
                        hostname: hostname.to_string(),
                        ips: records,
                        response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                        dns_server,
                        record_type,
                    }));
                }
                Ok(output) => {
                    result.error = Some(format!("dig command failed: {}", output.status));
                }
                Err(e) => result.error = Some(e.to_string()),
            }
        }
        result.finished_at = Utc::now();
        result.duration_ms = start.elapsed().as_millis() as i64;

        self.store(result.clone());
        result
    }

    /// All stored results, oldest first.
    #[must_use]
    pub fn results(&self) -> Vec<DiagnosticResult> {
        let mut results: Vec<DiagnosticResult> = self.results.values().cloned().collect();
        results.sort_by_key(|r| r.started_at);
        results
    }

    #[must_use]
    pub fn result(&self, key: &str) -> Option<DiagnosticResult> {
        self.results.get(key).cloned()
    }

    fn result_skeleton(
        &self,
        test_type: &str,
        target: &str,
        started_at: DateTime<Utc>,
        start: Instant,
        parameters: DiagnosticParams,
    ) -> DiagnosticResult {
        DiagnosticResult {
            test_type: test_type.to_string(),
            target: target.to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as i64,
            success: false,
            error: None,
            parameters,
            data: None,
        }
    }

    fn store(&mut self, result: DiagnosticResult) {
        self.results.insert(result.key(), result);

        while self.results.len() > constants::DIAGNOSTIC_RESULT_CAP {
            let oldest = self
                .results
                .iter()
                .min_by_key(|(_, r)| r.started_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    logger::log(LogLevel::Debug, "DIAG", format!("evicting result {key}"));
                    self.results.remove(&key);
                }
                None => break,
            }
        }
    }
}

// ── Probe internals ─────────────────────────────────────────────────────────

fn run_bandwidth_probe(test_url: &str, duration_seconds: u64) -> std::result::Result<BandwidthReport, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(duration_seconds + 5))
        .user_agent(format!("{}/{}", constants::APP_NAME, constants::APP_VERSION))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    let start = Instant::now();
    let mut response = client
        .get(test_url)
        .send()
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("server returned {}", response.status()));
    }

    let mut buffer = [0u8; constants::DIAG_BANDWIDTH_BUF];
    let mut total_bytes: u64 = 0;
    let window = Duration::from_secs(duration_seconds);
    let read_start = Instant::now();

    loop {
        if read_start.elapsed() > window {
            break;
        }
        match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => total_bytes += n as u64,
            Err(_) => break,
        }
    }

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    Ok(BandwidthReport {
        download_speed_mbps: total_bytes as f64 * 8.0 / (elapsed * 1_000_000.0),
        test_server: test_url.to_string(),
        data_transferred_bytes: total_bytes,
    })
}

/// Parse `ping` output: per-packet RTTs, packet counts and the
/// `min/avg/max/stddev` summary. `None` when the summary is absent.
fn parse_ping_output(output: &str) -> Option<PingReport> {
    let mut report = PingReport::default();
    let rtt_re = Regex::new(r"time=([0-9.]+)\s*ms").ok()?;

    for line in output.lines() {
        for captures in rtt_re.captures_iter(line) {
            if let Ok(rtt) = captures[1].parse::<f64>() {
                report.rtts_ms.push(rtt);
            }
        }
    }

    let mut saw_summary = false;
    for line in output.lines() {
        let line = line.trim();

        if line.contains("packets transmitted") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 4 {
                report.packets_sent = fields[0].parse().unwrap_or(0);
                report.packets_received = fields[3].parse().unwrap_or(0);
            }
            if report.packets_sent > 0 {
                report.packet_loss_percent = f64::from(
                    report.packets_sent - report.packets_received.min(report.packets_sent),
                ) / f64::from(report.packets_sent)
                    * 100.0;
            }
            saw_summary = true;
        }

        if line.contains("min/avg/max") {
            if let Some(values) = line.split('=').nth(1) {
                let stats: Vec<&str> = values.trim().split('/').collect();
                if stats.len() >= 4 {
                    report.min_rtt_ms = stats[0].trim().parse().unwrap_or(0.0);
                    report.avg_rtt_ms = stats[1].trim().parse().unwrap_or(0.0);
                    report.max_rtt_ms = stats[2].trim().parse().unwrap_or(0.0);
                    let stddev = stats[3].trim_end_matches(" ms").trim();
                    report.stddev_rtt_ms = stddev.parse().unwrap_or(0.0);
                }
            }
        }
    }

    saw_summary.then_some(report)
}

/// Parse `traceroute` output into hops. The header line is skipped;
/// asterisks mark a timed-out hop; `completed` is true when the final hop
/// answered.
fn parse_traceroute_output(output: &str) -> TracerouteReport {
    let mut report = TracerouteReport::default();
    let ip_re = Regex::new(r"\((\d+\.\d+\.\d+\.\d+)\)").ok();
    let rtt_re = Regex::new(r"([0-9.]+)\s*ms").ok();

    for (i, line) in output.lines().enumerate() {
        if i == 0 || line.trim().is_empty() {
            continue;
        }
        if let Some(hop) = parse_traceroute_hop(line, ip_re.as_ref(), rtt_re.as_ref()) {
            report.hops.push(hop);
        }
    }

    report.completed = report.hops.last().is_some_and(|hop| !hop.timeout);
    report
}

fn parse_traceroute_hop(
    line: &str,
    ip_re: Option<&Regex>,
    rtt_re: Option<&Regex>,
) -> Option<TracerouteHop> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 {
        return None;
    }

    let mut hop = TracerouteHop {
        hop_number: fields[0].parse().ok()?,
        ..TracerouteHop::default()
    };

    if line.contains('*') {
        hop.timeout = true;
        return Some(hop);
    }

    if let Some(ip_re) = ip_re {
        if let Some(captures) = ip_re.captures(line) {
            hop.ip = Some(captures[1].to_string());
            // The hostname token precedes the parenthesized address.
            if let Some(before) = line.split(&captures[0]).next() {
                hop.hostname = before
                    .split_whitespace()
                    .last()
                    .filter(|t| t.parse::<u32>().is_err())
                    .map(ToString::to_string);
            }
        }
    }

    if let Some(rtt_re) = rtt_re {
        for captures in rtt_re.captures_iter(line).take(3) {
            if let Ok(rtt) = captures[1].parse::<f64>() {
                hop.rtts_ms.push(rtt);
            }
        }
    }
    if !hop.rtts_ms.is_empty() {
        hop.avg_rtt_ms = hop.rtts_ms.iter().sum::<f64>() / hop.rtts_ms.len() as f64;
    }

    Some(hop)
}
