//! Health monitoring types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Throughput measurements derived from connection byte counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub bytes_received_delta: u64,
    pub bytes_sent_delta: u64,
    pub measurement_period_seconds: u64,
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
}

impl Throughput {
    /// Compute deltas and Mbps rates against the previous snapshot's
    /// counters. Counters that moved backwards (interface recreated) clamp
    /// to zero.
    #[must_use]
    pub fn from_counters(
        bytes_in: u64,
        bytes_out: u64,
        previous: Option<&Throughput>,
        period_seconds: u64,
    ) -> Self {
        let mut t = Throughput {
            bytes_received: bytes_in,
            bytes_sent: bytes_out,
            measurement_period_seconds: period_seconds,
            ..Throughput::default()
        };

        if let Some(prev) = previous {
            t.bytes_received_delta = bytes_in.saturating_sub(prev.bytes_received);
            t.bytes_sent_delta = bytes_out.saturating_sub(prev.bytes_sent);
            if period_seconds > 0 {
                let period = period_seconds as f64;
                t.download_speed_mbps =
                    (t.bytes_received_delta as f64 * 8.0) / (period * 1_000_000.0);
                t.upload_speed_mbps = (t.bytes_sent_delta as f64 * 8.0) / (period * 1_000_000.0);
            }
        }

        t
    }
}

/// Immutable health observation recorded at one monitor tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub connection_uptime_seconds: i64,
    pub local_ip: Option<String>,
    pub remote_ip: Option<String>,
    pub interface: Option<String>,
    pub latency_ms: f64,
    pub packet_loss_percent: f64,
    pub throughput: Throughput,
    pub dns_resolution: bool,
    pub remote_reachable: bool,
    pub tunnel_stable: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Alert thresholds evaluated against each new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub max_latency_ms: f64,
    pub max_packet_loss_percent: f64,
    pub min_throughput_mbps: f64,
    pub max_reconnect_count: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 200.0,
            max_packet_loss_percent: 5.0,
            min_throughput_mbps: 1.0,
            max_reconnect_count: 5,
        }
    }
}

/// A recorded threshold violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    /// Violation kind: `latency`, `packet_loss` or `throughput`.
    pub kind: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Overall condition derived from the summary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
    Disconnected,
    Unknown,
}

/// Direction of a metric across the summary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// First-third versus last-third comparison over the summary window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTrends {
    pub latency_trend: Trend,
    pub throughput_trend: Trend,
    pub stability_trend: Trend,
    pub latency_change_percent: f64,
    pub throughput_change_percent: f64,
    pub uptime_percentage_24h: f64,
}

impl Default for PerformanceTrends {
    fn default() -> Self {
        Self {
            latency_trend: Trend::Stable,
            throughput_trend: Trend::Stable,
            stability_trend: Trend::Stable,
            latency_change_percent: 0.0,
            throughput_change_percent: 0.0,
            uptime_percentage_24h: 0.0,
        }
    }
}

/// Aggregated health statistics over the last hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall_status: OverallStatus,
    pub last_update: DateTime<Utc>,
    pub connection_uptime_seconds: i64,
    pub success_rate_percent: f64,
    pub average_latency_ms: f64,
    pub average_packet_loss_percent: f64,
    pub average_download_mbps: f64,
    pub average_upload_mbps: f64,
    pub recent_alerts: Vec<HealthAlert>,
    pub performance_trends: PerformanceTrends,
}

impl HealthSummary {
    /// Empty summary with the given status.
    #[must_use]
    pub fn empty(status: OverallStatus) -> Self {
        Self {
            overall_status: status,
            last_update: Utc::now(),
            connection_uptime_seconds: 0,
            success_rate_percent: 0.0,
            average_latency_ms: 0.0,
            average_packet_loss_percent: 0.0,
            average_download_mbps: 0.0,
            average_upload_mbps: 0.0,
            recent_alerts: Vec::new(),
            performance_trends: PerformanceTrends::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_first_measurement_has_no_rates() {
        let t = Throughput::from_counters(1000, 500, None, 30);
        assert_eq!(t.bytes_received, 1000);
        assert_eq!(t.bytes_received_delta, 0);
        assert_eq!(t.download_speed_mbps, 0.0);
    }

    #[test]
    fn test_throughput_mbps_from_deltas() {
        let prev = Throughput::from_counters(0, 0, None, 30);
        // 3_750_000 bytes over 30 s = 1 Mbps.
        let t = Throughput::from_counters(3_750_000, 7_500_000, Some(&prev), 30);
        assert_eq!(t.bytes_received_delta, 3_750_000);
        assert!((t.download_speed_mbps - 1.0).abs() < 1e-9);
        assert!((t.upload_speed_mbps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_counter_reset_clamps_to_zero() {
        let prev = Throughput::from_counters(9_000_000, 9_000_000, None, 30);
        let t = Throughput::from_counters(100, 50, Some(&prev), 30);
        assert_eq!(t.bytes_received_delta, 0);
        assert_eq!(t.bytes_sent_delta, 0);
    }

    #[test]
    fn test_default_thresholds() {
        let t = HealthThresholds::default();
        assert_eq!(t.max_latency_ms, 200.0);
        assert_eq!(t.max_packet_loss_percent, 5.0);
        assert_eq!(t.min_throughput_mbps, 1.0);
    }

    #[test]
    fn test_overall_status_serde_tags() {
        assert_eq!(
            serde_json::to_string(&OverallStatus::Disconnected).unwrap(),
            "\"disconnected\""
        );
        assert_eq!(serde_json::to_string(&Trend::Degrading).unwrap(), "\"degrading\"");
    }
}
