//! Failover configuration types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conditions under which a switchover is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailoverThresholds {
    pub max_latency_ms: f64,
    pub max_packet_loss_percent: f64,
    /// Ceiling on time spent in the `connecting` state.
    pub max_connection_time_seconds: u64,
    /// Attempts after which a profile is skipped until counters reset.
    pub max_failed_attempts: u32,
    pub health_check_interval_seconds: u64,
}

impl Default for FailoverThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 300.0,
            max_packet_loss_percent: 10.0,
            max_connection_time_seconds: 30,
            max_failed_attempts: 3,
            health_check_interval_seconds: 60,
        }
    }
}

/// Failover engine state owned by the supervisor.
#[derive(Debug, Clone, Default)]
pub struct FailoverState {
    pub enabled: bool,
    /// Ranked profile ids; index 0 is the highest priority.
    pub profiles: Vec<String>,
    pub thresholds: FailoverThresholds,
    /// Failed connection attempts per profile id.
    pub attempts: HashMap<String, u32>,
    pub last_switchover: Option<DateTime<Utc>>,
}

impl FailoverState {
    /// Whether a profile has reached its failed-attempt cap.
    #[must_use]
    pub fn is_exhausted(&self, profile_id: &str) -> bool {
        self.attempts.get(profile_id).copied().unwrap_or(0) >= self.thresholds.max_failed_attempts
    }
}

/// Immutable failover status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub enabled: bool,
    pub profiles: Vec<String>,
    pub thresholds: FailoverThresholds,
    pub connection_attempts: HashMap<String, u32>,
    pub last_switchover: Option<DateTime<Utc>>,
    pub cooldown_seconds: u64,
    pub current_profile: Option<String>,
    pub current_profile_name: Option<String>,
}
