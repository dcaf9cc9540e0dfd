//! Plain data types shared across the control plane.

pub mod connection;
pub mod failover;
pub mod health;
pub mod profile;

pub use connection::{
    Connection, ConnectionState, ConnectionStatus, DisconnectReason, HistoryRecord, RunPaths,
};
pub use failover::{FailoverState, FailoverStatus, FailoverThresholds};
pub use health::{
    HealthAlert, HealthSnapshot, HealthSummary, HealthThresholds, OverallStatus,
    PerformanceTrends, Throughput, Trend,
};
pub use profile::{AuthUserPass, Remote, Transport, VpnProfile};
