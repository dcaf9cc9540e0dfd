//! Connection state types.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils;

/// Connection lifecycle state machine.
///
/// `Disconnected` is both the initial and the terminal state. The supervisor
/// is the single writer; the health monitor may promote `Connecting` to
/// `Connected` when the tunnel interface appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// True for the states in which an OpenVPN process is expected to exist.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    UserRequested,
    ProcessDied,
    Failover,
    Error,
}

/// Per-run artifact paths, keyed by profile id under the state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPaths {
    pub config_file: PathBuf,
    pub pid_file: PathBuf,
    pub status_file: PathBuf,
    pub log_file: PathBuf,
}

impl RunPaths {
    /// Allocate artifact paths for one profile.
    #[must_use]
    pub fn for_profile(state_dir: &Path, profile_id: &str) -> Self {
        Self {
            config_file: state_dir.join(format!("temp_{profile_id}.ovpn")),
            pid_file: state_dir.join(format!("openvpn_{profile_id}.pid")),
            status_file: state_dir.join(format!("openvpn_{profile_id}.status")),
            log_file: state_dir.join(format!("openvpn_{profile_id}.log")),
        }
    }

    /// Best-effort removal of every artifact.
    pub fn remove_all(&self) {
        for path in [
            &self.config_file,
            &self.pid_file,
            &self.status_file,
            &self.log_file,
        ] {
            utils::remove_file_quiet(path);
        }
    }
}

/// The active tunnel owned by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub profile_id: String,
    pub profile_name: String,
    pub paths: RunPaths,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub state: ConnectionState,
    pub interface: Option<String>,
    pub local_ip: Option<String>,
    pub remote_ip: Option<String>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub reconnects: u32,
}

impl Connection {
    /// New connection in the `Connecting` state.
    #[must_use]
    pub fn new(profile_id: String, profile_name: String, paths: RunPaths) -> Self {
        let now = Utc::now();
        Self {
            profile_id,
            profile_name,
            paths,
            started_at: now,
            last_seen: now,
            state: ConnectionState::Connecting,
            interface: None,
            local_ip: None,
            remote_ip: None,
            bytes_in: 0,
            bytes_out: 0,
            reconnects: 0,
        }
    }

    /// Seconds since the connection attempt started.
    #[must_use]
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

/// One completed connection, kept in the bounded history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub profile_id: String,
    pub profile_name: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub disconnect_reason: DisconnectReason,
    pub success: bool,
}

/// Immutable snapshot handed to external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub connection_time_seconds: i64,
    pub local_ip: Option<String>,
    pub remote_ip: Option<String>,
    pub interface: Option<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub retry_count: u32,
}

impl ConnectionStatus {
    /// Status view for the idle supervisor.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            state: ConnectionState::Disconnected,
            profile_id: None,
            profile_name: None,
            connected_at: None,
            connection_time_seconds: 0,
            local_ip: None,
            remote_ip: None,
            interface: None,
            bytes_received: 0,
            bytes_sent: 0,
            retry_count: 0,
        }
    }
}

impl From<&Connection> for ConnectionStatus {
    fn from(conn: &Connection) -> Self {
        Self {
            connected: conn.state == ConnectionState::Connected,
            state: conn.state,
            profile_id: Some(conn.profile_id.clone()),
            profile_name: Some(conn.profile_name.clone()),
            connected_at: Some(conn.started_at),
            connection_time_seconds: if conn.state == ConnectionState::Connected {
                conn.uptime_seconds()
            } else {
                0
            },
            local_ip: conn.local_ip.clone(),
            remote_ip: conn.remote_ip.clone(),
            interface: conn.interface.clone(),
            bytes_received: conn.bytes_in,
            bytes_sent: conn.bytes_out,
            retry_count: conn.reconnects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_live() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Connected.is_live());
        assert!(!ConnectionState::Disconnecting.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
    }

    #[test]
    fn test_run_paths_keyed_by_profile() {
        let paths = RunPaths::for_profile(Path::new("/var/lib/tw"), "office_123");
        assert_eq!(
            paths.pid_file,
            PathBuf::from("/var/lib/tw/openvpn_office_123.pid")
        );
        assert_eq!(
            paths.config_file,
            PathBuf::from("/var/lib/tw/temp_office_123.ovpn")
        );
    }

    #[test]
    fn test_status_from_connecting_has_zero_uptime() {
        let conn = Connection::new(
            "p_1".into(),
            "p".into(),
            RunPaths::for_profile(Path::new("/tmp"), "p_1"),
        );
        let status = ConnectionStatus::from(&conn);
        assert!(!status.connected);
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.connection_time_seconds, 0);
    }

    #[test]
    fn test_disconnect_reason_serde_tags() {
        let json = serde_json::to_string(&DisconnectReason::ProcessDied).unwrap();
        assert_eq!(json, "\"process_died\"");
        let json = serde_json::to_string(&DisconnectReason::UserRequested).unwrap();
        assert_eq!(json, "\"user_requested\"");
    }
}
