//! Connection lifecycle supervisor.
//!
//! Single writer for the active [`Connection`] and the bounded history ring.
//! Callers hold the supervisor behind one reader/writer lock; every mutation
//! below assumes the caller owns the write side. The failover engine state
//! lives here as well so switchovers serialize on the same lock.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::constants;
use crate::core::parser;
use crate::core::process::{ProcessDriver, StatusFields};
use crate::error::{Error, Result};
use crate::logger::{self, LogLevel};
use crate::state::connection::{
    Connection, ConnectionState, ConnectionStatus, DisconnectReason, HistoryRecord, RunPaths,
};
use crate::state::failover::{FailoverState, FailoverStatus, FailoverThresholds};
use crate::state::health::HealthSnapshot;
use crate::state::profile::VpnProfile;

/// Outcome of a liveness observation, consumed by the monitor tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LivenessReport {
    /// The process was lost from a live state this tick.
    pub died: bool,
    /// Failover was enabled at the time of death.
    pub failover_enabled: bool,
}

struct ActiveConnection {
    conn: Connection,
    child: Option<Child>,
}

pub struct Supervisor {
    state_dir: PathBuf,
    driver: Arc<dyn ProcessDriver>,
    active: Option<ActiveConnection>,
    /// Profile of the most recent connection; seeds the failover ring walk
    /// after a crash has already cleared `active`.
    last_profile_id: Option<String>,
    history: VecDeque<HistoryRecord>,
    failover: FailoverState,
    failover_cooldown: Duration,
}

impl Supervisor {
    /// Open the supervisor, loading persisted history and adopting or
    /// cleaning up a previously active connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be created.
    pub fn new(state_dir: impl Into<PathBuf>, driver: Arc<dyn ProcessDriver>) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;

        let mut supervisor = Self {
            state_dir,
            driver,
            active: None,
            last_profile_id: None,
            history: VecDeque::new(),
            failover: FailoverState::default(),
            failover_cooldown: constants::FAILOVER_COOLDOWN,
        };
        supervisor.load_history();
        supervisor.restore();
        Ok(supervisor)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Connect to a profile, disconnecting any current tunnel first.
    ///
    /// # Errors
    ///
    /// Refuses unvalidated profiles with [`Error::Validation`]; surfaces
    /// render and launch failures.
    pub fn connect(&mut self, profile: &VpnProfile) -> Result<()> {
        self.connect_internal(profile, DisconnectReason::UserRequested)
    }

    /// Shared connect path for user requests and failover switchovers.
    /// `prior_reason` is recorded on the history entry of the connection
    /// being replaced.
    fn connect_internal(
        &mut self,
        profile: &VpnProfile,
        prior_reason: DisconnectReason,
    ) -> Result<()> {
        if !profile.validated {
            return Err(Error::Validation(format!(
                "profile not validated: {}",
                profile
                    .validation_error
                    .as_deref()
                    .unwrap_or("no validation pass recorded")
            )));
        }

        if self.active.is_some() {
            if let Err(e) = self.disconnect_internal(prior_reason) {
                logger::log(
                    LogLevel::Warning,
                    "CONN",
                    format!("failed to disconnect existing connection: {e}"),
                );
            }
        }

        let paths = RunPaths::for_profile(&self.state_dir, &profile.id);
        fs::write(&paths.config_file, parser::render_profile(profile))?;

        let child = self.driver.launch(profile, &paths)?;
        self.active = Some(ActiveConnection {
            conn: Connection::new(profile.id.clone(), profile.name.clone(), paths),
            child,
        });
        self.last_profile_id = Some(profile.id.clone());
        self.persist_state();

        logger::log(
            LogLevel::Info,
            "CONN",
            format!("connection initiated for profile {}", profile.name),
        );
        Ok(())
    }

    /// Tear down the active tunnel on user request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] when no connection is active.
    pub fn disconnect(&mut self) -> Result<HistoryRecord> {
        if self.active.is_none() {
            return Err(Error::IllegalState("no active connection".to_string()));
        }
        self.disconnect_internal(DisconnectReason::UserRequested)
    }

    fn disconnect_internal(&mut self, reason: DisconnectReason) -> Result<HistoryRecord> {
        let was_connected = match &mut self.active {
            Some(active) => {
                let was = active.conn.state == ConnectionState::Connected;
                active.conn.state = ConnectionState::Disconnecting;
                was
            }
            None => return Err(Error::IllegalState("no active connection".to_string())),
        };
        self.persist_state();

        let Some(mut active) = self.active.take() else {
            return Err(Error::IllegalState("no active connection".to_string()));
        };
        if let Err(e) =
            self.driver
                .stop(&active.conn.profile_id, &active.conn.paths, active.child.as_mut())
        {
            logger::log(LogLevel::Warning, "CONN", format!("error stopping openvpn: {e}"));
        }

        let now = Utc::now();
        let record = HistoryRecord {
            profile_id: active.conn.profile_id.clone(),
            profile_name: active.conn.profile_name.clone(),
            connected_at: active.conn.started_at,
            disconnected_at: now,
            duration_seconds: (now - active.conn.started_at).num_seconds().max(0),
            bytes_received: active.conn.bytes_in,
            bytes_sent: active.conn.bytes_out,
            disconnect_reason: reason,
            success: was_connected,
        };
        self.push_history(record.clone());

        active.conn.paths.remove_all();
        self.persist_state();

        logger::log(
            LogLevel::Info,
            "CONN",
            format!(
                "disconnected from {} after {}",
                record.profile_name,
                crate::utils::format_duration(Duration::from_secs(
                    record.duration_seconds.max(0) as u64
                ))
            ),
        );
        Ok(record)
    }

    // ── Monitor callbacks ───────────────────────────────────────────────────

    /// Record the result of an external liveness probe. On loss from a live
    /// state the connection is closed out with reason `process_died`.
    pub fn observe_liveness(&mut self, probe_alive: bool) -> LivenessReport {
        let still_alive = match &mut self.active {
            None => return LivenessReport::default(),
            Some(active) if !active.conn.state.is_live() => return LivenessReport::default(),
            Some(active) => {
                // The direct child may still be running before the
                // daemonized process writes its pid file.
                probe_alive
                    || active
                        .child
                        .as_mut()
                        .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
            }
        };
        if still_alive {
            return LivenessReport::default();
        }

        let Some(mut active) = self.active.take() else {
            return LivenessReport::default();
        };
        logger::log(
            LogLevel::Warning,
            "CONN",
            format!(
                "openvpn process died unexpectedly for profile {}",
                active.conn.profile_name
            ),
        );

        let now = Utc::now();
        self.push_history(HistoryRecord {
            profile_id: active.conn.profile_id.clone(),
            profile_name: active.conn.profile_name.clone(),
            connected_at: active.conn.started_at,
            disconnected_at: now,
            duration_seconds: (now - active.conn.started_at).num_seconds().max(0),
            bytes_received: active.conn.bytes_in,
            bytes_sent: active.conn.bytes_out,
            disconnect_reason: DisconnectReason::ProcessDied,
            success: false,
        });

        if let Some(child) = &mut active.child {
            let _ = child.wait();
        }
        active.conn.paths.remove_all();
        self.persist_state();

        LivenessReport {
            died: true,
            failover_enabled: self.failover.enabled,
        }
    }

    /// Fold monitor observations into the active connection: status-file
    /// fields, interface detection (which promotes `connecting` to
    /// `connected`), and byte counters.
    pub fn apply_observation(
        &mut self,
        status: Option<StatusFields>,
        interface: Option<String>,
        counters: Option<(u64, u64)>,
    ) {
        let Some(active) = &mut self.active else {
            return;
        };
        let conn = &mut active.conn;
        conn.last_seen = Utc::now();

        if let Some(status) = status {
            if status.local_ip.is_some() {
                conn.local_ip = status.local_ip;
            }
            if status.remote_ip.is_some() {
                conn.remote_ip = status.remote_ip;
            }
        }

        if let Some(interface) = interface {
            conn.interface = Some(interface.clone());
            if conn.state == ConnectionState::Connecting {
                conn.state = ConnectionState::Connected;
                logger::log(
                    LogLevel::Info,
                    "CONN",
                    format!(
                        "connection established for profile {} (interface {interface})",
                        conn.profile_name
                    ),
                );
            }
        }

        if let Some((bytes_in, bytes_out)) = counters {
            conn.bytes_in = bytes_in;
            conn.bytes_out = bytes_out;
        }

        self.persist_state();
    }

    // ── Views ───────────────────────────────────────────────────────────────

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.active
            .as_ref()
            .map_or_else(ConnectionStatus::disconnected, |a| {
                ConnectionStatus::from(&a.conn)
            })
    }

    /// Clone of the active connection for the monitor tick.
    #[must_use]
    pub fn connection_view(&self) -> Option<Connection> {
        self.active.as_ref().map(|a| a.conn.clone())
    }

    #[must_use]
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.iter().cloned().collect()
    }

    // ── Failover engine ─────────────────────────────────────────────────────

    /// Install the ranked profile list. The caller has already verified that
    /// every id exists and is validated (atomic enable).
    pub fn enable_failover(
        &mut self,
        profile_ids: Vec<String>,
        thresholds: Option<FailoverThresholds>,
    ) {
        self.failover.enabled = true;
        self.failover.profiles = profile_ids;
        if let Some(thresholds) = thresholds {
            self.failover.thresholds = thresholds;
        }
        self.failover.attempts.clear();
        logger::log(
            LogLevel::Info,
            "FAILOVER",
            format!("enabled with {} profiles", self.failover.profiles.len()),
        );
    }

    pub fn disable_failover(&mut self) {
        self.failover.enabled = false;
        self.failover.profiles.clear();
        logger::log(LogLevel::Info, "FAILOVER", "disabled");
    }

    pub fn reset_attempts(&mut self) {
        self.failover.attempts.clear();
        logger::log(LogLevel::Info, "FAILOVER", "attempt counters reset");
    }

    #[must_use]
    pub fn failover_state(&self) -> &FailoverState {
        &self.failover
    }

    #[must_use]
    pub fn failover_status(&self) -> FailoverStatus {
        let active = self.active.as_ref().map(|a| &a.conn);
        FailoverStatus {
            enabled: self.failover.enabled,
            profiles: self.failover.profiles.clone(),
            thresholds: self.failover.thresholds,
            connection_attempts: self.failover.attempts.clone(),
            last_switchover: self.failover.last_switchover,
            cooldown_seconds: self.failover_cooldown.as_secs(),
            current_profile: active.map(|c| c.profile_id.clone()),
            current_profile_name: active.map(|c| c.profile_name.clone()),
        }
    }

    fn within_cooldown(&self) -> bool {
        self.failover.last_switchover.is_some_and(|at| {
            let elapsed = (Utc::now() - at).num_seconds().max(0) as u64;
            elapsed < self.failover_cooldown.as_secs()
        })
    }

    /// Evaluate the failover triggers against the latest health snapshot.
    /// Returns the trigger description, or `None` when no switchover is due.
    #[must_use]
    pub fn check_failover_conditions(&self, latest: Option<&HealthSnapshot>) -> Option<String> {
        if !self.failover.enabled || self.failover.profiles.len() <= 1 {
            return None;
        }
        if self.within_cooldown() {
            return None;
        }

        let thresholds = &self.failover.thresholds;
        if let Some(snapshot) = latest {
            if snapshot.connected {
                if snapshot.latency_ms > thresholds.max_latency_ms {
                    return Some(format!(
                        "latency {:.1} ms above threshold {:.1} ms",
                        snapshot.latency_ms, thresholds.max_latency_ms
                    ));
                }
                if snapshot.packet_loss_percent > thresholds.max_packet_loss_percent {
                    return Some(format!(
                        "packet loss {:.1}% above threshold {:.1}%",
                        snapshot.packet_loss_percent, thresholds.max_packet_loss_percent
                    ));
                }
            }
        }

        if let Some(active) = &self.active {
            if active.conn.state == ConnectionState::Connecting
                && active.conn.uptime_seconds() as u64 > thresholds.max_connection_time_seconds
            {
                return Some(format!(
                    "stuck in connecting for more than {} s",
                    thresholds.max_connection_time_seconds
                ));
            }
        }

        None
    }

    /// Ranked walk from index 0, used by the explicit
    /// connect-with-failover entry point.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when failover is not enabled;
    /// [`Error::Exhausted`] when no candidate connects.
    pub fn connect_with_failover(&mut self, ranked: &[VpnProfile]) -> Result<String> {
        if !self.failover.enabled || ranked.is_empty() {
            return Err(Error::IllegalState(
                "failover not enabled or no profiles configured".to_string(),
            ));
        }

        for profile in ranked {
            if self.failover.is_exhausted(&profile.id) {
                logger::log(
                    LogLevel::Debug,
                    "FAILOVER",
                    format!("skipping {}: max attempts exceeded", profile.id),
                );
                continue;
            }

            match self.connect_internal(profile, DisconnectReason::Failover) {
                Ok(()) => {
                    self.failover.attempts.insert(profile.id.clone(), 0);
                    return Ok(profile.id.clone());
                }
                Err(e) => {
                    let count = self.failover.attempts.entry(profile.id.clone()).or_insert(0);
                    *count += 1;
                    logger::log(
                        LogLevel::Warning,
                        "FAILOVER",
                        format!("connection to {} failed (attempt {count}): {e}", profile.id),
                    );
                }
            }
        }

        Err(Error::Exhausted)
    }

    /// Switch to the next eligible profile, starting just after the active
    /// one and wrapping around the ranked list.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when failover is disabled, fewer than two
    /// profiles are ranked, or the cooldown has not elapsed;
    /// [`Error::Exhausted`] when the ring completes without success.
    pub fn perform_failover(&mut self, ranked: &[VpnProfile]) -> Result<String> {
        if !self.failover.enabled || self.failover.profiles.len() <= 1 {
            return Err(Error::IllegalState(
                "failover not enabled or insufficient profiles".to_string(),
            ));
        }
        if self.within_cooldown() {
            return Err(Error::IllegalState(
                "failover within cooldown of last switchover".to_string(),
            ));
        }

        // After a crash `active` is already cleared; the last profile seen
        // still anchors the ring walk so the dead profile is not retried
        // first.
        let current_id = self
            .active
            .as_ref()
            .map(|a| a.conn.profile_id.clone())
            .or_else(|| self.last_profile_id.clone());
        let current_index = current_id
            .as_deref()
            .and_then(|id| self.failover.profiles.iter().position(|p| p == id));

        let ring = self.failover.profiles.clone();
        let start = current_index.map_or(0, |i| (i + 1) % ring.len());

        for offset in 0..ring.len().saturating_sub(1) {
            let candidate_id = ring[(start + offset) % ring.len()].clone();
            if self.failover.is_exhausted(&candidate_id) {
                continue;
            }
            let Some(profile) = ranked.iter().find(|p| p.id == candidate_id) else {
                continue;
            };

            logger::log(
                LogLevel::Info,
                "FAILOVER",
                format!("attempting switchover to {candidate_id}"),
            );
            match self.connect_internal(profile, DisconnectReason::Failover) {
                Ok(()) => {
                    self.failover.last_switchover = Some(Utc::now());
                    self.failover.attempts.insert(candidate_id.clone(), 0);
                    logger::log(
                        LogLevel::Info,
                        "FAILOVER",
                        format!("switchover to {candidate_id} succeeded"),
                    );
                    return Ok(candidate_id);
                }
                Err(e) => {
                    let count = self.failover.attempts.entry(candidate_id.clone()).or_insert(0);
                    *count += 1;
                    logger::log(
                        LogLevel::Warning,
                        "FAILOVER",
                        format!("switchover to {candidate_id} failed: {e}"),
                    );
                }
            }
        }

        Err(Error::Exhausted)
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    fn state_file(&self) -> PathBuf {
        self.state_dir.join(constants::CONNECTION_STATE_FILE)
    }

    fn history_file(&self) -> PathBuf {
        self.state_dir.join(constants::CONNECTION_HISTORY_FILE)
    }

    fn persist_state(&self) {
        let path = self.state_file();
        match &self.active {
            Some(active) => {
                let write = fs::File::create(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|f| {
                        serde_json::to_writer_pretty(f, &active.conn).map_err(|e| e.to_string())
                    });
                if let Err(e) = write {
                    logger::log(
                        LogLevel::Warning,
                        "CONN",
                        format!("failed to save connection state: {e}"),
                    );
                }
            }
            None => crate::utils::remove_file_quiet(&path),
        }
    }

    fn push_history(&mut self, record: HistoryRecord) {
        self.history.push_back(record);
        while self.history.len() > constants::HISTORY_CAP {
            self.history.pop_front();
        }
        let write = fs::File::create(self.history_file())
            .map_err(|e| e.to_string())
            .and_then(|f| {
                serde_json::to_writer_pretty(f, &self.history.iter().collect::<Vec<_>>())
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = write {
            logger::log(
                LogLevel::Warning,
                "CONN",
                format!("failed to save connection history: {e}"),
            );
        }
    }

    fn load_history(&mut self) {
        let Ok(file) = fs::File::open(self.history_file()) else {
            return;
        };
        match serde_json::from_reader::<_, Vec<HistoryRecord>>(file) {
            Ok(records) => {
                logger::log(
                    LogLevel::Info,
                    "CONN",
                    format!("loaded {} history records", records.len()),
                );
                self.history = records.into();
            }
            Err(e) => {
                logger::log(
                    LogLevel::Warning,
                    "CONN",
                    format!("failed to decode connection history: {e}"),
                );
            }
        }
    }

    /// Adopt a still-running connection from a previous process lifetime, or
    /// clean up its leftovers.
    fn restore(&mut self) {
        let Ok(file) = fs::File::open(self.state_file()) else {
            return;
        };
        let conn: Connection = match serde_json::from_reader(file) {
            Ok(conn) => conn,
            Err(e) => {
                logger::log(
                    LogLevel::Warning,
                    "CONN",
                    format!("failed to decode connection state: {e}"),
                );
                return;
            }
        };

        if self.driver.is_alive(&conn.paths) {
            logger::log(
                LogLevel::Info,
                "CONN",
                format!("restored connection state for profile {}", conn.profile_name),
            );
            self.last_profile_id = Some(conn.profile_id.clone());
            self.active = Some(ActiveConnection { conn, child: None });
        } else {
            logger::log(
                LogLevel::Info,
                "CONN",
                format!("previous connection to {} was lost", conn.profile_name),
            );
            conn.paths.remove_all();
            crate::utils::remove_file_quiet(&self.state_file());
        }
    }
}

#[cfg(test)]
pub(crate) mod test_driver {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted driver: liveness is a flag, launches are recorded, and the
    /// next launch can be made to fail.
    #[derive(Default)]
    pub(crate) struct FakeDriver {
        pub alive: AtomicBool,
        pub launches: Mutex<Vec<String>>,
        pub fail_launches_for: Mutex<Vec<String>>,
    }

    impl ProcessDriver for FakeDriver {
        fn launch(&self, profile: &VpnProfile, _paths: &RunPaths) -> Result<Option<Child>> {
            if self
                .fail_launches_for
                .lock()
                .map(|ids| ids.contains(&profile.id))
                .unwrap_or(false)
            {
                return Err(Error::external("openvpn", "scripted launch failure"));
            }
            if let Ok(mut launches) = self.launches.lock() {
                launches.push(profile.id.clone());
            }
            self.alive.store(true, Ordering::SeqCst);
            Ok(None)
        }

        fn is_alive(&self, _paths: &RunPaths) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn stop(
            &self,
            _profile_id: &str,
            _paths: &RunPaths,
            _child: Option<&mut Child>,
        ) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}
