//! Composition root.
//!
//! Owns the shared handles to the profile store, connection supervisor,
//! health monitor and diagnostics, and exposes the full control-plane API
//! surface as methods. Locking discipline: the store lock is never held
//! while a supervisor lock is taken — profile data needed for a supervisor
//! operation is cloned out first.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::constants;
use crate::core::diagnostics::{
    DiagnosticResult, Diagnostics, PingParams, TracerouteParams,
};
use crate::core::monitor::{self, HealthMonitor, MonitorHandles};
use crate::core::process::{OpenVpnDriver, ProcessDriver};
use crate::core::store::ProfileStore;
use crate::core::supervisor::Supervisor;
use crate::error::{Error, Result};
use crate::state::connection::{ConnectionStatus, HistoryRecord};
use crate::state::failover::{FailoverStatus, FailoverThresholds};
use crate::state::health::{HealthSnapshot, HealthSummary, HealthThresholds};
use crate::state::profile::VpnProfile;

pub struct Manager {
    store: Arc<RwLock<ProfileStore>>,
    supervisor: Arc<RwLock<Supervisor>>,
    monitor: Arc<RwLock<HealthMonitor>>,
    diagnostics: Arc<RwLock<Diagnostics>>,
    driver: Arc<dyn ProcessDriver>,
    crash_failover_delay: Duration,
}

impl Manager {
    /// Open the control plane with the real OpenVPN driver.
    ///
    /// # Errors
    ///
    /// Returns an error when the profile or state directories cannot be
    /// created.
    pub fn new(profiles_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_driver(profiles_dir, state_dir, Arc::new(OpenVpnDriver))
    }

    /// Open the control plane with a caller-supplied process driver.
    ///
    /// # Errors
    ///
    /// Returns an error when the profile or state directories cannot be
    /// created.
    pub fn with_driver(
        profiles_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        driver: Arc<dyn ProcessDriver>,
    ) -> Result<Self> {
        let mut store = ProfileStore::new(profiles_dir)?;
        store.load_all();
        let supervisor = Supervisor::new(state_dir, driver.clone())?;

        let manager = Self {
            store: Arc::new(RwLock::new(store)),
            supervisor: Arc::new(RwLock::new(supervisor)),
            monitor: Arc::new(RwLock::new(HealthMonitor::new())),
            diagnostics: Arc::new(RwLock::new(Diagnostics::new())),
            driver,
            crash_failover_delay: constants::CRASH_FAILOVER_DELAY,
        };

        // A connection adopted from a previous process lifetime resumes
        // under monitoring straight away.
        let adopted = manager
            .connection_status()
            .map(|status| status.state.is_live())
            .unwrap_or(false);
        if adopted {
            manager.start_monitoring(None);
        }

        Ok(manager)
    }

    fn handles(&self) -> MonitorHandles {
        MonitorHandles {
            store: self.store.clone(),
            supervisor: self.supervisor.clone(),
            monitor: self.monitor.clone(),
            driver: self.driver.clone(),
            crash_failover_delay: self.crash_failover_delay,
        }
    }

    fn poisoned(component: &str) -> Error {
        Error::IllegalState(format!("{component} lock poisoned"))
    }

    // ── Profiles ────────────────────────────────────────────────────────────

    /// Import a `.ovpn` file as a profile.
    ///
    /// # Errors
    ///
    /// Propagates parse and I/O failures from the store.
    pub fn import_profile(&self, path: &Path, name: Option<&str>) -> Result<VpnProfile> {
        self.store
            .write()
            .map_err(|_| Self::poisoned("store"))?
            .import(path, name)
    }

    /// Download and import a configuration.
    ///
    /// # Errors
    ///
    /// Propagates URL, network, parse and I/O failures.
    pub fn import_profile_url(&self, url: &str, name: Option<&str>) -> Result<VpnProfile> {
        self.store
            .write()
            .map_err(|_| Self::poisoned("store"))?
            .import_url(url, name)
    }

    /// All profiles, highest priority first.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn profiles(&self) -> Result<Vec<VpnProfile>> {
        Ok(self
            .store
            .read()
            .map_err(|_| Self::poisoned("store"))?
            .list()
            .into_iter()
            .cloned()
            .collect())
    }

    /// One profile by id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id.
    pub fn profile(&self, id: &str) -> Result<VpnProfile> {
        self.store
            .read()
            .map_err(|_| Self::poisoned("store"))?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("profile {id}")))
    }

    /// Delete a profile.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id.
    pub fn delete_profile(&self, id: &str) -> Result<()> {
        self.store
            .write()
            .map_err(|_| Self::poisoned("store"))?
            .delete(id)
    }

    /// Render a profile to OpenVPN text.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id; writer I/O errors.
    pub fn export_profile<W: Write>(&self, id: &str, writer: &mut W) -> Result<()> {
        self.store
            .read()
            .map_err(|_| Self::poisoned("store"))?
            .export(id, writer)
    }

    /// Re-run validation on a profile.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id.
    pub fn validate_profile(&self, id: &str) -> Result<VpnProfile> {
        self.store
            .write()
            .map_err(|_| Self::poisoned("store"))?
            .revalidate(id)
    }

    // ── Connection ──────────────────────────────────────────────────────────

    /// Connect to a profile and ensure the monitoring loop is running.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, [`Error::Validation`] for an
    /// unvalidated profile, launch failures otherwise.
    pub fn connect(&self, id: &str) -> Result<()> {
        let profile = self.profile(id)?;
        self.supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .connect(&profile)?;
        if let Ok(mut store) = self.store.write() {
            store.set_active(Some(id));
        }
        self.start_monitoring(None);
        Ok(())
    }

    /// Disconnect the active tunnel.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when nothing is connected.
    pub fn disconnect(&self) -> Result<HistoryRecord> {
        let record = self
            .supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .disconnect()?;
        if let Ok(mut store) = self.store.write() {
            store.set_active(None);
        }
        Ok(record)
    }

    /// Current connection status snapshot.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn connection_status(&self) -> Result<ConnectionStatus> {
        Ok(self
            .supervisor
            .read()
            .map_err(|_| Self::poisoned("supervisor"))?
            .status())
    }

    /// Bounded connection history, oldest first.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn connection_history(&self) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .supervisor
            .read()
            .map_err(|_| Self::poisoned("supervisor"))?
            .history())
    }

    /// Ranked walk from the top of the failover list.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] when failover is not enabled,
    /// [`Error::Exhausted`] when every candidate fails.
    pub fn connect_with_failover(&self) -> Result<String> {
        let ranked = self.ranked_failover_profiles()?;
        let id = self
            .supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .connect_with_failover(&ranked)?;
        if let Ok(mut store) = self.store.write() {
            store.set_active(Some(&id));
        }
        self.start_monitoring(None);
        Ok(id)
    }

    // ── Failover ────────────────────────────────────────────────────────────

    /// Enable failover over a ranked profile list. The enable is atomic:
    /// every referenced profile must exist and be validated or nothing
    /// changes.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an empty list or unvalidated profile,
    /// [`Error::NotFound`] for an unknown id.
    pub fn enable_failover(
        &self,
        profile_ids: &[String],
        thresholds: Option<FailoverThresholds>,
    ) -> Result<()> {
        if profile_ids.is_empty() {
            return Err(Error::Validation(
                "at least one profile id is required".to_string(),
            ));
        }

        {
            let store = self.store.read().map_err(|_| Self::poisoned("store"))?;
            for id in profile_ids {
                let profile = store
                    .get(id)
                    .ok_or_else(|| Error::NotFound(format!("profile {id}")))?;
                if !profile.validated {
                    return Err(Error::Validation(format!(
                        "profile not validated: {id} ({})",
                        profile
                            .validation_error
                            .as_deref()
                            .unwrap_or("no validation pass recorded")
                    )));
                }
            }
        }

        self.supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .enable_failover(profile_ids.to_vec(), thresholds);
        Ok(())
    }

    /// Disable failover.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn disable_failover(&self) -> Result<()> {
        self.supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .disable_failover();
        Ok(())
    }

    /// Failover configuration and counters.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn failover_status(&self) -> Result<FailoverStatus> {
        Ok(self
            .supervisor
            .read()
            .map_err(|_| Self::poisoned("supervisor"))?
            .failover_status())
    }

    /// Manually run one switchover.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] for guard violations (disabled, too few
    /// profiles, cooldown), [`Error::Exhausted`] when the ring completes.
    pub fn trigger_failover(&self) -> Result<String> {
        let ranked = self.ranked_failover_profiles()?;
        let id = self
            .supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .perform_failover(&ranked)?;
        if let Ok(mut store) = self.store.write() {
            store.set_active(Some(&id));
        }
        Ok(id)
    }

    /// Reset per-profile failed-attempt counters.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn reset_failover_attempts(&self) -> Result<()> {
        self.supervisor
            .write()
            .map_err(|_| Self::poisoned("supervisor"))?
            .reset_attempts();
        Ok(())
    }

    fn ranked_failover_profiles(&self) -> Result<Vec<VpnProfile>> {
        let ids = self
            .supervisor
            .read()
            .map_err(|_| Self::poisoned("supervisor"))?
            .failover_state()
            .profiles
            .clone();
        let store = self.store.read().map_err(|_| Self::poisoned("store"))?;
        Ok(ids.iter().filter_map(|id| store.get(id).cloned()).collect())
    }

    // ── Health ──────────────────────────────────────────────────────────────

    /// Start the monitoring loop (idempotent). An explicit interval takes
    /// effect before the first tick.
    pub fn start_monitoring(&self, interval: Option<Duration>) {
        if let Some(interval) = interval {
            if let Ok(mut monitor) = self.monitor.write() {
                monitor.set_interval(interval);
            }
        }
        monitor::start(self.handles());
    }

    /// Signal the monitoring loop to stop at the next tick boundary
    /// (idempotent).
    pub fn stop_monitoring(&self) {
        if let Ok(mut monitor) = self.monitor.write() {
            monitor.request_stop();
        }
    }

    #[must_use]
    pub fn monitoring_active(&self) -> bool {
        self.monitor
            .read()
            .map(|m| m.is_running())
            .unwrap_or(false)
    }

    /// Latest health snapshot, if any has been recorded.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn current_health(&self) -> Result<Option<HealthSnapshot>> {
        Ok(self
            .monitor
            .read()
            .map_err(|_| Self::poisoned("monitor"))?
            .latest()
            .cloned())
    }

    /// Aggregated health over the last hour.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn health_summary(&self) -> Result<HealthSummary> {
        Ok(self
            .monitor
            .read()
            .map_err(|_| Self::poisoned("monitor"))?
            .summary())
    }

    /// Health snapshots from the last `minutes` minutes.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn health_history(&self, minutes: i64) -> Result<Vec<HealthSnapshot>> {
        Ok(self
            .monitor
            .read()
            .map_err(|_| Self::poisoned("monitor"))?
            .history_since(minutes))
    }

    /// Current alert thresholds.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn health_thresholds(&self) -> Result<HealthThresholds> {
        Ok(self
            .monitor
            .read()
            .map_err(|_| Self::poisoned("monitor"))?
            .thresholds())
    }

    /// Replace the alert thresholds.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for non-positive latency or a loss percentage
    /// outside [0, 100].
    pub fn set_health_thresholds(&self, thresholds: HealthThresholds) -> Result<()> {
        if thresholds.max_latency_ms <= 0.0
            || thresholds.max_packet_loss_percent < 0.0
            || thresholds.max_packet_loss_percent > 100.0
        {
            return Err(Error::Validation("invalid threshold values".to_string()));
        }
        self.monitor
            .write()
            .map_err(|_| Self::poisoned("monitor"))?
            .set_thresholds(thresholds);
        Ok(())
    }

    // ── Diagnostics ─────────────────────────────────────────────────────────

    /// Ping probe.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock; probe failures are recorded on the
    /// returned result.
    pub fn ping(&self, host: &str, params: Option<PingParams>) -> Result<DiagnosticResult> {
        Ok(self
            .diagnostics
            .write()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .ping(host, params))
    }

    /// Traceroute probe.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock; probe failures are recorded on the
    /// returned result.
    pub fn traceroute(
        &self,
        host: &str,
        params: Option<TracerouteParams>,
    ) -> Result<DiagnosticResult> {
        Ok(self
            .diagnostics
            .write()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .traceroute(host, params))
    }

    /// Bandwidth probe.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an invalid URL.
    pub fn bandwidth(
        &self,
        test_url: Option<&str>,
        duration_seconds: Option<u64>,
    ) -> Result<DiagnosticResult> {
        self.diagnostics
            .write()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .bandwidth(test_url, duration_seconds)
    }

    /// DNS probe.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock; probe failures are recorded on the
    /// returned result.
    pub fn dns(
        &self,
        hostname: &str,
        dns_server: Option<&str>,
        record_type: Option<&str>,
    ) -> Result<DiagnosticResult> {
        Ok(self
            .diagnostics
            .write()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .dns(hostname, dns_server, record_type))
    }

    /// All stored diagnostic results, oldest first.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned lock.
    pub fn diagnostic_results(&self) -> Result<Vec<DiagnosticResult>> {
        Ok(self
            .diagnostics
            .read()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .results())
    }

    /// One diagnostic result by key.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown key.
    pub fn diagnostic_result(&self, key: &str) -> Result<DiagnosticResult> {
        self.diagnostics
            .read()
            .map_err(|_| Self::poisoned("diagnostics"))?
            .result(key)
            .ok_or_else(|| Error::NotFound(format!("diagnostic result {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::supervisor::test_driver::FakeDriver;
    use crate::state::connection::ConnectionState;
    use std::fs;
    use tempfile::TempDir;

    const GOOD_CONFIG: &str = "client\ndev tun\nproto udp\nremote 203.0.113.10 1194\n";

    fn manager() -> (Manager, TempDir, TempDir) {
        let profiles = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let manager =
            Manager::with_driver(profiles.path(), state.path(), Arc::new(FakeDriver::default()))
                .unwrap();
        (manager, profiles, state)
    }

    fn import(manager: &Manager, name: &str) -> VpnProfile {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(format!("{name}.ovpn"));
        fs::write(&path, GOOD_CONFIG).unwrap();
        manager.import_profile(&path, None).unwrap()
    }

    #[test]
    fn test_connect_unknown_profile() {
        let (manager, _p, _s) = manager();
        assert!(matches!(manager.connect("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_connect_marks_profile_active() {
        let (manager, _p, _s) = manager();
        let profile = import(&manager, "site-a");

        manager.connect(&profile.id).unwrap();
        let status = manager.connection_status().unwrap();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert!(manager.profile(&profile.id).unwrap().active);
        assert!(manager.monitoring_active());

        manager.disconnect().unwrap();
        assert!(!manager.profile(&profile.id).unwrap().active);
        manager.stop_monitoring();
    }

    #[test]
    fn test_enable_failover_is_atomic() {
        let (manager, _p, _s) = manager();
        let good = import(&manager, "site-a");

        // Unknown id refuses the whole enable.
        let err = manager
            .enable_failover(&[good.id.clone(), "ghost".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!manager.failover_status().unwrap().enabled);

        // An unvalidated profile refuses it too.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.ovpn");
        fs::write(&path, "client\ndev tun\n").unwrap();
        let bad = manager.import_profile(&path, None).unwrap();
        assert!(!bad.validated);
        let err = manager
            .enable_failover(&[good.id.clone(), bad.id.clone()], None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!manager.failover_status().unwrap().enabled);

        manager.enable_failover(&[good.id.clone()], None).unwrap();
        assert!(manager.failover_status().unwrap().enabled);
    }

    #[test]
    fn test_trigger_failover_switches_profiles() {
        let (manager, _p, _s) = manager();
        let a = import(&manager, "site-a");
        let b = import(&manager, "site-b");

        manager
            .enable_failover(&[a.id.clone(), b.id.clone()], None)
            .unwrap();
        manager.connect(&a.id).unwrap();

        let chosen = manager.trigger_failover().unwrap();
        assert_eq!(chosen, b.id);
        assert_eq!(
            manager.connection_status().unwrap().profile_id.as_deref(),
            Some(b.id.as_str())
        );
        assert!(manager.profile(&b.id).unwrap().active);
        assert!(!manager.profile(&a.id).unwrap().active);
        manager.stop_monitoring();
    }

    #[test]
    fn test_connect_with_failover_uses_rank_order() {
        let (manager, _p, _s) = manager();
        let a = import(&manager, "site-a");
        let b = import(&manager, "site-b");

        manager
            .enable_failover(&[a.id.clone(), b.id.clone()], None)
            .unwrap();
        let chosen = manager.connect_with_failover().unwrap();
        assert_eq!(chosen, a.id);
        manager.stop_monitoring();
    }

    #[test]
    fn test_set_health_thresholds_validated() {
        let (manager, _p, _s) = manager();
        let bad = HealthThresholds {
            max_latency_ms: 0.0,
            ..HealthThresholds::default()
        };
        assert!(matches!(
            manager.set_health_thresholds(bad),
            Err(Error::Validation(_))
        ));

        let good = HealthThresholds {
            max_latency_ms: 150.0,
            ..HealthThresholds::default()
        };
        manager.set_health_thresholds(good).unwrap();
        assert_eq!(manager.health_thresholds().unwrap().max_latency_ms, 150.0);
    }

    #[test]
    fn test_diagnostic_result_not_found() {
        let (manager, _p, _s) = manager();
        assert!(matches!(
            manager.diagnostic_result("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_monitoring_start_is_idempotent() {
        let (manager, _p, _s) = manager();
        manager.start_monitoring(Some(Duration::from_secs(10)));
        assert!(manager.monitoring_active());
        // Second start is a no-op, not a second loop.
        manager.start_monitoring(None);
        assert!(manager.monitoring_active());
        manager.stop_monitoring();
    }
}
