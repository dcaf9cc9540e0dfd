//! OpenVPN subprocess driver.
//!
//! Abstracts launching, liveness-probing and terminating the external
//! OpenVPN process behind the [`ProcessDriver`] trait so the supervisor can
//! be exercised against a scripted driver in tests.

use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;

use crate::constants;
use crate::error::{Error, Result};
use crate::logger::{self, LogLevel};
use crate::state::connection::RunPaths;
use crate::state::profile::{AuthUserPass, VpnProfile};
use crate::utils;

/// Fields extracted from the OpenVPN status file. Missing fields are not
/// errors; OpenVPN rewrites the file every 10 seconds and early rewrites may
/// be incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFields {
    pub local_ip: Option<String>,
    pub remote_ip: Option<String>,
}

/// Launch, probe and terminate the tunnel process.
pub trait ProcessDriver: Send + Sync {
    /// Start the process for a rendered config. Returns the direct child
    /// handle when one exists (the daemonized process re-parents, so the
    /// pid file is the authoritative handle afterwards).
    fn launch(&self, profile: &VpnProfile, paths: &RunPaths) -> Result<Option<Child>>;

    /// Probe liveness via the pid-file handshake.
    fn is_alive(&self, paths: &RunPaths) -> bool;

    /// Terminate the process: interrupt, grace period, kill, orphan sweep.
    fn stop(&self, profile_id: &str, paths: &RunPaths, child: Option<&mut Child>) -> Result<()>;
}

/// The real driver wrapping the `openvpn` binary.
#[derive(Debug, Default)]
pub struct OpenVpnDriver;

impl OpenVpnDriver {
    /// Fixed launch arguments around the rendered config.
    fn launch_args(profile: &VpnProfile, paths: &RunPaths) -> Vec<String> {
        let mut args = vec![
            "--config".to_string(),
            paths.config_file.display().to_string(),
            "--daemon".to_string(),
            "--log".to_string(),
            paths.log_file.display().to_string(),
            "--writepid".to_string(),
            paths.pid_file.display().to_string(),
            "--status".to_string(),
            paths.status_file.display().to_string(),
            constants::OPENVPN_STATUS_INTERVAL.to_string(),
            "--script-security".to_string(),
            "2".to_string(),
            "--up-delay".to_string(),
            "--up-restart".to_string(),
            "--connect-retry-max".to_string(),
            constants::OPENVPN_CONNECT_RETRY_MAX.to_string(),
            "--connect-retry".to_string(),
            constants::OPENVPN_CONNECT_RETRY_SECS.to_string(),
            "--verb".to_string(),
            constants::OPENVPN_VERBOSITY.to_string(),
        ];

        if let AuthUserPass::File(path) = &profile.auth_user_pass {
            args.push("--auth-user-pass".to_string());
            args.push(path.clone());
        }

        args
    }
}

impl ProcessDriver for OpenVpnDriver {
    fn launch(&self, profile: &VpnProfile, paths: &RunPaths) -> Result<Option<Child>> {
        let args = Self::launch_args(profile, paths);
        let child = Command::new("openvpn")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::external("openvpn", e))?;

        logger::log(
            LogLevel::Info,
            "PROC",
            format!(
                "started openvpn (pid {}) for profile {}",
                child.id(),
                profile.id
            ),
        );
        Ok(Some(child))
    }

    fn is_alive(&self, paths: &RunPaths) -> bool {
        match read_pid(&paths.pid_file) {
            Some(pid) => signal_zero(pid),
            None => false,
        }
    }

    fn stop(&self, profile_id: &str, paths: &RunPaths, child: Option<&mut Child>) -> Result<()> {
        if let Some(pid) = read_pid(&paths.pid_file) {
            logger::log(
                LogLevel::Info,
                "PROC",
                format!("terminating openvpn pid {pid}"),
            );
            send_signal(pid, "-INT");
            thread::sleep(constants::STOP_GRACE_PERIOD);
            if signal_zero(pid) {
                send_signal(pid, "-KILL");
            }
        }

        // Fallback: the retained direct child, for the window before the
        // daemonized process writes its pid file.
        if let Some(child) = child {
            if matches!(child.try_wait(), Ok(None)) {
                send_signal(child.id(), "-INT");
                thread::sleep(constants::STOP_GRACE_PERIOD);
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        // Name-pattern sweep for orphans left behind by earlier runs. The
        // appliance manages a single tunnel, so surviving openvpn processes
        // at this point are ours.
        let _ = stop_service("openvpn");

        #[cfg(feature = "orphan-sweep")]
        {
            // Last resort: argv-pattern sweep. Can reap unrelated processes
            // if the profile id collides with an argv substring.
            let pattern = format!("openvpn.*{profile_id}");
            let _ = utils::run_command(
                "pkill",
                &["-KILL", "-f", &pattern],
                constants::PROBE_COMMAND_TIMEOUT,
            );
        }
        #[cfg(not(feature = "orphan-sweep"))]
        let _ = profile_id;

        Ok(())
    }
}

fn read_pid(pid_file: &Path) -> Option<u32> {
    fs::read_to_string(pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
}

/// Null-signal probe: does the process exist?
fn signal_zero(pid: u32) -> bool {
    utils::run_command(
        "kill",
        &["-0", &pid.to_string()],
        constants::PROBE_COMMAND_TIMEOUT,
    )
    .map(|output| output.status.success())
    .unwrap_or(false)
}

fn send_signal(pid: u32, signal: &str) {
    let _ = utils::run_command(
        "kill",
        &[signal, &pid.to_string()],
        constants::PROBE_COMMAND_TIMEOUT,
    );
}

/// Stop a co-managed sibling service by process name. The reverse proxy is
/// reloaded rather than killed so in-flight requests survive.
pub fn stop_service(name: &str) -> Result<()> {
    if name == "nginx" {
        let output = utils::run_command("nginx", &["-s", "reload"], constants::PROBE_COMMAND_TIMEOUT)?;
        if !output.status.success() {
            return Err(Error::external(
                "nginx",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        return Ok(());
    }

    let _ = utils::run_command(
        "pkill",
        &["-TERM", "-x", name],
        constants::PROBE_COMMAND_TIMEOUT,
    );
    thread::sleep(constants::STOP_GRACE_PERIOD);
    let _ = utils::run_command(
        "pkill",
        &["-KILL", "-x", name],
        constants::PROBE_COMMAND_TIMEOUT,
    );
    Ok(())
}

/// Parse OpenVPN status-file content.
#[must_use]
pub fn parse_status_content(content: &str) -> StatusFields {
    let mut fields = StatusFields::default();

    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Virtual Address,") {
            let value = rest.split(',').next().unwrap_or("").trim();
            if !value.is_empty() {
                fields.local_ip = Some(value.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("Real Address,") {
            let value = rest.split(',').next().unwrap_or("").trim();
            if !value.is_empty() {
                fields.remote_ip = Some(value.to_string());
            }
        }
    }

    fields
}

/// Read and parse the status file; `None` when it does not exist yet.
#[must_use]
pub fn read_status_file(path: &Path) -> Option<StatusFields> {
    fs::read_to_string(path)
        .ok()
        .map(|content| parse_status_content(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_paths() -> RunPaths {
        RunPaths::for_profile(Path::new("/tmp/tw-test"), "p_1")
    }

    #[test]
    fn test_launch_args_shape() {
        let profile = VpnProfile::new("p_1".into(), "p".into(), "p.ovpn".into());
        let paths = test_paths();
        let args = OpenVpnDriver::launch_args(&profile, &paths);

        assert_eq!(args[0], "--config");
        assert_eq!(args[1], "/tmp/tw-test/temp_p_1.ovpn");
        assert!(args.contains(&"--daemon".to_string()));
        let status_pos = args.iter().position(|a| a == "--status").unwrap();
        assert_eq!(args[status_pos + 2], "10");
        assert!(!args.contains(&"--auth-user-pass".to_string()));
    }

    #[test]
    fn test_launch_args_with_auth_file() {
        let mut profile = VpnProfile::new("p_1".into(), "p".into(), "p.ovpn".into());
        profile.auth_user_pass = AuthUserPass::File("/etc/vpn/creds".into());
        let args = OpenVpnDriver::launch_args(&profile, &test_paths());
        let pos = args.iter().position(|a| a == "--auth-user-pass").unwrap();
        assert_eq!(args[pos + 1], "/etc/vpn/creds");
    }

    #[test]
    fn test_prompt_auth_adds_no_file_argument() {
        let mut profile = VpnProfile::new("p_1".into(), "p".into(), "p.ovpn".into());
        profile.auth_user_pass = AuthUserPass::Prompt;
        let args = OpenVpnDriver::launch_args(&profile, &test_paths());
        assert!(!args.contains(&"--auth-user-pass".to_string()));
    }

    #[test]
    fn test_parse_status_content() {
        let content = "OpenVPN STATISTICS\n\
                       Updated,2024-01-01 00:00:00\n\
                       Virtual Address,10.8.0.6\n\
                       Real Address,198.51.100.4:1194\n\
                       END\n";
        let fields = parse_status_content(content);
        assert_eq!(fields.local_ip.as_deref(), Some("10.8.0.6"));
        assert_eq!(fields.remote_ip.as_deref(), Some("198.51.100.4:1194"));
    }

    #[test]
    fn test_parse_status_missing_fields_not_an_error() {
        let fields = parse_status_content("OpenVPN STATISTICS\nEND\n");
        assert_eq!(fields, StatusFields::default());
    }

    #[test]
    fn test_is_alive_without_pid_file() {
        let driver = OpenVpnDriver;
        let paths = RunPaths::for_profile(Path::new("/nonexistent-dir"), "ghost");
        assert!(!driver.is_alive(&paths));
    }

    #[test]
    fn test_read_pid_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file: PathBuf = dir.path().join("pid");
        fs::write(&pid_file, "not-a-pid\n").unwrap();
        assert_eq!(read_pid(&pid_file), None);
        fs::write(&pid_file, " 4242 \n").unwrap();
        assert_eq!(read_pid(&pid_file), Some(4242));
    }

    #[test]
    fn test_read_status_file_absent() {
        assert!(read_status_file(Path::new("/nonexistent/status")).is_none());
    }
}
