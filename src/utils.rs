//! Shared helpers: deadline-bound subprocess execution, name resolution with
//! a timeout, and small formatting utilities.

use std::net::{IpAddr, ToSocketAddrs};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logger::{self, LogLevel};

/// Run a command to completion with a hard deadline.
///
/// The child is spawned with piped output and waited on from a worker
/// thread; if the deadline expires the process is killed and
/// [`Error::Timeout`] is returned.
///
/// # Errors
///
/// Returns [`Error::External`] when the command cannot be spawned and
/// [`Error::Timeout`] when the deadline expires.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::external(program, e))?;

    let pid = child.id();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::external(program, e)),
        Err(_) => {
            kill_pid(pid);
            Err(Error::Timeout {
                command: program.to_string(),
                timeout,
            })
        }
    }
}

/// Run a command and return its stdout as a trimmed string, or `None` on any
/// failure. Used for best-effort system probes.
pub fn cmd_stdout(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let output = run_command(program, args, timeout).ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Force-kill a process by pid.
pub fn kill_pid(pid: u32) {
    let _ = Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .status();
}

/// Resolve a hostname with a deadline.
///
/// The resolver call runs on a worker thread and is raced against the
/// deadline; the straggler thread is abandoned if it loses the race.
///
/// # Errors
///
/// Returns a human-readable message when resolution fails or the deadline
/// expires.
pub fn resolve_host(host: &str, timeout: Duration) -> std::result::Result<Vec<IpAddr>, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let (tx, rx) = mpsc::channel();
    let host_owned = host.to_string();
    thread::spawn(move || {
        let result = (host_owned.as_str(), 0u16)
            .to_socket_addrs()
            .map(|addrs| addrs.map(|a| a.ip()).collect::<Vec<_>>())
            .map_err(|e| e.to_string());
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(ips)) if !ips.is_empty() => Ok(ips),
        Ok(Ok(_)) => Err(format!("no addresses for {host}")),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(format!("resolution of {host} timed out")),
    }
}

/// Best-effort file removal; missing files are fine, other failures are
/// logged as warnings.
pub fn remove_file_quiet(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            logger::log(
                LogLevel::Warning,
                "IO",
                format!("failed to remove {}: {e}", path.display()),
            );
        }
    }
}

/// Format a duration as a compact human-readable string.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 86_400 {
        format!("{}d {:02}h", secs / 86_400, (secs % 86_400) / 3600)
    } else if secs >= 3600 {
        format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else {
        format!("00:{:02}:{:02}", secs / 60, secs % 60)
    }
}

/// Reduce a file stem to a filesystem- and id-safe token.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "profile".to_string()
    } else {
        cleaned
    }
}
