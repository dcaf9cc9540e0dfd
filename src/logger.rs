//! Scoped, leveled logging.
//!
//! Log lines are written to stderr and, once [`init_file`] has been called,
//! mirrored into a log file. Scopes are short uppercase tags naming the
//! subsystem (PARSE, STORE, CONN, HEALTH, FAILOVER, DIAG).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    const fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warning => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable or disable debug-level output.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

/// Mirror log output into the given file (append mode).
///
/// # Errors
///
/// Returns an error if the file cannot be opened or created.
pub fn init_file(path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = LOG_FILE.set(Mutex::new(file));
    Ok(())
}

/// Write a log line.
pub fn log(level: LogLevel, scope: &str, message: impl AsRef<str>) {
    if level == LogLevel::Debug && !VERBOSE.load(Ordering::Relaxed) {
        return;
    }

    let line = format!(
        "[{}] [{}] [{}] {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
        level.tag(),
        scope,
        message.as_ref()
    );

    eprintln!("{line}");

    if let Some(file) = LOG_FILE.get() {
        if let Ok(mut file) = file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_tags_aligned() {
        // All tags render at the same width so columns line up.
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
        ] {
            assert_eq!(level.tag().len(), 5);
        }
    }

    #[test]
    fn test_log_does_not_panic_without_file() {
        log(LogLevel::Info, "TEST", "no file sink configured");
    }
}
