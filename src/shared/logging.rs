use chrono::{SecondsFormat, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn scheduler_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/scheduler.log")
}

/// Best-effort diagnostics log. Callers treat failures as non-fatal.
pub fn append_scheduler_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = scheduler_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    writeln!(file, "{stamp} {line}")
}
