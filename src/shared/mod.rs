pub mod fs_atomic;
pub mod ids;
pub mod logging;

/// Unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unix milliseconds, for rate windows and trace timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
