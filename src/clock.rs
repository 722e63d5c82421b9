use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source for TTL accounting and RRSIG validity windows.
///
/// Swappable so cache expiry and signature-period tests run against a
/// deterministic clock.
pub trait Clock: Send + Sync + Debug {
    /// Current wall time as seconds since the Unix epoch.
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
