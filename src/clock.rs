//! Wall-clock time for report timestamps.

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Datelike, Timelike, Utc};
use embassy_time::Instant;
use heapless::String;
use log::info;

pub type Timestamp = String<32>;

/// Source of the current UNIX time in seconds
pub trait Clock {
    fn unix_time(&self) -> u64;
}

/// Uptime-based clock that can be pinned to real time once a time server
/// answers. Until then it reports seconds since boot, i.e. dates in 1970.
pub struct SystemClock {
    boot_epoch: AtomicU32,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self {
            boot_epoch: AtomicU32::new(0),
        }
    }

    /// Align the clock with `unix_now` (seconds) reported by an external source
    pub fn synchronize(&self, unix_now: u64) {
        let boot = unix_now.saturating_sub(Instant::now().as_secs());
        self.boot_epoch.store(boot as u32, Ordering::Relaxed);
        info!("[CLOCK] Synchronized to {}", unix_now);
    }

    pub fn is_synchronized(&self) -> bool {
        self.boot_epoch.load(Ordering::Relaxed) != 0
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn unix_time(&self) -> u64 {
        self.boot_epoch.load(Ordering::Relaxed) as u64 + Instant::now().as_secs()
    }
}

/// ISO-8601 UTC with second resolution, e.g. `2024-05-01T12:00:00Z`
pub fn format_timestamp(unix_time: u64) -> Timestamp {
    let mut out = Timestamp::new();
    let time = i64::try_from(unix_time)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default();

    // 20 characters always fit
    let _ = write!(
        out,
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0).as_str(), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_714_564_800).as_str(), "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_unsynchronized_clock_reports_uptime() {
        let clock = SystemClock::new();
        assert!(!clock.is_synchronized());
        assert!(clock.unix_time() < 1_000_000);
    }

    #[test]
    fn test_synchronize() {
        let clock = SystemClock::new();
        clock.synchronize(1_714_564_800);

        assert!(clock.is_synchronized());
        assert!(clock.unix_time() >= 1_714_564_800);
    }
}
