//! time capability for the control loop
//!
//! timers run on monotonic uptime; published records carry wall-clock seconds.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// milliseconds since the node started
    fn uptime_ms(&self) -> u64;
    /// seconds since the unix epoch
    fn epoch_secs(&self) -> u64;
}

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn epoch_secs(&self) -> u64 {
        // a clock before 1970 means ntp has not synced yet
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub mod manual {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// hand-cranked clock for deterministic tests
    #[derive(Clone)]
    pub struct ManualClock {
        uptime_ms: Arc<AtomicU64>,
        epoch_base: u64,
    }

    impl ManualClock {
        pub fn new(epoch_base: u64) -> Self {
            Self { uptime_ms: Arc::new(AtomicU64::new(0)), epoch_base }
        }

        pub fn advance(&self, by: Duration) {
            self.uptime_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn uptime_ms(&self) -> u64 {
            self.uptime_ms.load(Ordering::SeqCst)
        }

        fn epoch_secs(&self) -> u64 {
            self.epoch_base + self.uptime_ms() / 1000
        }
    }
}
