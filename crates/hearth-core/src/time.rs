//! Wall-clock time source with script freezing.
//!
//! Expiry math runs on unix-epoch milliseconds. While a script executes,
//! every `now_ms` call must observe the same value, so the clock can be
//! frozen for the duration of an evaluation and thawed afterwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel meaning "no expiry" in entry headers.
pub const NO_EXPIRY: u64 = 0;

/// Process clock. Cheap to share; freezing only touches one atomic.
#[derive(Debug, Default)]
pub struct Clock {
    /// When non-zero, the frozen timestamp returned by `now_ms`.
    frozen_ms: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current unix time in milliseconds, or the frozen value while a
    /// script evaluation is in progress.
    pub fn now_ms(&self) -> u64 {
        let frozen = self.frozen_ms.load(Ordering::Relaxed);
        if frozen != 0 {
            return frozen;
        }
        wall_ms()
    }

    /// Freezes the clock at the current wall time. Returns the frozen
    /// value so callers can log it.
    pub fn freeze(&self) -> u64 {
        let now = wall_ms();
        self.frozen_ms.store(now, Ordering::Relaxed);
        now
    }

    pub fn unfreeze(&self) {
        self.frozen_ms.store(0, Ordering::Relaxed);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_ms.load(Ordering::Relaxed) != 0
    }
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_when_unfrozen() {
        let clock = Clock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a + 4);
    }

    #[test]
    fn frozen_clock_is_constant() {
        let clock = Clock::new();
        let frozen = clock.freeze();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now_ms(), frozen);
        clock.unfreeze();
        assert!(clock.now_ms() >= frozen);
    }
}
