//! Clock sources
//!
//! Shuffle sharding compares instance registration times against "now", so
//! the distributor takes its time from an injected [`Clock`] rather than
//! reading the wall clock directly.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never goes backward.
#[derive(Debug, Default)]
pub struct SystemClock {
    /// Largest timestamp handed out so far (nanos)
    high_water_ns: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonically increasing nanosecond timestamp.
    ///
    /// If the wall clock steps back, returns the previous high-water mark + 1ns.
    pub fn now_nanos(&self) -> i64 {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        loop {
            let prev = self.high_water_ns.load(Ordering::Acquire);
            let ts = wall.max(prev + 1);
            if self
                .high_water_ns
                .compare_exchange_weak(prev, ts, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return ts;
            }
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.now_nanos())
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let mut prev = 0i64;
        for _ in 0..100 {
            let ts = clock.now_nanos();
            assert!(ts > prev, "timestamps must be strictly increasing");
            prev = ts;
        }
        assert!(clock.now().timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_system_clock_concurrent_monotonicity() {
        let clock = Arc::new(SystemClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = clock.clone();
                std::thread::spawn(move || {
                    let mut prev = 0i64;
                    for _ in 0..1000 {
                        let ts = c.now_nanos();
                        assert!(ts > prev);
                        prev = ts;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
