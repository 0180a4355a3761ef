use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::subsys::{SimTime, TickSource};

const NOT_STARTED: u64 = u64::MAX;

/// Wall-clock [`TickSource`].
///
/// Seconds and ticks both count from `init`; `ticks` is the running total at
/// `ticks_per_second`, not the fraction of the current second. Reading the
/// clock takes no lock: `init` records its start as a nanosecond offset from
/// a fixed epoch.
pub struct SoftTicks {
    epoch: OnceLock<Instant>,
    start_nanos: AtomicU64,
    ticks_per_second: AtomicU64,
}

impl Default for SoftTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTicks {
    pub fn new() -> Self {
        Self {
            epoch: OnceLock::new(),
            start_nanos: AtomicU64::new(NOT_STARTED),
            ticks_per_second: AtomicU64::new(0),
        }
    }
}

impl TickSource for SoftTicks {
    fn init(&self, ticks_per_second: u64) {
        let epoch = self.epoch.get_or_init(Instant::now);
        self.ticks_per_second.store(ticks_per_second, Ordering::Relaxed);
        self.start_nanos
            .store(epoch.elapsed().as_nanos() as u64, Ordering::Release);
    }

    fn now(&self) -> SimTime {
        let start = self.start_nanos.load(Ordering::Acquire);
        let Some(epoch) = self.epoch.get().filter(|_| start != NOT_STARTED) else {
            return SimTime::default();
        };
        let elapsed = (epoch.elapsed().as_nanos() as u64).saturating_sub(start);
        let tps = self.ticks_per_second.load(Ordering::Relaxed) as u128;
        SimTime {
            seconds: elapsed / 1_000_000_000,
            ticks: (elapsed as u128 * tps / 1_000_000_000) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_uninitialized_is_zero() {
        assert_eq!(SoftTicks::new().now(), SimTime::default());
    }

    #[test]
    fn test_ticks_advance() {
        let ticks = SoftTicks::new();
        ticks.init(1000);
        std::thread::sleep(Duration::from_millis(20));
        let t = ticks.now();
        assert_eq!(t.seconds, 0);
        assert!(t.ticks >= 20, "{t:?}");
    }

    #[test]
    fn test_reinit_restarts_count() {
        let ticks = SoftTicks::new();
        ticks.init(1000);
        std::thread::sleep(Duration::from_millis(50));
        ticks.init(1000);
        assert!(ticks.now().ticks < 50, "{:?}", ticks.now());
    }

    #[test]
    fn test_read_from_many_threads() {
        let ticks = Arc::new(SoftTicks::new());
        ticks.init(1_000_000);
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ticks = ticks.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..1000 {
                        let t = ticks.now().ticks;
                        assert!(t >= last);
                        last = t;
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
