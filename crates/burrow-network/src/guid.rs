//! Monotonic suffix source for service GUIDs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces strictly increasing suffixes for GUID generation.
///
/// Production networks fuse wall-clock milliseconds with a monotonic
/// floor, so suffixes stay unique even when two registrations land in the
/// same millisecond. Tests install a fixed epoch to get predictable GUIDs.
#[derive(Debug)]
pub struct GuidSuffixSource {
    last: AtomicU64,
    clock: fn() -> u64,
}

impl GuidSuffixSource {
    /// Suffixes derived from the wall clock.
    pub fn wall_clock() -> Self {
        Self {
            last: AtomicU64::new(0),
            clock: unix_millis,
        }
    }

    /// Deterministic suffixes `epoch + 1, epoch + 2, …` for tests.
    pub fn fixed(epoch: u64) -> Self {
        Self {
            last: AtomicU64::new(epoch),
            clock: || 0,
        }
    }

    /// Next suffix: the clock reading, bumped past every prior suffix.
    pub fn next(&self) -> u64 {
        let now = (self.clock)();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => prev = observed,
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_counts_up() {
        let source = GuidSuffixSource::fixed(100);
        assert_eq!(source.next(), 101);
        assert_eq!(source.next(), 102);
        assert_eq!(source.next(), 103);
    }

    #[test]
    fn wall_clock_source_is_strictly_increasing() {
        let source = GuidSuffixSource::wall_clock();
        let mut prev = 0;
        for _ in 0..1_000 {
            let next = source.next();
            assert!(next > prev);
            prev = next;
        }
    }
}
