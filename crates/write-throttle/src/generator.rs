//! Synthetic gauge generator.
//!
//! Each invocation walks the series list at most once, emitting one point per
//! elapsed second while the cursor is behind the clock. The point's value is
//! the cursor second it stands for. An idle period is therefore caught up one
//! series per second, never more than one full pass per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::ThrottleResult;
use crate::host::{Dispatcher, MetricSource};
use crate::series::{MetricFamily, SERIES_NAMES};

/// Registration name of the generator.
pub const GENERATOR_NAME: &str = "write_throttle_generator";

/// Read-side work unit producing gauges for the named series.
pub struct MetricGenerator {
    clock: Arc<dyn Clock>,

    /// Last second for which points were emitted; `None` until first use.
    cursor: Mutex<Option<i64>>,

    emitted: AtomicU64,
    dispatch_failures: AtomicU64,
}

impl MetricGenerator {
    /// Generator on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cursor: Mutex::new(None),
            emitted: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
        }
    }

    /// Advance the cursor and return the families that became due.
    ///
    /// The first call only pins the cursor to the current second.
    pub fn collect(&self) -> Vec<MetricFamily> {
        let now = self.clock.now_secs();
        let mut cursor = self.cursor.lock();
        let prev = cursor.get_or_insert(now);

        let mut families = Vec::new();
        for name in SERIES_NAMES {
            if *prev >= now {
                break;
            }
            families.push(MetricFamily::gauge(name, *prev as f64));
            *prev += 1;
        }

        self.emitted.fetch_add(families.len() as u64, Ordering::Relaxed);
        trace!(count = families.len(), cursor = *prev, now, "Generator pass");
        families
    }

    /// Last second covered, if the generator has run.
    pub fn cursor(&self) -> Option<i64> {
        *self.cursor.lock()
    }

    /// Families produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Families the host refused.
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }
}

impl Default for MetricGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for MetricGenerator {
    fn read(&self, dispatcher: &dyn Dispatcher) -> ThrottleResult<()> {
        for family in self.collect() {
            let series = family.name.clone();
            if let Err(err) = dispatcher.dispatch(family) {
                self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    series = %series,
                    error = %err,
                    "write_throttle plugin: dispatching metric family failed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ThrottleError;

    const START: i64 = 1_700_000_000;

    fn generator_at(start: i64) -> (Arc<ManualClock>, MetricGenerator) {
        let clock = Arc::new(ManualClock::new(start));
        let generator = MetricGenerator::with_clock(clock.clone());
        (clock, generator)
    }

    struct Refuse;

    impl Dispatcher for Refuse {
        fn dispatch(&self, family: MetricFamily) -> ThrottleResult<()> {
            Err(ThrottleError::Dispatch {
                series: family.name,
                reason: "full".into(),
            })
        }
    }

    #[test]
    fn first_call_pins_cursor_without_backlog() {
        let (_, generator) = generator_at(START);
        assert_eq!(generator.cursor(), None);
        assert!(generator.collect().is_empty());
        assert_eq!(generator.cursor(), Some(START));
    }

    #[test]
    fn no_elapsed_time_means_no_points() {
        let (_, generator) = generator_at(START);
        generator.collect();
        for _ in 0..5 {
            assert!(generator.collect().is_empty());
        }
        assert_eq!(generator.cursor(), Some(START));
        assert_eq!(generator.emitted(), 0);
    }

    #[test]
    fn catch_up_emits_one_series_per_second() {
        let (clock, generator) = generator_at(START);
        generator.collect();
        clock.advance(4);

        let families = generator.collect();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol", "dave"]);

        let values: Vec<_> = families.iter().map(|f| f.value).collect();
        assert_eq!(
            values,
            [START as f64, (START + 1) as f64, (START + 2) as f64, (START + 3) as f64]
        );
        assert_eq!(generator.cursor(), Some(START + 4));
    }

    #[test]
    fn each_call_restarts_at_first_series() {
        let (clock, generator) = generator_at(START);
        generator.collect();

        clock.advance(1);
        assert_eq!(generator.collect()[0].name, "alice");
        clock.advance(1);
        assert_eq!(generator.collect()[0].name, "alice");
    }

    #[test]
    fn long_idle_is_capped_at_one_pass() {
        let (clock, generator) = generator_at(START);
        generator.collect();
        clock.advance(25);

        assert_eq!(generator.collect().len(), SERIES_NAMES.len());
        assert_eq!(generator.cursor(), Some(START + 10));
        assert_eq!(generator.collect().len(), SERIES_NAMES.len());
        assert_eq!(generator.collect().len(), 5);
        assert!(generator.collect().is_empty());
        assert_eq!(generator.emitted(), 25);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let (clock, generator) = generator_at(START);
        generator.collect();
        clock.advance(3);
        generator.collect();
        clock.set(START - 100);
        assert!(generator.collect().is_empty());
        assert_eq!(generator.cursor(), Some(START + 3));
    }

    #[test]
    fn dispatch_failures_are_counted_and_generation_continues() {
        let (clock, generator) = generator_at(START);
        generator.read(&Refuse).unwrap();
        clock.advance(3);

        generator.read(&Refuse).unwrap();
        assert_eq!(generator.dispatch_failures(), 3);
        assert_eq!(generator.cursor(), Some(START + 3));

        clock.advance(1);
        generator.read(&Refuse).unwrap();
        assert_eq!(generator.emitted(), 4);
    }

    #[test]
    fn concurrent_reads_do_not_double_advance() {
        let (clock, generator) = generator_at(START);
        let generator = Arc::new(generator);
        generator.collect();
        clock.advance(10);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || generator.collect().len())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 10);
        assert_eq!(generator.cursor(), Some(START + 10));
    }
}
