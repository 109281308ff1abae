//! Consumer pools with fixed latency profiles.
//!
//! A consumer task never looks at the data it is handed. It holds the host's
//! write slot for a random duration and reports success. Blocking tasks take
//! about two seconds per family, slower than the generator produces, so they
//! stall; non-blocking tasks average half a second and keep up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{ThrottleError, ThrottleResult};
use crate::host::{MetricSink, UserData};
use crate::series::MetricFamily;

/// Uniform latency range a consumer sleeps for on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub min: Duration,
    pub max: Duration,
}

impl LatencyProfile {
    /// One to three seconds per write.
    pub const BLOCKING: LatencyProfile = LatencyProfile {
        min: Duration::from_secs(1),
        max: Duration::from_secs(3),
    };

    /// Up to one second per write.
    pub const NON_BLOCKING: LatencyProfile = LatencyProfile {
        min: Duration::ZERO,
        max: Duration::from_secs(1),
    };

    /// Draw a duration uniformly from `[min, max]` at microsecond resolution.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.min.as_micros() as u64;
        let max = self.max.as_micros() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_micros(rng.gen_range(min..=max))
    }

    /// Midpoint of the range.
    pub fn mean(&self) -> Duration {
        (self.min + self.max) / 2
    }
}

/// Which pool a consumer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Slower than production.
    Blocking,
    /// Faster than production.
    NonBlocking,
}

impl PoolKind {
    /// Name every task of this pool is registered under.
    pub fn registration_name(&self) -> &'static str {
        match self {
            PoolKind::Blocking => "write_throttle_block",
            PoolKind::NonBlocking => "write_throttle_non_block",
        }
    }

    pub fn latency(&self) -> LatencyProfile {
        match self {
            PoolKind::Blocking => LatencyProfile::BLOCKING,
            PoolKind::NonBlocking => LatencyProfile::NON_BLOCKING,
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::Blocking => write!(f, "blocking"),
            PoolKind::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// One registered consumer instance.
#[derive(Debug)]
pub struct ConsumerTask {
    index: usize,
    profile: LatencyProfile,
    invocations: AtomicU64,
    busy_micros: AtomicU64,
}

impl ConsumerTask {
    pub fn new(index: usize, profile: LatencyProfile) -> Self {
        Self {
            index,
            profile,
            invocations: AtomicU64::new(0),
            busy_micros: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn profile(&self) -> LatencyProfile {
        self.profile
    }

    /// Completed writes.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Total time spent sleeping in writes.
    pub fn busy_time(&self) -> Duration {
        Duration::from_micros(self.busy_micros.load(Ordering::Relaxed))
    }
}

impl MetricSink for ConsumerTask {
    fn write(&self, family: &MetricFamily, _user_data: Option<&UserData>) -> ThrottleResult<()> {
        let delay = self.profile.sample(&mut rand::thread_rng());
        trace!(task = self.index, series = %family.name, delay_ms = delay.as_millis() as u64, "Consumer holding write slot");

        std::thread::sleep(delay);

        self.busy_micros.fetch_add(delay.as_micros() as u64, Ordering::Relaxed);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Most tasks one pool will hold. Each task gets its own host worker.
pub const MAX_POOL_SIZE: usize = 4096;

/// A fixed-size set of consumer tasks sharing one latency profile.
#[derive(Debug)]
pub struct ConsumerPool {
    kind: PoolKind,
    tasks: Vec<Arc<ConsumerTask>>,
}

impl ConsumerPool {
    /// Build `count` independent tasks.
    ///
    /// Counts above [`MAX_POOL_SIZE`], or that cannot be allocated, are
    /// refused with [`ThrottleError::Registration`].
    pub fn new(kind: PoolKind, count: usize) -> ThrottleResult<Self> {
        let refuse = |reason: String| {
            warn!(pool = %kind, count, reason = %reason, "Refusing consumer pool");
            ThrottleError::Registration {
                name: kind.registration_name().to_string(),
                reason,
            }
        };

        if count > MAX_POOL_SIZE {
            return Err(refuse(format!(
                "{count} tasks requested, at most {MAX_POOL_SIZE} allowed"
            )));
        }

        let mut tasks: Vec<Arc<ConsumerTask>> = Vec::new();
        tasks
            .try_reserve_exact(count)
            .map_err(|err| refuse(err.to_string()))?;

        let profile = kind.latency();
        tasks.extend((0..count).map(|index| Arc::new(ConsumerTask::new(index, profile))));
        debug!(pool = %kind, count, "Built consumer pool");
        Ok(Self { kind, tasks })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn tasks(&self) -> &[Arc<ConsumerTask>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Completed writes across the pool.
    pub fn invocations(&self) -> u64 {
        self.tasks.iter().map(|t| t.invocations()).sum()
    }
}
