//! Plugin lifecycle: configure, then register with a host.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ThrottleConfig;
use crate::consumer::{ConsumerPool, PoolKind};
use crate::error::{ThrottleError, ThrottleResult};
use crate::generator::{MetricGenerator, GENERATOR_NAME};
use crate::host::HostPipeline;

/// Name the plugin registers its configuration under.
pub const PLUGIN_NAME: &str = "write_throttle";

/// What a successful registration handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub blocking: usize,
    pub non_blocking: usize,
    pub generator: bool,
}

/// The write-throttle harness.
///
/// Owns the generator and both consumer pools. The host drives all of them
/// after [`register`](Self::register); the harness itself never schedules.
pub struct WriteThrottle {
    config: ThrottleConfig,
    generator: Arc<MetricGenerator>,
    blocking: ConsumerPool,
    non_blocking: ConsumerPool,
}

impl WriteThrottle {
    /// Build from a finished configuration, on the system clock.
    pub fn new(config: ThrottleConfig) -> ThrottleResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Fails when either pool size is refused by [`ConsumerPool::new`].
    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> ThrottleResult<Self> {
        Ok(Self {
            generator: Arc::new(MetricGenerator::with_clock(clock)),
            blocking: ConsumerPool::new(PoolKind::Blocking, config.blocking)?,
            non_blocking: ConsumerPool::new(PoolKind::NonBlocking, config.non_blocking)?,
            config,
        })
    }

    /// Apply host-provided options and build the harness.
    ///
    /// Rejected options are logged and returned; they never stop the rest.
    /// A pool size that cannot be built fails the whole call, since nothing
    /// has been registered yet. A `TriggerAsan = true` option aborts the
    /// process in here, before anything could be registered.
    pub fn configure<I, K, V>(options: I) -> ThrottleResult<(Self, Vec<ThrottleError>)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (config, errors) = ThrottleConfig::from_pairs(options);
        for err in &errors {
            warn!(plugin = PLUGIN_NAME, error = %err, status = err.status(), "Configuration option rejected");
        }
        Ok((Self::new(config)?, errors))
    }

    /// Register every consumer instance and the generator with `host`.
    #[instrument(skip_all, fields(plugin = PLUGIN_NAME))]
    pub fn register(&self, host: &dyn HostPipeline) -> ThrottleResult<Registration> {
        info!(
            count = self.blocking.len(),
            "Spawning {} write threads that will block",
            self.blocking.len()
        );
        for task in self.blocking.tasks() {
            host.register_write(PoolKind::Blocking.registration_name(), task.clone(), None)?;
        }

        info!(
            count = self.non_blocking.len(),
            "Spawning {} write threads that will not block",
            self.non_blocking.len()
        );
        for task in self.non_blocking.tasks() {
            host.register_write(PoolKind::NonBlocking.registration_name(), task.clone(), None)?;
        }

        host.register_read(GENERATOR_NAME, self.generator.clone())?;

        Ok(Registration {
            blocking: self.blocking.len(),
            non_blocking: self.non_blocking.len(),
            generator: true,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn generator(&self) -> &Arc<MetricGenerator> {
        &self.generator
    }

    pub fn pool(&self, kind: PoolKind) -> &ConsumerPool {
        match kind {
            PoolKind::Blocking => &self.blocking,
            PoolKind::NonBlocking => &self.non_blocking,
        }
    }
}
