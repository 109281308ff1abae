//! Host pipeline boundary.
//!
//! The harness never schedules anything itself. It hands work units to a
//! host that owns the timers, the worker contexts and the dispatch queue:
//! - [`MetricSource`]: pulled periodically, pushes families via a [`Dispatcher`]
//! - [`MetricSink`]: pushed one family at a time, returns success or failure
//!
//! [`local::LocalPipeline`] is a small in-process host for tests and demos.

pub mod local;

pub use local::{LocalPipeline, PipelineStats, SinkStats};

use std::any::Any;
use std::sync::Arc;

use crate::error::ThrottleResult;
use crate::series::MetricFamily;

/// Opaque per-registration data handed back to a sink on every write.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Accepts metric families into the host pipeline.
pub trait Dispatcher: Send + Sync {
    /// Queue a family for delivery to every registered sink.
    fn dispatch(&self, family: MetricFamily) -> ThrottleResult<()>;
}

/// Read side: invoked by the host on its own timer.
pub trait MetricSource: Send + Sync {
    /// Produce whatever is due and dispatch it.
    fn read(&self, dispatcher: &dyn Dispatcher) -> ThrottleResult<()>;
}

/// Write side: invoked by the host for each queued family.
pub trait MetricSink: Send + Sync {
    /// Consume one family.
    fn write(&self, family: &MetricFamily, user_data: Option<&UserData>) -> ThrottleResult<()>;
}

/// Registration surface of a host pipeline.
pub trait HostPipeline: Dispatcher {
    /// Register a periodically invoked read source.
    fn register_read(&self, name: &str, source: Arc<dyn MetricSource>) -> ThrottleResult<()>;

    /// Register a write sink. Each call is a distinct schedulable unit, even
    /// when several share a name.
    fn register_write(
        &self,
        name: &str,
        sink: Arc<dyn MetricSink>,
        user_data: Option<UserData>,
    ) -> ThrottleResult<()>;
}
