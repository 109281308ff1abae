//! # Write Throttle - Synthetic Load and Fault Harness
//!
//! This crate plugs into a host metrics pipeline and exercises it under
//! variable consumer latency and abrupt process failure.
//!
//! ## Overview
//!
//! The harness is purely reactive. It registers work units with the host and
//! only runs when the host calls back into them:
//!
//! - **Generator**: one gauge per named series per elapsed second
//! - **Blocking pool**: consumers holding each write for 1-3 seconds (stalls)
//! - **Non-blocking pool**: consumers holding each write for up to 1 second
//! - **Fault trigger**: `TriggerAsan = true` aborts the process during
//!   configuration, to test the host's crash isolation
//!
//! ## Key Components
//!
//! - [`ThrottleConfig`]: the three recognized options
//! - [`WriteThrottle`]: configure-then-register lifecycle
//! - [`MetricGenerator`]: the read source
//! - [`ConsumerPool`] / [`ConsumerTask`]: the write sinks
//! - [`host`]: the host boundary traits and [`LocalPipeline`], a reference host
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use write_throttle::{LocalPipeline, WriteThrottle};
//!
//! # async fn example() {
//! let (plugin, rejected) =
//!     WriteThrottle::configure([("Blocking", "3"), ("NonBlocking", "2")]).unwrap();
//! assert!(rejected.is_empty());
//!
//! let host = LocalPipeline::new();
//! plugin.register(&host).unwrap();
//! host.start(Duration::from_secs(1)).unwrap();
//!
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! let stats = host.shutdown().await;
//! println!("slow backlog: {}", stats.max_backlog_for("write_throttle_block"));
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
mod fault;
pub mod generator;
pub mod host;
pub mod plugin;
pub mod series;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_count, ConfigKey, ThrottleConfig, MAX_COUNT};
pub use consumer::{ConsumerPool, ConsumerTask, LatencyProfile, PoolKind, MAX_POOL_SIZE};
pub use error::{ThrottleError, ThrottleResult};
pub use generator::{MetricGenerator, GENERATOR_NAME};
pub use host::{
    Dispatcher, HostPipeline, LocalPipeline, MetricSink, MetricSource, PipelineStats, SinkStats,
    UserData,
};
pub use plugin::{Registration, WriteThrottle, PLUGIN_NAME};
pub use series::{MetricFamily, MetricType, SERIES_NAMES};
