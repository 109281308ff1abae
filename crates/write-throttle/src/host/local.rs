//! In-process reference host.
//!
//! Every registered sink gets its own queue and one dedicated blocking
//! worker, so a slow sink only stalls itself. Dispatch fans each family out
//! to every sink queue. Read sources are driven from a tokio interval, or by
//! hand through [`LocalPipeline::tick`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Dispatcher, HostPipeline, MetricSink, MetricSource, UserData};
use crate::error::{ThrottleError, ThrottleResult};
use crate::series::MetricFamily;

/// Snapshot of pipeline activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Families accepted by dispatch.
    pub dispatched: u64,

    /// Per-sink counters, in registration order.
    pub sinks: Vec<SinkStats>,
}

impl PipelineStats {
    /// Invocation counts of every sink registered under `name`.
    pub fn invocations_for(&self, name: &str) -> Vec<u64> {
        self.sinks
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.invocations)
            .collect()
    }

    /// Largest queue depth among sinks registered under `name`.
    pub fn max_backlog_for(&self, name: &str) -> usize {
        self.sinks
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.backlog)
            .max()
            .unwrap_or(0)
    }
}

/// Counters for one registered sink.
#[derive(Debug, Clone, Serialize)]
pub struct SinkStats {
    pub name: String,
    pub invocations: u64,
    pub failures: u64,
    /// Families queued but not yet written.
    pub backlog: usize,
}

struct SinkSlot {
    name: String,
    sink: Arc<dyn MetricSink>,
    user_data: Option<UserData>,
    tx: Mutex<Option<mpsc::UnboundedSender<MetricFamily>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<MetricFamily>>>,
    backlog: AtomicUsize,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl SinkSlot {
    fn write(&self, family: &MetricFamily) {
        self.backlog.fetch_sub(1, Ordering::SeqCst);
        match self.sink.write(family, self.user_data.as_ref()) {
            Ok(()) => {
                self.invocations.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                warn!(sink = %self.name, error = %err, "Write callback failed");
            }
        }
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            name: self.name.clone(),
            invocations: self.invocations.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            backlog: self.backlog.load(Ordering::SeqCst),
        }
    }
}

struct Shared {
    sources: RwLock<Vec<(String, Arc<dyn MetricSource>)>>,
    sinks: RwLock<Vec<Arc<SinkSlot>>>,
    dispatched: AtomicU64,
    rejecting: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Shared {
    fn tick(&self) {
        let sources = self.sources.read().clone();
        for (name, source) in sources {
            if let Err(err) = source.read(self) {
                warn!(source = %name, error = %err, "Read callback failed");
            }
        }
    }
}

impl Dispatcher for Shared {
    fn dispatch(&self, family: MetricFamily) -> ThrottleResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ThrottleError::PipelineStopped);
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ThrottleError::Dispatch {
                series: family.name,
                reason: "pipeline is rejecting dispatch".to_string(),
            });
        }

        for slot in self.sinks.read().iter() {
            if let Some(tx) = slot.tx.lock().as_ref() {
                slot.backlog.fetch_add(1, Ordering::SeqCst);
                if tx.send(family.clone()).is_err() {
                    slot.backlog.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reference host pipeline.
pub struct LocalPipeline {
    shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalPipeline {
    /// Create an idle pipeline with nothing registered.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                sources: RwLock::new(Vec::new()),
                sinks: RwLock::new(Vec::new()),
                dispatched: AtomicU64::new(0),
                rejecting: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
            ticker: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Make every subsequent dispatch fail (or succeed again).
    pub fn reject_dispatch(&self, reject: bool) {
        self.shared.rejecting.store(reject, Ordering::SeqCst);
    }

    /// Invoke every read source once on the calling thread.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Write everything queued so far on the calling thread.
    ///
    /// Only meaningful before [`start`](Self::start); afterwards the queues
    /// belong to the workers and this returns 0.
    pub fn process_pending(&self) -> usize {
        let mut written = 0;
        for slot in self.shared.sinks.read().iter() {
            let mut rx = slot.rx.lock();
            let Some(rx) = rx.as_mut() else { continue };
            while let Ok(family) = rx.try_recv() {
                slot.write(&family);
                written += 1;
            }
        }
        written
    }

    /// Spawn one blocking worker per sink and drive the read sources every
    /// `read_interval`. Must be called from within a tokio runtime.
    pub fn start(&self, read_interval: Duration) -> ThrottleResult<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(ThrottleError::PipelineStopped);
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let slots = self.shared.sinks.read().clone();
        info!(
            sinks = slots.len(),
            sources = self.shared.sources.read().len(),
            interval_ms = read_interval.as_millis() as u64,
            "Starting local pipeline"
        );

        let mut workers = self.workers.lock();
        for slot in slots {
            let Some(rx) = slot.rx.lock().take() else {
                continue;
            };
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::task::spawn_blocking(move || {
                run_worker(&shared, &slot, rx)
            }));
        }

        let shared = Arc::clone(&self.shared);
        *self.ticker.lock() = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(read_interval);
            loop {
                interval.tick().await;
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                shared.tick();
            }
        }));

        Ok(())
    }

    /// Stop ticking, let in-flight writes finish and join every worker.
    ///
    /// Families still queued are left unwritten and show up as backlog.
    pub async fn shutdown(&self) -> PipelineStats {
        self.shared.stopped.store(true, Ordering::SeqCst);

        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.abort();
            let _ = ticker.await;
        }

        for slot in self.shared.sinks.read().iter() {
            slot.tx.lock().take();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "Pipeline worker terminated abnormally");
            }
        }

        let stats = self.stats();
        info!(dispatched = stats.dispatched, "Local pipeline stopped");
        stats
    }

    /// Current counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            dispatched: self.shared.dispatched.load(Ordering::SeqCst),
            sinks: self.shared.sinks.read().iter().map(|s| s.stats()).collect(),
        }
    }

    /// Number of registered read sources.
    pub fn source_count(&self) -> usize {
        self.shared.sources.read().len()
    }

    /// Number of registered sinks under `name`.
    pub fn sink_count(&self, name: &str) -> usize {
        self.shared
            .sinks
            .read()
            .iter()
            .filter(|s| s.name == name)
            .count()
    }
}

/// Dropping a pipeline without [`shutdown`](LocalPipeline::shutdown) stops
/// the ticker and closes every queue; workers finish their current write and
/// exit on their own.
impl Drop for LocalPipeline {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
        for slot in self.shared.sinks.read().iter() {
            slot.tx.lock().take();
        }
    }
}

impl Default for LocalPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn run_worker(shared: &Shared, slot: &SinkSlot, mut rx: mpsc::UnboundedReceiver<MetricFamily>) {
    debug!(sink = %slot.name, "Pipeline worker started");
    while let Some(family) = rx.blocking_recv() {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        slot.write(&family);
    }
    debug!(sink = %slot.name, "Pipeline worker exiting");
}

impl Dispatcher for LocalPipeline {
    fn dispatch(&self, family: MetricFamily) -> ThrottleResult<()> {
        self.shared.dispatch(family)
    }
}

impl HostPipeline for LocalPipeline {
    fn register_read(&self, name: &str, source: Arc<dyn MetricSource>) -> ThrottleResult<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(ThrottleError::PipelineStopped);
        }

        debug!(name = %name, "Registering read source");
        self.shared.sources.write().push((name.to_string(), source));
        Ok(())
    }

    fn register_write(
        &self,
        name: &str,
        sink: Arc<dyn MetricSink>,
        user_data: Option<UserData>,
    ) -> ThrottleResult<()> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(ThrottleError::PipelineStopped);
        }
        if self.shared.started.load(Ordering::SeqCst) {
            return Err(ThrottleError::Registration {
                name: name.to_string(),
                reason: "write sinks must be registered before start".to_string(),
            });
        }

        debug!(name = %name, "Registering write sink");
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.sinks.write().push(Arc::new(SinkSlot {
            name: name.to_string(),
            sink,
            user_data,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            backlog: AtomicUsize::new(0),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Mutex<Vec<(String, Option<u32>)>>,
    }

    impl MetricSink for Recorder {
        fn write(&self, family: &MetricFamily, user_data: Option<&UserData>) -> ThrottleResult<()> {
            let tag = user_data.and_then(|d| d.downcast_ref::<u32>()).copied();
            self.seen.lock().push((family.name.clone(), tag));
            Ok(())
        }
    }

    struct Failing;

    impl MetricSink for Failing {
        fn write(&self, family: &MetricFamily, _: Option<&UserData>) -> ThrottleResult<()> {
            Err(ThrottleError::Dispatch {
                series: family.name.clone(),
                reason: "always fails".into(),
            })
        }
    }

    struct Emitter;

    #[derive(Default)]
    struct Reads(AtomicUsize);

    impl MetricSource for Reads {
        fn read(&self, _: &dyn Dispatcher) -> ThrottleResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl MetricSource for Emitter {
        fn read(&self, dispatcher: &dyn Dispatcher) -> ThrottleResult<()> {
            dispatcher.dispatch(MetricFamily::gauge("alice", 1.0))
        }
    }

    #[test]
    fn dispatch_fans_out_to_every_sink() {
        let pipeline = LocalPipeline::new();
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        pipeline.register_write("rec", first.clone(), Some(Arc::new(7u32))).unwrap();
        pipeline.register_write("rec", second.clone(), None).unwrap();

        pipeline.dispatch(MetricFamily::gauge("bob", 2.0)).unwrap();
        assert_eq!(pipeline.stats().max_backlog_for("rec"), 1);
        assert_eq!(pipeline.process_pending(), 2);

        assert_eq!(first.seen.lock().as_slice(), &[("bob".to_string(), Some(7))]);
        assert_eq!(second.seen.lock().as_slice(), &[("bob".to_string(), None)]);
        assert_eq!(pipeline.stats().invocations_for("rec"), vec![1, 1]);
        assert_eq!(pipeline.stats().max_backlog_for("rec"), 0);
    }

    #[test]
    fn tick_invokes_sources() {
        let pipeline = LocalPipeline::new();
        pipeline.register_read("emitter", Arc::new(Emitter)).unwrap();
        pipeline.tick();
        pipeline.tick();
        assert_eq!(pipeline.stats().dispatched, 2);
        assert_eq!(pipeline.source_count(), 1);
    }

    #[test]
    fn failing_sink_is_counted() {
        let pipeline = LocalPipeline::new();
        pipeline.register_write("bad", Arc::new(Failing), None).unwrap();
        pipeline.dispatch(MetricFamily::gauge("eve", 0.0)).unwrap();
        pipeline.process_pending();

        let stats = pipeline.stats();
        assert_eq!(stats.sinks[0].failures, 1);
        assert_eq!(stats.sinks[0].invocations, 0);
    }

    #[test]
    fn rejecting_pipeline_refuses_dispatch() {
        let pipeline = LocalPipeline::new();
        pipeline.reject_dispatch(true);
        let err = pipeline.dispatch(MetricFamily::gauge("eve", 0.0)).unwrap_err();
        assert!(matches!(err, ThrottleError::Dispatch { .. }));
        assert_eq!(pipeline.stats().dispatched, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_drain_queues_until_shutdown() {
        let pipeline = LocalPipeline::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        pipeline.register_write("rec", recorder.clone(), None).unwrap();
        pipeline.register_read("emitter", Arc::new(Emitter)).unwrap();

        pipeline.start(Duration::from_millis(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = pipeline.shutdown().await;

        assert!(stats.dispatched >= 2);
        assert!(!recorder.seen.lock().is_empty());
        assert!(pipeline.dispatch(MetricFamily::gauge("x", 0.0)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_a_running_pipeline_stops_the_ticker() {
        let reads = Arc::new(Reads::default());
        let pipeline = LocalPipeline::new();
        pipeline.register_read("reads", reads.clone()).unwrap();
        pipeline.register_write("bad", Arc::new(Failing), None).unwrap();

        pipeline.start(Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let shared = Arc::downgrade(&pipeline.shared);
        drop(pipeline);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = reads.0.load(Ordering::SeqCst);
        assert!(settled >= 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reads.0.load(Ordering::SeqCst), settled);
        assert!(shared.upgrade().is_none(), "ticker or worker still holds the pipeline");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_sink_registration_is_refused() {
        let pipeline = LocalPipeline::new();
        pipeline.start(Duration::from_secs(1)).unwrap();
        let err = pipeline
            .register_write("late", Arc::new(Failing), None)
            .unwrap_err();
        assert!(matches!(err, ThrottleError::Registration { .. }));
        pipeline.shutdown().await;
    }
}
