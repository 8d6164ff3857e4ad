//! Bounded work queue and the worker pool that drains it.
//!
//! Enqueue is non-blocking and fails fast once the channel is full; the
//! occupancy ratio drives the degradation mode workers read at the start of
//! each item. Failures re-enqueue through exponential-backoff timers until
//! the retry budget runs out. Startup is idempotent and shutdown honors a
//! caller-supplied deadline, abandoning in-flight items on expiry.

use crate::bus::EventBus;
use crate::dpq::PersistenceQueue;
use crate::error::{Error, Result};
use crate::graph::GraphStore;
use crate::persist;
use crate::pipeline::Pipeline;
use crate::types::{DegradationMode, Event, Topic};
use mnemo_core::{WorkItem, WorkKind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub workers: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1000, workers: 4, max_retries: 3, backoff_base: Duration::from_secs(1) }
    }
}

/// Exponential backoff: `base * 2^(retries-1)`.
pub fn calculate_backoff(base: Duration, retries: u32) -> Duration {
    base * 2u32.saturating_pow(retries.saturating_sub(1))
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    /// Primary enqueues rejected by a full channel.
    dropped: AtomicU64,
    /// Retry re-enqueues rejected by a full channel (item permanently lost).
    retry_dropped: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub capacity: usize,
    pub workers: usize,
    pub processed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub dropped: u64,
    pub retry_dropped: u64,
    pub degradation: DegradationMode,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Everything a worker needs, shared behind one Arc.
struct QueueCore {
    tx: mpsc::Sender<WorkItem>,
    rx: tokio::sync::Mutex<mpsc::Receiver<WorkItem>>,
    config: QueueConfig,
    pipeline: Pipeline,
    graph: Arc<dyn GraphStore>,
    dpq: PersistenceQueue,
    bus: EventBus,
    counters: Counters,
    /// (provider, model) for chunk-embedding node keys.
    embed_key: Option<(String, String)>,
}

struct WorkerHandle {
    id: usize,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct WorkQueue {
    core: Arc<QueueCore>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<WorkerHandle>>,
    worker_seq: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl WorkQueue {
    pub fn new(
        config: QueueConfig,
        pipeline: Pipeline,
        graph: Arc<dyn GraphStore>,
        dpq: PersistenceQueue,
        bus: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        let embed_key = pipeline
            .embeddings
            .as_ref()
            .map(|e| (e.provider_name().to_string(), e.model_name().to_string()));
        let core = Arc::new(QueueCore {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            config,
            pipeline,
            graph,
            dpq,
            bus,
            counters: Counters::default(),
            embed_key,
        });
        let (shutdown, _) = watch::channel(false);
        Self {
            core,
            shutdown,
            workers: Mutex::new(Vec::new()),
            worker_seq: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the worker pool and the bus handlers. Safe to call twice; the
    /// second call is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(workers = self.core.config.workers, capacity = self.core.config.capacity, "work queue starting");
        for _ in 0..self.core.config.workers {
            self.spawn_worker();
        }
        self.attach_bus_handlers();
    }

    /// Non-blocking enqueue; fails fast when the channel is full or the
    /// queue has been stopped.
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::State("work queue is stopped".into()));
        }
        self.core.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.core.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Error::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => Error::State("work channel closed".into()),
        })
    }

    pub fn stats(&self) -> QueueStats {
        self.core.stats(self.workers.lock().unwrap().len())
    }

    pub fn degradation(&self) -> DegradationMode {
        self.core.degradation()
    }

    /// Grow or shrink the pool. Shrinking signals the highest-indexed
    /// workers to stop after their current item; convergence is best-effort.
    pub fn set_worker_count(&self, n: usize) {
        let mut workers = self.workers.lock().unwrap();
        while workers.len() < n {
            let handle = self.spawn_worker_locked();
            workers.push(handle);
        }
        if workers.len() > n {
            workers.sort_by_key(|w| w.id);
            for removed in workers.split_off(n) {
                debug!(worker = removed.id, "stopping worker on shrink");
                let _ = removed.stop.send(true);
            }
        }
        info!(workers = workers.len(), "worker count adjusted");
    }

    /// Graceful stop: signal shutdown, wait up to `deadline` for workers to
    /// finish their current item, then abandon whatever is still running.
    pub async fn stop(&self, deadline: Duration) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);

        let handles: Vec<WorkerHandle> = self.workers.lock().unwrap().drain(..).collect();
        let deadline_at = Instant::now() + deadline;
        for mut worker in handles {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut worker.handle).await.is_err() {
                warn!(worker = worker.id, "stop deadline expired, abandoning in-flight item");
                worker.handle.abort();
            }
        }
        info!("work queue stopped");
    }

    fn spawn_worker(&self) {
        let handle = self.spawn_worker_locked();
        self.workers.lock().unwrap().push(handle);
    }

    fn spawn_worker_locked(&self) -> WorkerHandle {
        let id = self.worker_seq.fetch_add(1, Ordering::SeqCst);
        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker_loop(core, id, shutdown, stop_rx));
        WorkerHandle { id, stop: stop_tx, handle }
    }

    /// Subscribe to file events; discovered/changed files become work items.
    /// The bus never learns about the queue, so no cycle forms.
    fn attach_bus_handlers(&self) {
        for topic in [Topic::FileDiscovered, Topic::FileChanged] {
            let mut sub = self.core.bus.subscribe(topic);
            let core = Arc::clone(&self.core);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        event = sub.recv() => {
                            let Some(event) = event else { break };
                            let item = match event {
                                Event::FileDiscovered { path, size, mod_time } => {
                                    WorkItem::new(path, size, mod_time, WorkKind::New)
                                }
                                Event::FileChanged { path, size, mod_time } => {
                                    WorkItem::new(path, size, mod_time, WorkKind::Changed)
                                }
                                _ => continue,
                            };
                            if let Err(err) = core.try_enqueue(item) {
                                warn!(error = %err, "event enqueue rejected");
                            }
                        }
                    }
                }
            });
        }
    }
}

impl QueueCore {
    fn pending(&self) -> usize {
        self.config.capacity.saturating_sub(self.tx.capacity())
    }

    fn degradation(&self) -> DegradationMode {
        DegradationMode::from_occupancy(self.pending() as f64 / self.config.capacity.max(1) as f64)
    }

    fn stats(&self, workers: usize) -> QueueStats {
        QueueStats {
            pending: self.pending(),
            capacity: self.config.capacity,
            workers,
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            retry_dropped: self.counters.retry_dropped.load(Ordering::Relaxed),
            degradation: self.degradation(),
        }
    }

    fn try_enqueue(&self, item: WorkItem) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Error::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => Error::State("work channel closed".into()),
        })
    }

    /// One item, end to end: analyze, persist, publish the outcome.
    async fn process(self: &Arc<Self>, item: WorkItem) {
        let started = Instant::now();
        // Degradation is sampled once per item, at the start.
        let degradation = self.degradation();
        debug!(path = %item.path, retries = item.retries, mode = degradation.label(), "item received");

        let result = match self.pipeline.run(&item, degradation).await {
            Ok(result) => result,
            Err(err) => {
                self.handle_failure(item, err);
                return;
            }
        };

        let embed_key = self
            .embed_key
            .as_ref()
            .map(|(provider, model)| (provider.as_str(), model.as_str()));
        match persist::persist_result(self.graph.as_ref(), &self.dpq, &result, embed_key).await {
            Ok(_) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                self.bus.publish(Event::AnalysisComplete {
                    path: result.path.clone(),
                    content_hash: result.content_hash.clone(),
                    analysis_type: result.analysis_type(),
                    duration: started.elapsed(),
                });
            }
            Err(err) => {
                self.bus.publish(Event::GraphPersistenceFailed {
                    path: result.path.clone(),
                    error: err.to_string(),
                });
                self.handle_failure(item, err);
            }
        }
    }

    /// Retry with backoff until the budget runs out, then abandon loudly.
    fn handle_failure(self: &Arc<Self>, mut item: WorkItem, err: Error) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        item.retries += 1;

        if item.retries > self.config.max_retries || !err.is_transient() {
            warn!(path = %item.path, retries = item.retries, error = %err, "item abandoned");
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            self.bus.publish(Event::AnalysisFailed {
                path: item.path.clone(),
                error: err.to_string(),
                retries: item.retries,
            });
            return;
        }

        let delay = calculate_backoff(self.config.backoff_base, item.retries);
        debug!(path = %item.path, retries = item.retries, delay_ms = delay.as_millis() as u64, "retry scheduled");
        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if core.try_enqueue(item.clone()).is_err() {
                // Accepted risk: the retry is dropped and only the metric
                // records it.
                warn!(path = %item.path, "retry re-enqueue rejected, item lost");
                core.counters.retry_dropped.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

async fn worker_loop(
    core: Arc<QueueCore>,
    id: usize,
    mut shutdown: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(worker = id, "worker started");
    loop {
        if *shutdown.borrow() || *stop.borrow() {
            break;
        }
        let item = {
            let mut rx = core.rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = stop.changed() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            }
        };
        core.process(item).await;
    }
    debug!(worker = id, "worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
