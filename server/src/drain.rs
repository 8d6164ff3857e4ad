//! Drain worker: re-applies buffered analysis results once the graph
//! returns.
//!
//! A compare-and-swap latch keeps at most one drain running; trigger events
//! arriving mid-drain are dropped cheaply, and the next `GraphConnected`
//! re-triggers. Batches keep flowing until the durable queue runs dry, then
//! one purge sweeps terminal rows past their retention.

use crate::bus::EventBus;
use crate::dpq::PersistenceQueue;
use crate::graph::GraphStore;
use crate::persist;
use crate::types::Topic;
use mnemo_core::AnalysisResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            completed_retention: Duration::from_secs(60 * 60),
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

pub struct DrainWorker {
    graph: Arc<dyn GraphStore>,
    dpq: PersistenceQueue,
    config: DrainConfig,
    /// (provider, model) for chunk-embedding node keys.
    embed_key: Option<(String, String)>,
    draining: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl DrainWorker {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        dpq: PersistenceQueue,
        config: DrainConfig,
        embed_key: Option<(String, String)>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self { graph, dpq, config, embed_key, draining: AtomicBool::new(false), shutdown })
    }

    /// Listen for `GraphConnected` and drain on each; drain immediately when
    /// the graph is already connected at startup.
    pub fn start(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut sub = bus.subscribe(Topic::GraphConnected);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown.subscribe();
            if this.graph.is_connected() {
                this.trigger_drain().await;
            }
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = sub.recv() => {
                        if event.is_none() {
                            break;
                        }
                        this.trigger_drain().await;
                    }
                }
            }
            debug!("drain listener stopped");
        })
    }

    /// Run one drain unless another is in progress. Returns whether this
    /// call performed the drain.
    pub async fn trigger_drain(&self) -> bool {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already running, trigger dropped");
            return false;
        }
        self.drain().await;
        self.draining.store(false, Ordering::SeqCst);
        true
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Idempotent; also safe to call without a running listener.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn drain(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut applied = 0u64;
        let mut failed = 0u64;

        loop {
            if *shutdown.borrow() {
                debug!("drain cancelled by stop");
                break;
            }
            // A disconnect mid-drain ends this run; the next connect event
            // re-triggers.
            if !self.graph.is_connected() {
                debug!("graph disconnected mid-drain, stopping");
                break;
            }

            let batch = match self.dpq.dequeue_batch(self.config.batch_size) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "drain dequeue failed");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let embed_key = self
                .embed_key
                .as_ref()
                .map(|(provider, model)| (provider.as_str(), model.as_str()));

            for item in batch {
                if *shutdown.borrow() {
                    return;
                }
                let outcome = match serde_json::from_str::<AnalysisResult>(&item.result_json) {
                    Ok(result) => {
                        persist::apply_to_graph(self.graph.as_ref(), &result, embed_key).await
                    }
                    Err(err) => Err(err.into()),
                };
                match outcome {
                    Ok(_) => {
                        applied += 1;
                        if let Err(err) = self.dpq.complete(item.id) {
                            warn!(id = item.id, error = %err, "drain complete bookkeeping failed");
                        }
                    }
                    Err(err) => {
                        failed += 1;
                        if let Err(mark_err) =
                            self.dpq.fail(item.id, self.config.max_retries, &err.to_string())
                        {
                            warn!(id = item.id, error = %mark_err, "drain fail bookkeeping failed");
                        }
                    }
                }
            }
        }

        match self.dpq.purge(self.config.completed_retention, self.config.failed_retention) {
            Ok(purged) => {
                info!(applied = applied, failed = failed, purged = purged, "drain finished")
            }
            Err(err) => warn!(error = %err, "drain purge failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
