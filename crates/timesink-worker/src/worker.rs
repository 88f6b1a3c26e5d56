//! Consumer loop.
//!
//! One task per worker process: fetch a batch, decode it, run the pipeline,
//! then acknowledge. A batch is exactly one of acked (fully applied),
//! rejected-with-requeue (transient backend trouble; the broker redelivers),
//! or rejected-without-requeue (malformed payload; drop it). Transport
//! failures trigger reconnection with a sleep between attempts; the loop
//! never exits on broker failure, only on shutdown.

use crate::coalesce::CoalescedBatch;
use crate::config::WorkerConfig;
use crate::data_writer::DataDocumentWriter;
use crate::decoder::Decoder;
use crate::error::Result;
use crate::event_writer::EventDocumentWriter;
use crate::measurements::MeasurementUpserter;
use crate::metadata::ValueTypeReconciler;
use crate::registry::DataTypeRegistry;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use timesink_backend::{Delivery, DocumentStore, KeyValueCache, LockService, MessageQueue};
use tokio::sync::watch;

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Fully applied and acknowledged.
    Acked,
    /// Malformed payload, rejected without requeue.
    Dropped,
    /// Transient failure, rejected back onto the queue.
    Requeued,
}

/// Batch counters, readable while the worker runs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub dropped: AtomicU64,
    pub requeued: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Acked => self.acked.fetch_add(1, Ordering::Relaxed),
            BatchOutcome::Dropped => self.dropped.fetch_add(1, Ordering::Relaxed),
            BatchOutcome::Requeued => self.requeued.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub struct Worker {
    queue: Arc<dyn MessageQueue>,
    registry: Arc<DataTypeRegistry>,
    decoder: Decoder,
    measurements: MeasurementUpserter,
    metadata: ValueTypeReconciler,
    data_writer: DataDocumentWriter,
    event_writer: EventDocumentWriter,
    config: Arc<WorkerConfig>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KeyValueCache>,
        locks: Arc<dyn LockService>,
        queue: Arc<dyn MessageQueue>,
        config: WorkerConfig,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(DataTypeRegistry::new(
            store.clone(),
            config.ignore_databases.clone(),
        ));
        Self {
            queue,
            decoder: Decoder::new(registry.clone()),
            measurements: MeasurementUpserter::new(
                store.clone(),
                cache.clone(),
                locks.clone(),
                registry.clone(),
                config.clone(),
            ),
            metadata: ValueTypeReconciler::new(
                store.clone(),
                cache.clone(),
                locks.clone(),
                config.clone(),
            ),
            data_writer: DataDocumentWriter::new(
                store.clone(),
                cache.clone(),
                locks.clone(),
                config.clone(),
            ),
            event_writer: EventDocumentWriter::new(store, cache, locks, config.clone()),
            registry,
            config,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn registry(&self) -> &Arc<DataTypeRegistry> {
        &self.registry
    }

    /// Consume until `shutdown` flips. The in-flight batch is always settled
    /// (acked or rejected) before the loop exits, preserving at-least-once.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(queue = %self.config.rabbit.queue, "worker started");
        while !*shutdown.borrow() {
            match self.queue.recv(self.config.queue_fetch_timeout).await {
                Err(error) => {
                    tracing::error!(error = %error, "queue receive failed");
                    self.reconnect(&shutdown).await;
                }
                Ok(None) => {}
                Ok(Some(delivery)) => {
                    let outcome = self.handle_delivery(&delivery).await;
                    let settle = match outcome {
                        BatchOutcome::Acked => self.queue.ack(delivery.tag).await,
                        BatchOutcome::Dropped => self.queue.reject(delivery.tag, false).await,
                        BatchOutcome::Requeued => self.queue.reject(delivery.tag, true).await,
                    };
                    if let Err(error) = settle {
                        tracing::error!(error = %error, "queue acknowledge failed");
                        self.reconnect(&shutdown).await;
                    }
                }
            }
        }
        tracing::info!("worker stopped");
    }

    /// Re-establish the queue channel, sleeping between attempts. Gives up
    /// only on shutdown.
    async fn reconnect(&self, shutdown: &watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.queue.reconnect().await {
                Ok(()) => {
                    tracing::info!("queue channel re-established");
                    return;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "reconnect failed, retrying");
                    tokio::time::sleep(self.config.reconnect_timeout).await;
                }
            }
        }
    }

    /// Classify and process one delivery. Never panics the loop: every path
    /// resolves to an outcome.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> BatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let payload: Value = match serde_json::from_slice(&delivery.body) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(error = %error, "payload is not JSON, dropping");
                let outcome = BatchOutcome::Dropped;
                self.stats.record(outcome);
                return outcome;
            }
        };
        let Some(items) = payload.as_array() else {
            tracing::warn!("payload is not an array, dropping");
            let outcome = BatchOutcome::Dropped;
            self.stats.record(outcome);
            return outcome;
        };

        let outcome = match self.process_batch(items).await {
            Ok(()) => BatchOutcome::Acked,
            Err(error) if error.is_transient() => {
                tracing::warn!(error = %error, "batch failed, requeueing");
                BatchOutcome::Requeued
            }
            Err(error) => {
                tracing::warn!(error = %error, "batch rejected");
                BatchOutcome::Dropped
            }
        };
        self.stats.record(outcome);
        outcome
    }

    /// The pipeline over one decoded batch: coalesce, ensure measurements and
    /// value types, then write data and event buckets.
    pub async fn process_batch(&self, items: &[Value]) -> Result<()> {
        let decoded = self.decoder.decode(items).await?;
        let batch = CoalescedBatch::from_messages(decoded.data_messages, decoded.event_messages);

        self.measurements
            .ensure_all(batch.measurements.values())
            .await?;
        self.metadata.ensure_all(&batch.value_types).await?;
        self.data_writer
            .write_all(batch.documents.into_values())
            .await?;
        self.event_writer
            .write_all(batch.events.into_values())
            .await?;
        Ok(())
    }
}
