//! Batch runner - spawns the worker pool and collects the result
//!
//! The runner is responsible for:
//! - Sizing the worker pool
//! - Starting the workers against one shared coordinator
//! - Forwarding per-file events to the caller (progress display)
//! - Joining the workers and producing the final verdict

use super::coordinator::TransferCoordinator;
use super::outcome::BatchVerdict;
use super::queue::WorkItem;
use super::worker::{aggregate_stats, TransferEvent, TransferOptions, Worker};
use crate::credentials::{Credentials, PasswordPrompt};
use crate::error::Result;
use crate::signer::Signer;
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of workers for a batch: the configured count, capped at the
/// number of items, never less than one
pub fn worker_count(configured: usize, items: usize) -> usize {
    configured.min(items).max(1)
}

/// Settings for one batch
#[derive(Debug, Clone, Default)]
pub struct BatchSettings {
    /// Configured thread count
    pub threads: usize,

    /// Start with the probe gate armed
    pub one_first: bool,

    /// Per-file options
    pub options: TransferOptions,
}

/// Result of a completed batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Final status
    pub verdict: BatchVerdict,

    /// Files signed
    pub signed: u64,

    /// Attempts that failed for non-authentication reasons
    pub failed: u64,

    /// Attempts rejected for bad credentials
    pub auth_rejected: u64,

    /// Password re-prompts
    pub retries: u32,

    /// Files never attempted (aborted batches)
    pub remaining: usize,

    /// Input bytes of signed files
    pub bytes_in: u64,

    /// Output bytes written
    pub bytes_out: u64,

    /// Time taken
    pub duration: Duration,
}

/// Runs a batch of files through a worker pool
pub struct BatchRunner {
    coordinator: Arc<TransferCoordinator>,
    signer: Arc<dyn Signer>,
    options: Arc<TransferOptions>,
    worker_count: usize,
    total_items: usize,
    one_first: bool,
}

impl BatchRunner {
    pub fn new(
        items: Vec<WorkItem>,
        credentials: Credentials,
        settings: BatchSettings,
        signer: Arc<dyn Signer>,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Self {
        let total_items = items.len();
        let worker_count = worker_count(settings.threads, total_items);
        let coordinator =
            TransferCoordinator::new(items, credentials, settings.one_first, prompt);

        Self {
            coordinator: Arc::new(coordinator),
            signer,
            options: Arc::new(settings.options),
            worker_count,
            total_items,
            one_first: settings.one_first,
        }
    }

    /// Shared coordinator, e.g. for aborting from a signal handler
    pub fn coordinator(&self) -> Arc<TransferCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run the batch to completion
    pub fn run(self) -> Result<BatchResult> {
        self.run_with(|_| {})
    }

    /// Run the batch, handing every attempt's outcome to `on_event`
    ///
    /// `on_event` runs on the calling thread.
    pub fn run_with<F>(self, mut on_event: F) -> Result<BatchResult>
    where
        F: FnMut(&TransferEvent),
    {
        let start = Instant::now();

        info!(
            files = self.total_items,
            workers = self.worker_count,
            one_first = self.one_first,
            "Starting batch"
        );

        let (event_tx, event_rx) = unbounded();
        let mut workers = Vec::with_capacity(self.worker_count);

        for id in 0..self.worker_count {
            let spawned = Worker::spawn(
                id,
                Arc::clone(&self.coordinator),
                Arc::clone(&self.signer),
                Arc::clone(&self.options),
                Some(event_tx.clone()),
            );

            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    self.coordinator.abort();
                    drop(event_tx);
                    join_workers(workers);
                    return Err(e.into());
                }
            }
        }

        debug!(count = workers.len(), "Workers spawned");

        // Ends once every worker has dropped its sender
        drop(event_tx);
        for event in event_rx.iter() {
            on_event(&event);
        }

        let totals = aggregate_stats(&workers);
        join_workers(workers);

        let snapshot = self.coordinator.snapshot();
        let verdict = self.coordinator.verdict();
        let duration = start.elapsed();

        info!(
            signed = totals.signed,
            failed = totals.failed,
            retries = snapshot.retries,
            duration_ms = duration.as_millis() as u64,
            verdict = %verdict,
            "Batch finished"
        );

        Ok(BatchResult {
            verdict,
            signed: totals.signed,
            failed: totals.failed,
            auth_rejected: totals.auth_rejected,
            retries: snapshot.retries,
            remaining: snapshot.remaining,
            bytes_in: totals.bytes_in,
            bytes_out: totals.bytes_out,
            duration,
        })
    }
}

fn join_workers(workers: Vec<Worker>) {
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.join() {
            warn!(worker = id, error = %e, "Worker failed to join cleanly");
        }
    }
}
