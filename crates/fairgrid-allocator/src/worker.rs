//! The allocator worker — one consumer draining the operation queue.
//!
//! Runs the serialized event loop: operations apply in FIFO order, marking
//! events set the coalescing flag, and an allocation run executes once the
//! queue is momentarily empty. A periodic tick marks a batch run every
//! `allocation_interval`.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AllocatorConfig;
use crate::core::AllocatorState;
use crate::handle::{Allocator, AllocatorOp, InverseOfferCallback, OfferCallback};

/// Owns the allocator state and the receiving end of the queue.
pub struct AllocatorWorker {
    state: AllocatorState,
    rx: mpsc::UnboundedReceiver<AllocatorOp>,
}

impl AllocatorWorker {
    /// Bind callbacks and build the (handle, worker) pair. The worker does
    /// nothing until [`AllocatorWorker::run`] is awaited.
    pub fn new(
        config: AllocatorConfig,
        offer_cb: OfferCallback,
        inverse_offer_cb: InverseOfferCallback,
    ) -> (Allocator, AllocatorWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = AllocatorWorker {
            state: AllocatorState::new(config, offer_cb, inverse_offer_cb),
            rx,
        };
        (Allocator::new(tx), worker)
    }

    /// Spawn the worker on the current runtime; returns the handle, the
    /// shutdown trigger, and the join handle.
    pub fn spawn(
        config: AllocatorConfig,
        offer_cb: OfferCallback,
        inverse_offer_cb: InverseOfferCallback,
    ) -> (Allocator, watch::Sender<bool>, JoinHandle<()>) {
        let (allocator, worker) = AllocatorWorker::new(config, offer_cb, inverse_offer_cb);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker.run(shutdown_rx));
        (allocator, shutdown_tx, join)
    }

    /// Run until shutdown is signaled or every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.state.config.allocation_interval.as_millis() as u64,
            "allocator worker started"
        );

        let mut tick = tokio::time::interval(self.state.config.allocation_interval);
        // The first tick completes immediately; skip it.
        tick.tick().await;

        loop {
            tokio::select! {
                maybe_op = self.rx.recv() => {
                    match maybe_op {
                        Some(op) => {
                            self.state.handle(op);
                            // Drain whatever is already queued so one run
                            // observes the whole burst.
                            while let Ok(op) = self.rx.try_recv() {
                                self.state.handle(op);
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.state.allocation_needed = true;
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if self.state.allocation_needed {
                self.state.allocation_needed = false;
                self.state.allocate();
            }
        }

        info!("allocator worker stopped");
    }
}
