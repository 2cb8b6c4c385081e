//! Ingestion queue: the single write path into the metric stores
//!
//! Producers (poll loops and on-demand cycles) enqueue snapshots; one
//! background task persists them in arrival order. The channel is bounded so
//! a slow store pushes back on producers instead of growing without limit.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{PersistOutcome, StoreError, StoreManager};
use crate::exposition::Snapshot;

#[derive(Debug)]
pub struct PersistRequest {
    pub application: String,
    pub pod: String,
    pub snapshot: Snapshot,
}

/// Producer handle; clone freely
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<PersistRequest>,
}

impl IngestQueue {
    /// Queue a snapshot, waiting for capacity when the queue is full
    pub async fn enqueue(&self, request: PersistRequest) -> Result<(), StoreError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| StoreError::QueueClosed)
    }

    /// Free slots left in the channel
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

/// Owner of the consumer task
pub struct IngestWriter {
    close: CancellationToken,
    handle: JoinHandle<u64>,
}

impl IngestWriter {
    /// Spawn the consumer and return its producer handle
    pub fn spawn(stores: Arc<StoreManager>, capacity: usize) -> (IngestQueue, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let close = CancellationToken::new();

        let handle = tokio::spawn(writer_task(stores, rx, close.clone()));

        (IngestQueue { sender: tx }, Self { close, handle })
    }

    /// Stop accepting requests, persist what is already queued and wait for
    /// the consumer to exit. Returns the number of requests processed.
    pub async fn shutdown(self) -> u64 {
        self.close.cancel();
        match self.handle.await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::error!(error = %e, "Ingestion writer task failed");
                0
            }
        }
    }
}

async fn writer_task(
    stores: Arc<StoreManager>,
    mut rx: mpsc::Receiver<PersistRequest>,
    close: CancellationToken,
) -> u64 {
    let mut processed = 0;
    let mut closing = false;

    loop {
        let request = tokio::select! {
            request = rx.recv() => request,
            _ = close.cancelled(), if !closing => {
                // Reject new sends; buffered requests are still drained below
                rx.close();
                closing = true;
                continue;
            }
        };

        let Some(request) = request else {
            break;
        };

        persist_one(&stores, request).await;
        processed += 1;
    }

    tracing::info!(processed = processed, "Ingestion writer task shutting down");
    processed
}

async fn persist_one(stores: &StoreManager, request: PersistRequest) {
    match stores
        .persist(&request.application, &request.pod, &request.snapshot)
        .await
    {
        Ok(PersistOutcome::Stored { .. }) | Ok(PersistOutcome::OutsideWindow) => {}
        Err(e) => {
            tracing::error!(
                error = %e,
                application = %request.application,
                pod = %request.pod,
                "Failed to persist snapshot"
            );
        }
    }
}
