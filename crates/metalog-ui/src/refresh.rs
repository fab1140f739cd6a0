//! Background refresh worker.
//!
//! A single task owns the store and runs one reconcile pass per request, so
//! two aggregations never overlap. Each pass runs on the blocking pool and
//! is bounded by the query timeout; a timed-out pass is interrupted and the
//! worker waits for the connection to come back before taking more work.

use metalog_core::{reconcile, QueryError, Reconciled, Selection};
use metalog_storage::MetalogStore;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub epoch: u64,
    pub selection: Selection,
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub epoch: u64,
    pub result: Result<Reconciled, QueryError>,
}

pub struct RefreshWorker {
    requests: mpsc::Sender<RefreshRequest>,
    outcomes: mpsc::Receiver<RefreshOutcome>,
    handle: JoinHandle<()>,
}

impl RefreshWorker {
    pub fn spawn(store: MetalogStore, query_timeout: Duration) -> Self {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::channel(4);
        let handle = tokio::spawn(worker_loop(store, query_timeout, request_rx, outcome_tx));
        Self {
            requests: request_tx,
            outcomes: outcome_rx,
            handle,
        }
    }

    pub fn request(&self, request: RefreshRequest) -> Result<(), QueryError> {
        self.requests.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => QueryError::unavailable("refresh queue is full"),
            TrySendError::Closed(_) => QueryError::unavailable("refresh worker stopped"),
        })
    }

    pub async fn next_outcome(&mut self) -> Option<RefreshOutcome> {
        self.outcomes.recv().await
    }

    /// Closes the request channel and waits for the worker to release the store.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            requests,
            outcomes,
            handle,
        } = self;
        drop(requests);
        drop(outcomes);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => info!("refresh worker stopped"),
            Ok(Err(err)) => warn!(error = %err, "refresh worker ended abnormally"),
            Err(_) => warn!(grace_ms = grace.as_millis() as u64, "refresh worker did not stop in time"),
        }
    }
}

async fn worker_loop(
    mut store: MetalogStore,
    query_timeout: Duration,
    mut requests: mpsc::Receiver<RefreshRequest>,
    outcomes: mpsc::Sender<RefreshOutcome>,
) {
    let interrupt = store.interrupt_handle();

    while let Some(RefreshRequest { epoch, selection }) = requests.recv().await {
        debug!(epoch, level = ?selection.level(), "refresh started");
        let mut job = tokio::task::spawn_blocking(move || {
            let result = reconcile(&store, &selection);
            (store, result)
        });

        let (returned, result) = match tokio::time::timeout(query_timeout, &mut job).await {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                error!(epoch, error = %err, "refresh job failed; stopping worker");
                let _ = outcomes
                    .send(RefreshOutcome {
                        epoch,
                        result: Err(QueryError::unavailable(format!("refresh job failed: {err}"))),
                    })
                    .await;
                return;
            }
            Err(_) => {
                let timeout_ms = query_timeout.as_millis() as u64;
                warn!(epoch, timeout_ms, "refresh timed out; interrupting query");
                interrupt.interrupt();
                let _ = outcomes
                    .send(RefreshOutcome {
                        epoch,
                        result: Err(QueryError::unavailable(format!(
                            "query timed out after {timeout_ms} ms"
                        ))),
                    })
                    .await;
                match job.await {
                    Ok((returned, _late)) => {
                        store = returned;
                        continue;
                    }
                    Err(err) => {
                        error!(epoch, error = %err, "timed-out refresh job failed; stopping worker");
                        return;
                    }
                }
            }
        };

        store = returned;
        if let Err(err) = &result {
            debug!(epoch, error = %err, "refresh failed");
        }
        if outcomes.send(RefreshOutcome { epoch, result }).await.is_err() {
            break;
        }
    }

    match store.close() {
        Ok(()) => info!("metalog store closed"),
        Err(err) => warn!(error = %err, "failed to close metalog store"),
    }
}
